//! Owner reference injected into objects created through the gateway

use crate::{GatewayError, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference as K8sOwnerReference;
use serde_json::{Map, Value};

/// Identifies the object that every created object will point back to.
///
/// All four fields are mandatory; the upstream garbage collector ignores
/// references that lack any of them.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnerReference {
    inner: K8sOwnerReference,
}

impl OwnerReference {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        uid: impl Into<String>,
    ) -> Result<Self> {
        let inner = K8sOwnerReference {
            api_version: api_version.into(),
            kind: kind.into(),
            name: name.into(),
            uid: uid.into(),
            ..Default::default()
        };

        for (field, value) in [
            ("apiVersion", &inner.api_version),
            ("kind", &inner.kind),
            ("name", &inner.name),
            ("uid", &inner.uid),
        ] {
            if value.trim().is_empty() {
                return Err(GatewayError::MissingOwnerField(field));
            }
        }

        Ok(Self { inner })
    }

    pub fn api_version(&self) -> &str {
        &self.inner.api_version
    }

    pub fn kind(&self) -> &str {
        &self.inner.kind
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn uid(&self) -> &str {
        &self.inner.uid
    }

    /// The reference as it appears in `metadata.ownerReferences`.
    pub fn to_value(&self) -> Value {
        // A struct of strings always serializes.
        serde_json::to_value(&self.inner).unwrap_or_default()
    }

    /// Append this reference to `object.metadata.ownerReferences`.
    ///
    /// `metadata` and the list are created when absent. Existing entries are
    /// kept and never deduplicated. Returns `false`, leaving `object`
    /// untouched, when the object, its metadata or the list has an
    /// unexpected shape.
    pub fn append_to(&self, object: &mut Value) -> bool {
        let Some(root) = object.as_object_mut() else {
            return false;
        };

        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(metadata) = metadata.as_object_mut() else {
            return false;
        };

        let refs = metadata
            .entry("ownerReferences")
            .or_insert_with(|| Value::Array(Vec::new()));
        if refs.is_null() {
            *refs = Value::Array(Vec::new());
        }
        match refs.as_array_mut() {
            Some(list) => {
                list.push(self.to_value());
                true
            }
            None => false,
        }
    }
}
