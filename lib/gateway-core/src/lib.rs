//! Core types for the API gateway
//!
//! This library provides:
//! - Regex admission policy evaluated for every proxied request
//! - Owner reference injected into created objects
//! - Immutable startup configuration and its error taxonomy

pub mod config;
pub mod error;
pub mod owner;
pub mod policy;

pub use config::{normalize_prefix, GatewayConfig, ListenTarget, DEFAULT_ADDRESS, DEFAULT_PORT};
pub use error::{GatewayError, Result};
pub use owner::OwnerReference;
pub use policy::{FilterPolicy, RegexRule};
