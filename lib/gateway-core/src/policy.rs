//! Regex admission policy for proxied requests

use crate::{GatewayError, Result};
use regex::Regex;

/// Paths accepted by default: everything.
pub const DEFAULT_PATH_ACCEPT_RE: &str = "^.*";
/// Paths rejected by default: interactive container sessions.
pub const DEFAULT_PATH_REJECT_RE: &str = "^/api/.*/pods/.*/exec,^/api/.*/pods/.*/attach";
/// Hosts accepted by default: loopback names only.
pub const DEFAULT_HOST_ACCEPT_RE: &str = r"^localhost$,^127\.0\.0\.1$,^\[::1\]$";
/// Methods rejected by default: none.
pub const DEFAULT_METHOD_REJECT_RE: &str = "";

/// Ordered list of compiled patterns. Matches when any pattern matches.
#[derive(Clone, Debug, Default)]
pub struct RegexRule {
    patterns: Vec<Regex>,
}

impl RegexRule {
    /// Compile a comma-separated list of patterns. Empty segments are
    /// skipped, so an empty string yields an empty rule.
    ///
    /// A trailing comma therefore does not add a match-everything pattern:
    /// `POST,` rejects only `POST`. This is intended.
    pub fn parse(patterns: &str) -> Result<Self> {
        let patterns = patterns
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).map_err(|source| GatewayError::InvalidPattern {
                    pattern: p.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, subject: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(subject))
    }
}

/// Accept/reject rules applied to every request before it is proxied.
///
/// Reject rules always win over accept rules, and an empty accept rule
/// places no restriction on its subject.
#[derive(Clone, Debug, Default)]
pub struct FilterPolicy {
    pub accept_paths: RegexRule,
    pub reject_paths: RegexRule,
    pub accept_hosts: RegexRule,
    pub reject_methods: RegexRule,
}

impl FilterPolicy {
    /// Compile the four rule sets from their comma-separated flag values.
    pub fn from_patterns(
        accept_paths: &str,
        reject_paths: &str,
        accept_hosts: &str,
        reject_methods: &str,
    ) -> Result<Self> {
        Ok(Self {
            accept_paths: RegexRule::parse(accept_paths)?,
            reject_paths: RegexRule::parse(reject_paths)?,
            accept_hosts: RegexRule::parse(accept_hosts)?,
            reject_methods: RegexRule::parse(reject_methods)?,
        })
    }

    /// Unrestricted paths except exec and attach, loopback hosts only.
    pub fn with_defaults() -> Result<Self> {
        Self::from_patterns(
            DEFAULT_PATH_ACCEPT_RE,
            DEFAULT_PATH_REJECT_RE,
            DEFAULT_HOST_ACCEPT_RE,
            DEFAULT_METHOD_REJECT_RE,
        )
    }

    pub fn accepts(&self, method: &str, host: &str, path: &str) -> bool {
        if self.reject_methods.matches(method) {
            return false;
        }
        if self.reject_paths.matches(path) {
            return false;
        }
        if !self.accept_paths.is_empty() && !self.accept_paths.matches(path) {
            return false;
        }
        if !self.accept_hosts.is_empty() && !self.accept_hosts.matches(host) {
            return false;
        }
        true
    }
}

/// Strip the port from a Host header value.
///
/// Bracketed IPv6 literals keep their brackets so that `[::1]:8001`
/// becomes `[::1]`. A bare IPv6 address without a port is returned as is.
pub fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}
