//! Service addresses: an optional server authority and a service path.

use std::fmt;
use std::str::FromStr;

use crate::RpcError;

/// URI scheme of absolute service addresses.
pub const SCHEME: &str = "skein";

/// Target of an outgoing request.
///
/// Either a bare path (`/greeter`) resolved against whatever connection the
/// request is invoked on, or an absolute address (`skein://host:4061/greeter`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    server: Option<String>,
    path: String,
}

impl ServiceAddress {
    /// Address of the service at `path`.
    pub fn new(path: &str) -> Self {
        Self {
            server: None,
            path: normalize_path(path),
        }
    }

    /// Attach the server authority (`host:port`).
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// The service path. Always starts with `/`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The server authority, for absolute addresses.
    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }
}

impl FromStr for ServiceAddress {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') {
            return Ok(Self::new(s));
        }
        let rest = s
            .strip_prefix(SCHEME)
            .and_then(|rest| rest.strip_prefix("://"))
            .ok_or_else(|| RpcError::InvalidAddress(s.to_string()))?;
        let (server, path) = match rest.find('/') {
            Some(index) => rest.split_at(index),
            None => (rest, "/"),
        };
        if server.is_empty() {
            return Err(RpcError::InvalidAddress(s.to_string()));
        }
        Ok(Self::new(path).with_server(server))
    }
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.server {
            Some(server) => write!(f, "{SCHEME}://{server}{}", self.path),
            None => f.write_str(&self.path),
        }
    }
}

/// Leading `/`, no trailing `/` except for the root.
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    let mut normalized = String::with_capacity(trimmed.len() + 1);
    normalized.push('/');
    normalized.push_str(trimmed);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute_address() {
        let address: ServiceAddress = "skein://localhost:4061/hello/world".parse().expect("parse");
        assert_eq!(address.server(), Some("localhost:4061"));
        assert_eq!(address.path(), "/hello/world");
        assert_eq!(address.to_string(), "skein://localhost:4061/hello/world");
    }

    #[test]
    fn test_parse_relative_and_invalid() {
        let address: ServiceAddress = "/greeter/".parse().expect("parse");
        assert_eq!(address.path(), "/greeter");
        assert!(address.server().is_none());

        let root: ServiceAddress = "skein://host".parse().expect("parse");
        assert_eq!(root.path(), "/");

        assert!("http://host/x".parse::<ServiceAddress>().is_err());
        assert!("skein:///x".parse::<ServiceAddress>().is_err());
        assert!("greeter".parse::<ServiceAddress>().is_err());
    }
}
