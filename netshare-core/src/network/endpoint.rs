//! Hub addresses as typed `host:port` pairs.
//!
//! IPv6 literals are written and parsed in bracketed form (`[::1]:8080`).

use std::str::FromStr;

use crate::error::NetshareError;

/// A `host:port` pair naming a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = NetshareError;

    /// Parses `host:port`, `ip:port` or `[v6]:port`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| NetshareError::InvalidEndpoint(format!("missing port in {s:?}")))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(NetshareError::InvalidEndpoint(format!("missing host in {s:?}")));
        }

        let port = port
            .parse::<u16>()
            .map_err(|e| NetshareError::InvalidEndpoint(format!("bad port in {s:?}: {e}")))?;

        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
