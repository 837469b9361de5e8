// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Instance address.

use faststr::FastStr;
use std::fmt;
use std::net::SocketAddr;

/// `InstanceAddress` identifies one running instance, usually as `host:port`.
///
/// Produced by the registry, never mutated and compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceAddress(FastStr);

impl InstanceAddress {
    /// Creates an address from anything string-like.
    #[inline]
    pub fn new(address: impl Into<FastStr>) -> Self {
        Self(address.into())
    }

    /// Returns the address text.
    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Splits the address into host and port.
    ///
    /// An optional `scheme://` prefix is ignored and IPv6 hosts may be bracketed.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let s = self.as_str();
        let s = s.split_once("://").map_or(s, |(_, rest)| rest);
        let s = s.trim_end_matches('/');
        let (host, port) = s.rsplit_once(':')?;
        let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
        if host.is_empty() || host.contains('/') {
            return None;
        }
        let port = port.parse().ok()?;
        Some((host, port))
    }
}

impl fmt::Display for InstanceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SocketAddr> for InstanceAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(FastStr::new(addr.to_string()))
    }
}

impl From<&'static str> for InstanceAddress {
    fn from(addr: &'static str) -> Self {
        Self(FastStr::from_static_str(addr))
    }
}

impl From<String> for InstanceAddress {
    fn from(addr: String) -> Self {
        Self(FastStr::new(addr))
    }
}

#[cfg(test)]
mod tests {
    use super::InstanceAddress;

    #[test]
    fn test_host_port() {
        assert_eq!(InstanceAddress::from("10.0.0.1:8080").host_port(), Some(("10.0.0.1", 8080)));
        assert_eq!(InstanceAddress::from("http://tracker.local:80/").host_port(), Some(("tracker.local", 80)));
        assert_eq!(InstanceAddress::from("[::1]:9000").host_port(), Some(("::1", 9000)));
        assert_eq!(InstanceAddress::from("no-port").host_port(), None);
        assert_eq!(InstanceAddress::from(":80").host_port(), None);
        assert_eq!(InstanceAddress::from("host:notaport").host_port(), None);
    }

    #[test]
    fn test_from_socket_addr() {
        let addr: std::net::SocketAddr = "127.0.0.1:8000".parse().unwrap();
        assert_eq!(InstanceAddress::from(addr), InstanceAddress::from("127.0.0.1:8000"));
    }
}
