//! Electrum server candidates and the built-in default list.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport used to reach a server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plain TCP.
    Plain,
    /// TLS.
    Encrypted,
}

/// One entry in the ranked server list.
///
/// Candidates are tried in ascending `rank` order on every (re)connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCandidate {
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub rank: u32,
}

impl ServerCandidate {
    pub fn new(host: impl Into<String>, port: u16, transport: Transport, rank: u32) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            rank,
        }
    }

    /// `host:port` form used for socket addresses and log fields.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.transport {
            Transport::Plain => "tcp",
            Transport::Encrypted => "ssl",
        };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)
    }
}

/// The built-in server list, used when no override is configured.
///
/// Plain-TCP endpoints rank ahead of their TLS counterparts so that a
/// fresh install connects without certificate negotiation; the TLS
/// entries remain as fallbacks.
pub fn hardcoded_servers() -> Vec<ServerCandidate> {
    vec![
        ServerCandidate::new("electrum1.bluewallet.io", 50001, Transport::Plain, 0),
        ServerCandidate::new("electrum2.bluewallet.io", 50001, Transport::Plain, 1),
        ServerCandidate::new("electrum3.bluewallet.io", 50001, Transport::Plain, 2),
        ServerCandidate::new("electrum1.bluewallet.io", 443, Transport::Encrypted, 3),
        ServerCandidate::new("electrum2.bluewallet.io", 443, Transport::Encrypted, 4),
        ServerCandidate::new("electrum3.bluewallet.io", 443, Transport::Encrypted, 5),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hardcoded_list_is_rank_ordered() {
        let servers = hardcoded_servers();
        assert_eq!(servers.len(), 6);
        for pair in servers.windows(2) {
            assert!(pair[0].rank < pair[1].rank);
        }
    }

    #[test]
    fn endpoint_and_display() {
        let s = ServerCandidate::new("example.org", 50002, Transport::Encrypted, 1);
        assert_eq!(s.endpoint(), "example.org:50002");
        assert_eq!(s.to_string(), "ssl://example.org:50002");
    }

    #[test]
    fn transport_serde_lowercase() {
        let json = serde_json::to_string(&Transport::Encrypted).unwrap();
        assert_eq!(json, "\"encrypted\"");
        let back: Transport = serde_json::from_str("\"plain\"").unwrap();
        assert_eq!(back, Transport::Plain);
    }
}
