//! Version negotiation performed on every fresh connection.
//!
//! A connection attempt counts as successful only once the server has
//! answered `server.version` with a non-empty reply.

use serde_json::{json, Value};

use crate::methods::SERVER_VERSION;
use crate::{ProtocolError, RpcRequest};

/// Client name advertised during the handshake.
pub const CLIENT_NAME: &str = "ember";

/// Electrum protocol version we speak.
pub const PROTOCOL_VERSION: &str = "1.4";

/// Server identity learned from the handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerVersion {
    /// Server software banner, e.g. `"ElectrumX 1.16.0"`.
    pub software: String,
    /// Negotiated protocol version.
    pub protocol: String,
}

/// Build the `server.version` request sent as the first frame.
pub fn handshake_request(id: u64) -> RpcRequest {
    RpcRequest::new(
        id,
        SERVER_VERSION,
        vec![json!(CLIENT_NAME), json!(PROTOCOL_VERSION)],
    )
}

/// Parse the handshake reply: `["<software>", "<protocol>"]`.
pub fn parse_server_version(result: &Value) -> Result<ServerVersion, ProtocolError> {
    let parts = result
        .as_array()
        .ok_or_else(|| ProtocolError::UnexpectedShape("server.version reply not a list".into()))?;

    let software = parts
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| ProtocolError::UnexpectedShape("missing server software banner".into()))?
        .to_string();

    let protocol = parts
        .get(1)
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION)
        .to_string();

    Ok(ServerVersion { software, protocol })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_request_carries_client_identity() {
        let req = handshake_request(0);
        assert_eq!(req.method, SERVER_VERSION);
        assert_eq!(req.params[0], "ember");
        assert_eq!(req.params[1], "1.4");
    }

    #[test]
    fn parses_version_reply() {
        let reply = serde_json::json!(["ElectrumX 1.16.0", "1.4"]);
        let version = parse_server_version(&reply).unwrap();
        assert_eq!(version.software, "ElectrumX 1.16.0");
        assert_eq!(version.protocol, "1.4");
    }

    #[test]
    fn missing_protocol_defaults() {
        let reply = serde_json::json!(["Fulcrum 1.9.0"]);
        let version = parse_server_version(&reply).unwrap();
        assert_eq!(version.protocol, PROTOCOL_VERSION);
    }

    #[test]
    fn rejects_non_list_reply() {
        let reply = serde_json::json!({"version": "1.4"});
        assert!(parse_server_version(&reply).is_err());
    }
}
