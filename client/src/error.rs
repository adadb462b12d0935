use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to any server")]
    NotConnected,

    #[error("connection to {0} failed: {1}")]
    Transport(String, String),

    #[error("read timed out")]
    ReadTimeout,

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("{0}")]
    Rpc(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ember_protocol::ProtocolError),

    #[error("reply exceeds maximum size")]
    ReplyTooLarge,
}
