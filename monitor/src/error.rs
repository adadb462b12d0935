use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    /// An error surfaced by the data source. The message text is carried
    /// verbatim; classification matches on its exact substrings.
    #[error("{0}")]
    Source(String),

    /// The manual-refresh deadline elapsed. The message deliberately
    /// contains "timed out" so classification treats it as a busy server.
    #[error("Request timed out")]
    Timeout,

    /// Monitoring has been switched off.
    #[error("monitoring disabled")]
    Disabled,

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}
