use thiserror::Error;

#[derive(Debug, Error)]
pub enum BumpError {
    #[error("requested rate {requested} sat/vB must exceed the {min} sat/vB floor")]
    FeeRateTooLow { requested: u64, min: u64 },

    #[error("operation not valid in the {0} stage")]
    WrongStage(&'static str),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("no usable connection for broadcast")]
    NotConnected,

    #[error("broadcast failed: {0}")]
    BroadcastFailed(String),
}
