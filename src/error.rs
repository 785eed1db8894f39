use thiserror::Error;

/// Ошибки, видимые вызывающей стороне звонка
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("channel {0} does not exist")]
    ChannelNotFound(String),
    #[error("channel {0} has no published offer")]
    NoOfferPresent(String),
    #[error("transport negotiation failed: {0}")]
    TransportNegotiation(String),
    #[error("failed to publish {what}: {reason}")]
    StoreWrite { what: &'static str, reason: String },
    #[error("signaling store error: {0}")]
    Store(String),
    #[error("malformed {what} record: {reason}")]
    InvalidRecord { what: &'static str, reason: String },
    #[error("call already started on this coordinator")]
    AlreadyStarted,
}

impl From<TransportError> for CallError {
    fn from(err: TransportError) -> Self {
        CallError::TransportNegotiation(err.to_string())
    }
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        CallError::Store(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport rejected {op}: {reason}")]
    Rejected { op: &'static str, reason: String },
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    pub fn rejected(op: &'static str, reason: impl ToString) -> Self {
        TransportError::Rejected {
            op,
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("store write rejected: {0}")]
    WriteRejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("ICE server {0} has an empty url")]
    EmptyUrl(String),
    #[error("TURN server {0} requires username and credential")]
    MissingTurnCredentials(String),
}
