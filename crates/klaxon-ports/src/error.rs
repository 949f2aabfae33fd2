use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("not found")]
    NotFound,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("connection error: {0}")]
    Connection(String),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("channel unavailable")]
    ChannelUnavailable,
    #[error("rate limited")]
    RateLimited,
    #[error("invalid target")]
    InvalidTarget,
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
