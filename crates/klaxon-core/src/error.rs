use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("alert is already resolved")]
    AlertAlreadyResolved,
    #[error("suppressed alerts cannot change state")]
    AlertSuppressed,
    #[error("invalid override period")]
    InvalidOverridePeriod,
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("policy requires at least one level")]
    PolicyRequiresLevel,
    #[error("escalation levels must be unique and contiguous, found {0:?}")]
    NonContiguousLevels(Vec<u32>),
    #[error("level {0} requires at least one target")]
    LevelRequiresTarget(u32),
    #[error("rotation requires at least one member")]
    RotationRequiresMember,
    #[error("invalid regex in condition: {0}")]
    InvalidPattern(String),
    #[error("unknown {kind}: {value}")]
    UnknownVariant { kind: &'static str, value: String },
}
