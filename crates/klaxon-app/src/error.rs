use klaxon_core::error::DomainError;
use klaxon_ports::error::{ParseError, PortError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("port error: {0}")]
    Port(#[from] PortError),
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("{0} not found")]
    NotFound(&'static str),
}

impl From<AppError> for PortError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Port(e) => e,
            AppError::NotFound(_) => PortError::NotFound,
            AppError::Domain(e) => PortError::Invalid(e.to_string()),
            AppError::Parse(e) => PortError::Invalid(e.to_string()),
        }
    }
}
