use crate::notify::DispatchError;
use crate::records::RecordError;
use crate::store::StoreError;

/// Service level error taxonomy. Each class carries its own HTTP status so the
/// router never has to collapse failures into a catch-all 500.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("stored item is malformed: {0}")]
    Malformed(#[from] RecordError),
    #[error("notification dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

impl ServiceError {
    pub fn status_code(&self) -> i64 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::Unauthorized(_) => 401,
            ServiceError::Validation(_) => 400,
            ServiceError::Store(_) | ServiceError::Malformed(_) | ServiceError::Dispatch(_) => 502,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }
}
