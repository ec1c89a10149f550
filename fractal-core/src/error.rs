//! Error taxonomy shared by every dataset placement (local, parallel,
//! remote) and by the RPC layer built on top of this crate.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::ObjectId;

#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum DatasetError {
    #[error("user code failed: {0}")]
    UserCodeFailure(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("shape mismatch: {left} children vs {right} children")]
    ShapeMismatch { left: usize, right: usize },

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("session busy: {0}")]
    SessionBusy(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl DatasetError {
    /// A short, stable tag for logging and for mapping onto RPC status
    /// codes one layer up. Not meant for display to end users.
    pub fn kind(&self) -> &'static str {
        match self {
            DatasetError::UserCodeFailure(_) => "user_code_failure",
            DatasetError::TypeMismatch { .. } => "type_mismatch",
            DatasetError::ShapeMismatch { .. } => "shape_mismatch",
            DatasetError::ObjectNotFound(_) => "object_not_found",
            DatasetError::SessionBusy(_) => "session_busy",
            DatasetError::TransportError(_) => "transport_error",
            DatasetError::Cancelled => "cancelled",
            DatasetError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, DatasetError>;
