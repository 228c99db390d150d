//! Errors surfaced by the Pregel entry points
//!
//! Configuration and authorization problems are reported synchronously by
//! `pregel_start`. Worker side failures never cross the network as errors;
//! they arrive as failed reports and end up here only as `WorkerFailed`.

use shared_types::{ExecutionNumber, PregelErrorBody};

use crate::storage::StorageError;

#[derive(Debug, thiserror::Error, Clone)]
pub enum PregelError {
    /// No algorithm registered under this name
    #[error("algorithm not found: {0}")]
    UnknownAlgorithm(String),
    /// Vertex or edge collection does not exist
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    /// Collections of one execution are not sharded alike
    #[error("sharding mismatch: {0}")]
    ShardingMismatch(String),
    /// Caller lacks access to a collection
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Malformed request or algorithm parameters
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No execution registered under this number
    #[error("invalid execution number: {0}")]
    InvalidExecutionNumber(ExecutionNumber),
    /// Results requested before the execution converged
    #[error("execution {0} is not finished")]
    NotFinished(ExecutionNumber),
    /// A worker failed or could not be reached
    #[error("worker failed: {0}")]
    WorkerFailed(String),
    /// The conductor actor is gone
    #[error("conductor unavailable: {0}")]
    ConductorUnavailable(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl PregelError {
    pub fn code(&self) -> &'static str {
        match self {
            PregelError::UnknownAlgorithm(_) => "UNKNOWN_ALGORITHM",
            PregelError::CollectionNotFound(_) => "COLLECTION_NOT_FOUND",
            PregelError::ShardingMismatch(_) => "SHARDING_MISMATCH",
            PregelError::Forbidden(_) => "FORBIDDEN",
            PregelError::InvalidRequest(_) => "INVALID_REQUEST",
            PregelError::InvalidExecutionNumber(_) => "INVALID_EXECUTION_NUMBER",
            PregelError::NotFinished(_) => "NOT_FINISHED",
            PregelError::WorkerFailed(_) => "WORKER_FAILED",
            PregelError::ConductorUnavailable(_) => "CONDUCTOR_UNAVAILABLE",
            PregelError::Storage(_) => "STORAGE",
        }
    }
}

impl From<PregelError> for PregelErrorBody {
    fn from(err: PregelError) -> Self {
        PregelErrorBody {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
