use thiserror::Error;

/// Errors surfaced by the replication controller's public and inter-DC
/// surfaces. Kinds match the contract in the component design docs one
/// for one -- no speculative variants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("key already exists: {0}")]
    AlreadyExists(String),

    #[error("replica not held here: {0}")]
    NoReplica(String),

    #[error("rpc to {dc} timed out after {millis}ms")]
    Timeout { dc: String, millis: u64 },

    #[error("no dcs available to satisfy the request")]
    NoDcs,

    #[error("verification predicate failed for {0}")]
    FailedVerification(String),

    #[error("storage backend error: {0}")]
    BackendError(String),
}

pub type Result<T> = std::result::Result<T, ControllerError>;
