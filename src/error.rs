//! Error taxonomy for provisioning operations

use thiserror::Error;

/// Errors surfaced by the reconciler, the synchronizer and the backends
#[derive(Debug, Error)]
pub enum Error {
    /// Credential failed the format check or was rejected by the verifier
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// An ACL record already exists for this client
    #[error("ACL record already exists for client {client_id}")]
    Conflict { client_id: String },

    /// Cache or document store failure, propagated without retry
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Request carries identifiers that cannot be used as topic levels
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Invalid configuration (bad regex, invalid topic template, ...)
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn invalid_credential(reason: impl Into<String>) -> Self {
        Self::InvalidCredential(reason.into())
    }

    pub fn store(reason: impl std::fmt::Display) -> Self {
        Self::StoreUnavailable(reason.to_string())
    }

    /// `Conflict` means "already provisioned" and is not fatal to callers
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
