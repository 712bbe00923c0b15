//! Domain error model.

use thiserror::Error;

use crate::status::AirdropStatus;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// lifecycle violations). Storage and transport concerns belong in `airdrop-infra`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed wallet address).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A stored status code does not map to a known status.
    #[error("unknown status code: {0}")]
    UnknownStatus(i16),

    /// A status change that the airdrop lifecycle does not allow.
    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: AirdropStatus,
        to: AirdropStatus,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
