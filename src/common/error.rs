//! Common Error Types for the bridge backend
//!
//! Every layer has its own error enum; they all converge on [`BridgeError`],
//! which carries the stable code returned to API callers.

use thiserror::Error;

use crate::claimtx::chain::ChainError;
use crate::claimtx::proof::ProofError;
use crate::storage::StorageError;

/// Why a claim command was rejected before anything was written
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("deposit is not ready for claim")]
    NotReady,

    #[error("deposit has already been claimed")]
    AlreadyClaimed,

    #[error("a claim transaction is already in flight for this deposit")]
    ClaimInFlight,

    #[error("only L1 -> L2 claims are supported")]
    UnsupportedDirection,

    #[error("invalid claim proof: {0}")]
    InvalidProof(String),
}

impl Precondition {
    pub fn error_code(&self) -> &'static str {
        match self {
            Precondition::NotReady => "NOT_READY",
            Precondition::AlreadyClaimed => "ALREADY_CLAIMED",
            Precondition::ClaimInFlight => "CLAIM_IN_FLIGHT",
            Precondition::UnsupportedDirection => "UNSUPPORTED_DIRECTION",
            Precondition::InvalidProof(_) => "INVALID_PROOF",
        }
    }
}

/// Root error type for the bridge backend
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] super::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] super::logging::LoggingError),

    /// Requested record is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Command rejected, nothing was written
    #[error("precondition failed: {0}")]
    PreconditionFailed(#[from] Precondition),

    /// RPC timeout, connection reset, store deadline exceeded
    #[error("transient error: {0}")]
    Transient(String),

    /// A stored row could not be decoded
    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    /// Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Create a not-found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::Transient(_) | BridgeError::Io(_))
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            BridgeError::Config(_) => "CONFIG_ERROR",
            BridgeError::Logging(_) => "LOGGING_ERROR",
            BridgeError::NotFound(_) => "NOT_FOUND",
            BridgeError::PreconditionFailed(p) => p.error_code(),
            BridgeError::Transient(_) => "SERVICE_UNAVAILABLE",
            BridgeError::DataIntegrity(_) | BridgeError::Internal(_) | BridgeError::Io(_) => {
                "INTERNAL_ERROR"
            }
        }
    }

    /// Message that is safe to hand to API callers
    pub fn public_message(&self) -> String {
        match self {
            BridgeError::NotFound(what) => format!("not found: {}", what),
            BridgeError::PreconditionFailed(p) => p.to_string(),
            BridgeError::Transient(_) => "service temporarily unavailable".to_string(),
            _ => "internal error".to_string(),
        }
    }
}

impl From<StorageError> for BridgeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => BridgeError::NotFound(what),
            StorageError::InvalidData(msg) => BridgeError::DataIntegrity(msg),
            StorageError::Duplicate(msg) => BridgeError::Internal(format!("duplicate: {}", msg)),
            e @ (StorageError::Connection(_)
            | StorageError::Database(_)
            | StorageError::Timeout(_)) => BridgeError::Transient(e.to_string()),
        }
    }
}

impl From<ChainError> for BridgeError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::InvalidResponse(msg) => BridgeError::DataIntegrity(msg),
            other => BridgeError::Transient(other.to_string()),
        }
    }
}

impl From<ProofError> for BridgeError {
    fn from(err: ProofError) -> Self {
        match err {
            ProofError::Malformed(msg) => Precondition::InvalidProof(msg).into(),
            ProofError::NotFound(what) => BridgeError::NotFound(what),
            other => BridgeError::Transient(other.to_string()),
        }
    }
}

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_codes() {
        let err: BridgeError = Precondition::NotReady.into();
        assert_eq!(err.error_code(), "NOT_READY");

        let err: BridgeError = Precondition::AlreadyClaimed.into();
        assert_eq!(err.error_code(), "ALREADY_CLAIMED");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_errors_map_to_taxonomy() {
        let err: BridgeError = StorageError::Timeout("get_deposit".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "SERVICE_UNAVAILABLE");

        let err: BridgeError = StorageError::InvalidData("bad amount".into()).into();
        assert!(matches!(err, BridgeError::DataIntegrity(_)));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_public_message_hides_internals() {
        let err = BridgeError::internal("sqlite: disk I/O error at page 42");
        assert_eq!(err.public_message(), "internal error");

        let err = BridgeError::transient("connection reset by 10.0.0.7");
        assert!(!err.public_message().contains("10.0.0.7"));
    }

    #[test]
    fn test_malformed_proof_is_precondition() {
        let err: BridgeError = ProofError::Malformed("17 siblings".into()).into();
        assert_eq!(err.error_code(), "INVALID_PROOF");
    }
}
