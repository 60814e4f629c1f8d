//! Crate-wide error taxonomy.
//!
//! Most variants are peer-local: they cause a frame to be dropped or a peer
//! to be disconnected, and never propagate past the session/network layer.
//! Only [`BmError::Repository`] and [`BmError::FatalConfig`] are meant to
//! surface to a host application.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BmError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("proof of work invalid")]
    PowInvalid,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("duplicate object")]
    Duplicate,

    #[error("payload exceeds maximum size")]
    Oversize,

    #[error("timeout")]
    Timeout,

    #[error("repository error: {0}")]
    Repository(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BmResult<T> = Result<T, BmError>;

impl BmError {
    /// Whether this error should disconnect the peer it was raised on, per
    /// the policy table in the error handling design.
    pub fn disconnects_peer(&self) -> bool {
        matches!(
            self,
            BmError::ProtocolViolation(_) | BmError::Oversize | BmError::Timeout
        )
    }

    /// Errors that must never be re-gossiped once raised during object
    /// acceptance (PoW/signature failures, or an already-known object).
    pub fn suppresses_propagation(&self) -> bool {
        matches!(
            self,
            BmError::PowInvalid | BmError::SignatureInvalid | BmError::Duplicate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violation_disconnects() {
        assert!(BmError::ProtocolViolation("bad nonce".into()).disconnects_peer());
        assert!(!BmError::Duplicate.disconnects_peer());
    }

    #[test]
    fn pow_invalid_suppresses_propagation() {
        assert!(BmError::PowInvalid.suppresses_propagation());
        assert!(!BmError::Timeout.suppresses_propagation());
    }
}
