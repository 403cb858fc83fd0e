//! Error types for every enrollment stage
//!
//! Each stage owns a `thiserror` enum. [`EnrollError`] wraps them with the
//! originating [`Stage`] so callers can tell a retryable transport failure
//! from a fatal trust-path failure without string matching.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Position of a certificate inside the `[leaf, intermediate, root]` chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainPosition {
    Leaf,
    Intermediate,
    Root,
}

impl fmt::Display for ChainPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChainPosition::Leaf => "leaf",
            ChainPosition::Intermediate => "intermediate",
            ChainPosition::Root => "root",
        };
        f.write_str(name)
    }
}

/// Naming attribute errors raised while assembling an identity name
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("identity attribute `{attribute}` is empty")]
    EmptyAttribute { attribute: &'static str },

    #[error("identity attribute `{attribute}` contains the separator '.': {value:?}")]
    SeparatorInAttribute {
        attribute: &'static str,
        value: String,
    },

    #[error("invalid domain suffix {0:?}")]
    InvalidSuffix(String),
}

/// Key material generation errors
#[derive(Debug, Error)]
pub enum KeyGenError {
    #[error("requested key size {requested} bits is below the minimum of {minimum} bits")]
    WeakKeySize { requested: u32, minimum: u32 },

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// PKCS#10 request construction errors
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("signing failure: {0}")]
    SigningFailure(String),

    #[error("encoding failure: {0}")]
    EncodingFailure(String),

    #[error("certification request signature does not verify against its own public key")]
    SelfVerification,
}

/// Network-level failures talking to the CA
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no response from CA within {0:?}")]
    Timeout(Duration),

    #[error("connection to CA failed: {0}")]
    Connect(String),

    #[error("CA answered with HTTP status {0}")]
    Status(u16),

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Malformed or negative CA responses
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("CA response body is empty")]
    EmptyResponse,

    #[error("CA response is missing the `{0}` field")]
    MissingField(&'static str),

    #[error("CA rejected the request: {message}")]
    Rejected {
        message: String,
        code: Option<i32>,
    },

    #[error("CA response is not a signing response: {0}")]
    Malformed(String),
}

/// Enrollment Protocol Client errors
#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol failure: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("decoding failure in `{field}`: {reason}")]
    Decoding { field: &'static str, reason: String },

    #[error("failed to encode certification request: {0}")]
    RequestEncoding(String),
}

/// Trust-path failures. Never downgraded to warnings.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("{certificate} certificate issuer {actual:?} does not match expected issuer {expected:?}")]
    IssuerMismatch {
        certificate: ChainPosition,
        expected: String,
        actual: String,
    },

    #[error("{certificate} certificate signature is invalid")]
    SignatureInvalid { certificate: ChainPosition },

    #[error("{certificate} certificate expired (notAfter {not_after})")]
    Expired {
        certificate: ChainPosition,
        not_after: String,
    },

    #[error("{certificate} certificate is not yet valid (notBefore {not_before})")]
    NotYetValid {
        certificate: ChainPosition,
        not_before: String,
    },

    #[error("{certificate} certificate is malformed: {reason}")]
    MalformedCertificate {
        certificate: ChainPosition,
        reason: String,
    },

    #[error("{certificate} certificate was not issued for the enrolling key pair")]
    KeyMismatch { certificate: ChainPosition },
}

/// Credential and trust store persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create store: {0}")]
    StoreCreationFailure(String),

    #[error("failed to write store to {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load store from {path}: {reason}")]
    LoadFailure { path: PathBuf, reason: String },
}

/// Stage of the enrollment flow an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Identity,
    KeyGeneration,
    CsrBuild,
    Enrollment,
    ChainValidation,
    Persistence,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Identity => "identity",
            Stage::KeyGeneration => "key-generation",
            Stage::CsrBuild => "csr-build",
            Stage::Enrollment => "enrollment",
            Stage::ChainValidation => "chain-validation",
            Stage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// Error of a whole enrollment run, tagged with the failing stage
#[derive(Debug, Error)]
pub enum EnrollError {
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("key generation: {0}")]
    KeyGeneration(#[from] KeyGenError),

    #[error("csr: {0}")]
    Csr(#[from] CsrError),

    #[error("enrollment: {0}")]
    Enrollment(#[from] EnrollmentError),

    #[error("chain validation: {0}")]
    Chain(#[from] ChainError),

    #[error("persistence: {0}")]
    Store(#[from] StoreError),
}

impl EnrollError {
    pub fn stage(&self) -> Stage {
        match self {
            EnrollError::Identity(_) => Stage::Identity,
            EnrollError::KeyGeneration(_) => Stage::KeyGeneration,
            EnrollError::Csr(_) => Stage::CsrBuild,
            EnrollError::Enrollment(_) => Stage::Enrollment,
            EnrollError::Chain(_) => Stage::ChainValidation,
            EnrollError::Store(_) => Stage::Persistence,
        }
    }

    /// Whether an external retry policy may try the run again unchanged
    ///
    /// Transport failures are retryable. So are store creation/write failures,
    /// once the destination is writable again. Everything else needs a
    /// configuration or CA-side fix.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EnrollError::Enrollment(EnrollmentError::Transport(_))
                | EnrollError::Store(StoreError::WriteFailure { .. })
                | EnrollError::Store(StoreError::StoreCreationFailure(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_attached_to_each_variant() {
        let err: EnrollError = KeyGenError::WeakKeySize {
            requested: 1024,
            minimum: 2048,
        }
        .into();
        assert_eq!(err.stage(), Stage::KeyGeneration);

        let err: EnrollError = ChainError::SignatureInvalid {
            certificate: ChainPosition::Leaf,
        }
        .into();
        assert_eq!(err.stage(), Stage::ChainValidation);
        assert!(!err.is_retryable());

        let err: EnrollError = ChainError::KeyMismatch {
            certificate: ChainPosition::Leaf,
        }
        .into();
        assert_eq!(err.stage(), Stage::ChainValidation);
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "chain validation: leaf certificate was not issued for the enrolling key pair"
        );
    }

    #[test]
    fn test_transport_failures_are_retryable() {
        let err: EnrollError =
            EnrollmentError::from(TransportError::Timeout(Duration::from_secs(1))).into();
        assert_eq!(err.stage(), Stage::Enrollment);
        assert!(err.is_retryable());

        let err: EnrollError = EnrollmentError::from(ProtocolError::MissingField("rootCert")).into();
        assert!(!err.is_retryable());
    }
}
