//! Error types for the signing engine.
//!
//! Every failure is categorized by [`ErrorKind`] so callers can decide what
//! to show a user: precondition failures are shown verbatim, crypto failures
//! collapse to a generic message (details go to the log), document-format
//! failures carry actionable guidance.

use crate::model::SessionStatus;
use crate::pdf::PdfError;
use std::fmt;
use uuid::Uuid;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a certificate exists but cannot sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusableReason {
    /// Certificate has been revoked
    Revoked,
    /// Certificate has been deactivated by its owner or an administrator
    Inactive,
    /// Validity window has not started
    NotYetValid,
    /// Validity window has ended
    Expired,
}

impl fmt::Display for UnusableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnusableReason::Revoked => "revoked",
            UnusableReason::Inactive => "inactive",
            UnusableReason::NotYetValid => "not yet valid",
            UnusableReason::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Broad category of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A business rule refused the request
    Precondition,
    /// Key generation, certificate signing, key decryption or signing failed
    CryptoOperation,
    /// The uploaded document cannot be processed
    DocumentFormat,
    /// Stored records contradict each other
    IntegrityAnomaly,
    /// Blob or record persistence failed
    Storage,
    /// Malformed request
    InvalidRequest,
}

/// Errors produced by the signing engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No certificate authority exists for the tenant
    #[error("No certificate authority is registered for this organization")]
    NoCaRegistered,

    /// A non-revoked certificate authority already exists
    #[error("A certificate authority already exists for this organization")]
    CaAlreadyExists,

    /// The certificate does not exist or belongs to someone else
    #[error("Certificate {0} was not found")]
    CertificateNotFound(Uuid),

    /// The certificate exists but is outside its lifecycle
    #[error("Certificate {id} cannot be used for signing: it is {reason}")]
    CertificateNotUsable {
        /// Certificate id
        id: Uuid,
        /// Lifecycle reason
        reason: UnusableReason,
    },

    /// The signature slot is already signed
    #[error("This signature has already been applied")]
    AlreadySigned(Uuid),

    /// The signature slot was rejected
    #[error("This signature was rejected and can no longer be applied")]
    SignatureRejected(Uuid),

    /// The caller is not the signer assigned to the slot
    #[error("You are not the assigned signer for this signature")]
    UnauthorizedSigner(Uuid),

    /// Sequential mode: an earlier step is still pending
    #[error("It is not your turn to sign yet (step {step}, waiting on step {current})")]
    OutOfTurn {
        /// Step order of the attempted signature
        step: u32,
        /// Step currently expected
        current: u32,
    },

    /// The session is no longer accepting signatures
    #[error("Signing session {id} is {status}")]
    SessionClosed {
        /// Session id
        id: Uuid,
        /// Current session status
        status: SessionStatus,
    },

    /// RSA key generation failed
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Building or signing a certificate failed
    #[error("Certificate signing failed: {0}")]
    CertificateSigning(String),

    /// The CA certificate or key cannot be loaded
    #[error("Invalid certificate authority material: {0}")]
    InvalidCa(String),

    /// A private key cannot be decrypted or parsed
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Signing a document digest failed
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// The PDF is password protected beyond the blank user password
    #[error("The document is password protected")]
    ProtectedDocument,

    /// The PDF cannot be parsed or rewritten
    #[error("The document could not be processed: {0}")]
    UnreadableDocument(#[source] PdfError),

    /// The signature block does not fit on the last page
    #[error("No room for signature block {slot} on the last page")]
    NoRoomForSignature {
        /// Zero-based block slot that did not fit
        slot: usize,
    },

    /// Stored records contradict each other
    #[error("Integrity anomaly on document {document_id}: {detail}")]
    IntegrityAnomaly {
        /// Affected document
        document_id: Uuid,
        /// What was inconsistent
        detail: String,
    },

    /// A referenced record is missing
    #[error("{entity} {id} not found")]
    NotFound {
        /// Record type
        entity: &'static str,
        /// Identifier
        id: String,
    },

    /// Blob store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoCaRegistered
            | Error::CaAlreadyExists
            | Error::CertificateNotFound(_)
            | Error::CertificateNotUsable { .. }
            | Error::AlreadySigned(_)
            | Error::SignatureRejected(_)
            | Error::UnauthorizedSigner(_)
            | Error::OutOfTurn { .. }
            | Error::SessionClosed { .. } => ErrorKind::Precondition,
            Error::KeyGeneration(_)
            | Error::CertificateSigning(_)
            | Error::InvalidCa(_)
            | Error::InvalidKey(_)
            | Error::SigningFailed(_) => ErrorKind::CryptoOperation,
            Error::ProtectedDocument
            | Error::UnreadableDocument(_)
            | Error::NoRoomForSignature { .. } => ErrorKind::DocumentFormat,
            Error::IntegrityAnomaly { .. } => ErrorKind::IntegrityAnomaly,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Storage,
            Error::NotFound { .. } | Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Precondition | ErrorKind::InvalidRequest => self.to_string(),
            ErrorKind::CryptoOperation => {
                "Signing failed, check your credentials and try again".to_string()
            },
            ErrorKind::DocumentFormat => match self {
                Error::ProtectedDocument => {
                    "The document is password protected. Remove the protection and retry"
                        .to_string()
                },
                Error::NoRoomForSignature { .. } => {
                    "The last page has no room left for another signature block".to_string()
                },
                _ => "The document could not be read. Upload a valid PDF file".to_string(),
            },
            ErrorKind::IntegrityAnomaly => {
                "The document records are inconsistent. Contact your administrator".to_string()
            },
            ErrorKind::Storage => "A storage error occurred. Try again later".to_string(),
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_messages_are_verbatim() {
        let err = Error::OutOfTurn { step: 2, current: 1 };
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(err.user_message(), err.to_string());
    }

    #[test]
    fn test_crypto_details_are_hidden() {
        let err = Error::InvalidKey("pkcs8 decryption error".to_string());
        assert_eq!(err.kind(), ErrorKind::CryptoOperation);
        assert!(!err.user_message().contains("pkcs8"));
    }

    #[test]
    fn test_protected_document_guidance() {
        let msg = Error::ProtectedDocument.user_message();
        assert!(msg.contains("Remove the protection"));
    }

    #[test]
    fn test_unusable_reason_display() {
        let err = Error::CertificateNotUsable {
            id: Uuid::nil(),
            reason: UnusableReason::Expired,
        };
        assert!(err.to_string().ends_with("expired"));
    }
}
