//! Persistent records of the signing engine.
//!
//! Records reference each other by id only; relations are resolved through
//! the [`crate::repository::Repository`].

use crate::error::UnusableReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a user in the host application.
pub type UserId = String;

/// The tenant's root certificate authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateAuthority {
    /// Record id
    pub id: Uuid,
    /// Organization (O) of the CA subject
    pub organization: String,
    /// Common name (CN) of the CA subject
    pub common_name: String,
    /// Certificate serial, hex as encoded in the certificate
    pub serial: String,
    /// Start of validity
    pub valid_from: DateTime<Utc>,
    /// End of validity
    pub valid_to: DateTime<Utc>,
    /// Blob path of the PEM certificate
    pub certificate_path: String,
    /// Blob path of the PEM private key
    pub private_key_path: String,
    /// Revoked CAs cannot issue certificates
    pub is_revoked: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A user's signing certificate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserCertificate {
    /// Record id
    pub id: Uuid,
    /// Issuing CA
    pub ca_id: Uuid,
    /// Owner
    pub user_id: UserId,
    /// Owner-chosen label distinguishing several certificates
    pub label: String,
    /// Subject common name
    pub common_name: String,
    /// Subject e-mail (also the RFC 822 SubjectAltName)
    pub email: String,
    /// Certificate serial, hex as encoded in the certificate
    pub serial: String,
    /// Start of validity
    pub valid_from: DateTime<Utc>,
    /// End of validity
    pub valid_to: DateTime<Utc>,
    /// Blob path of the PEM certificate
    pub certificate_path: String,
    /// Blob path of the encrypted PKCS#8 private key
    pub private_key_path: String,
    /// HMAC-derived working passphrase that unlocks the private key
    pub passphrase_hash: String,
    /// bcrypt commitment to the passphrase
    pub passphrase_bcrypt: String,
    /// Revoked certificates never sign again
    pub is_revoked: bool,
    /// Deactivated certificates are kept but not offered for signing
    pub is_active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl UserCertificate {
    /// Check whether the certificate may sign at `now`.
    pub fn usability(&self, now: DateTime<Utc>) -> Result<(), UnusableReason> {
        if self.is_revoked {
            Err(UnusableReason::Revoked)
        } else if !self.is_active {
            Err(UnusableReason::Inactive)
        } else if now < self.valid_from {
            Err(UnusableReason::NotYetValid)
        } else if now > self.valid_to {
            Err(UnusableReason::Expired)
        } else {
            Ok(())
        }
    }
}

/// Document signing progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentStatus {
    /// No signature applied yet
    Pending,
    /// Some signatures applied
    PartiallySigned,
    /// All required signatures applied
    Signed,
}

/// Facts about the uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Size of the original upload in bytes
    pub size: u64,
    /// MIME type of the upload
    pub mime: String,
}

/// A document under signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Record id
    pub id: Uuid,
    /// Uploader
    pub owner_id: UserId,
    /// Display title
    pub title: String,
    /// File name as uploaded
    pub original_filename: String,
    /// Blob path of the untouched upload
    pub original_file_path: String,
    /// SHA-256 of the upload; never changes
    pub original_hash: String,
    /// SHA-256 of the latest signed version
    pub current_hash: Option<String>,
    /// Blob path of the latest signed version
    pub signed_file_path: Option<String>,
    /// Signing progress
    pub status: DocumentStatus,
    /// Upload facts
    pub metadata: DocumentMetadata,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Blob path of the version the next signer signs.
    pub fn current_file_path(&self) -> &str {
        self.signed_file_path
            .as_deref()
            .unwrap_or(&self.original_file_path)
    }
}

/// How signers are ordered within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningMode {
    /// Strict step order
    Sequential,
    /// Any order
    Parallel,
    /// Groups of parallel steps in sequence (groups are not modeled yet)
    Hybrid,
}

impl std::str::FromStr for SigningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(SigningMode::Sequential),
            "parallel" => Ok(SigningMode::Parallel),
            "hybrid" => Ok(SigningMode::Hybrid),
            other => Err(format!("unknown signing mode '{}'", other)),
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Accepting signatures
    InProgress,
    /// Every required signature applied
    Completed,
    /// Cancelled before completion
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionStatus::InProgress => "in progress",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        })
    }
}

/// A signing session over one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningSession {
    /// Record id
    pub id: Uuid,
    /// Document under signature
    pub document_id: Uuid,
    /// Display title
    pub title: String,
    /// Ordering mode
    pub mode: SigningMode,
    /// Lifecycle
    pub status: SessionStatus,
    /// Creator
    pub created_by: UserId,
    /// Next step in sequential mode (1-based)
    pub current_step_order: u32,
    /// Signature slots in step order
    pub signature_ids: Vec<Uuid>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Completion (or cancellation) time
    pub completed_at: Option<DateTime<Utc>>,
}

/// State of one signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureStatus {
    /// Waiting for the signer
    Pending,
    /// Applied
    Signed,
    /// Declined by the signer
    Rejected,
}

/// One signer's slot in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    /// Record id
    pub id: Uuid,
    /// Owning session
    pub session_id: Uuid,
    /// Document under signature
    pub document_id: Uuid,
    /// Assigned signer
    pub user_id: UserId,
    /// Certificate used, once signed
    pub certificate_id: Option<Uuid>,
    /// Role of the signer (free text)
    pub role: String,
    /// 1-based position in the signer list
    pub step_order: u32,
    /// Whether completion waits for this slot
    pub is_required: bool,
    /// Slot state
    pub status: SignatureStatus,
    /// Blob path of the raw signature bytes
    pub signature_file_path: Option<String>,
    /// Digest that was signed (hash of the version presented to the signer)
    pub signed_digest: Option<String>,
    /// Hash of the version produced by this signature
    pub result_hash: Option<String>,
    /// When the slot was signed
    pub signed_at: Option<DateTime<Utc>>,
    /// Client address at signing time
    pub ip_address: Option<String>,
    /// Client user agent at signing time
    pub user_agent: Option<String>,
    /// Reason given when rejected
    pub rejection_reason: Option<String>,
}

/// Directory entry for a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    /// User id
    pub user_id: UserId,
    /// Display name
    pub name: String,
    /// E-mail address
    pub email: String,
}
