// Allow some clippy lints that are too pedantic for this project
#![allow(clippy::too_many_arguments)]
#![allow(clippy::type_complexity)]
// Allow unused for tests
#![cfg_attr(test, allow(dead_code))]

//! # Signflow
//!
//! Document signing engine: an in-tenant certificate authority, per-user
//! signing certificates, multi-signer signing sessions over PDF documents
//! and tamper-evident verification by hash chaining.
//!
//! ## Components
//!
//! - [`pki`]: RSA keys, a self-signed root CA, CA-signed leaf certificates,
//!   signatures over SHA-256 digests
//! - [`certificates`]: CA and user certificate lifecycle over a blob store
//! - [`watermark`]: signature blocks with QR codes on the last PDF page
//! - [`session`]: sequential, parallel and hybrid signing sessions
//! - [`verification`]: classification of uploaded files by hash
//! - [`pdf`]: the PDF reader/writer the watermarker is built on
//!
//! ## Hash chain
//!
//! Each signature signs the SHA-256 of the document's current version and
//! produces a new stamped version:
//!
//! ```text
//! upload (original_hash) -> v1 (current_hash) -> v2 (current_hash) ...
//! ```
//!
//! Uploading the latest version to [`VerificationEngine`] lists its
//! signers; uploading the original reports it as unsigned.
//!
//! ## Quick Start
//!
//! ```ignore
//! use signflow::{EngineConfig, Signflow, SignerSpec, SigningMode, SignRequest,
//!                StaticDirectory, TenantContext, Upload};
//!
//! # fn main() -> signflow::Result<()> {
//! let directory = StaticDirectory::new()
//!     .with_signer("alice", "Alice Example", "alice@example.com");
//! let engine = Signflow::open_dir("data", TenantContext::new("acme", "tenant-secret")?,
//!                                 EngineConfig::default(), directory.clone())?;
//!
//! engine.certificates().create_ca("Acme", "Acme Root CA", None)?;
//! let alice = directory.lookup("alice").unwrap();
//! let cert = engine.certificates().issue_certificate(&alice, "default")?;
//!
//! let pdf = std::fs::read("contract.pdf")?;
//! let session = engine.sessions().create_session(
//!     "owner", Upload::pdf("contract.pdf", pdf), "Contract",
//!     SigningMode::Sequential, &[SignerSpec::new("alice")])?;
//! engine.sessions().sign(&SignRequest::new(session.signature_ids[0], cert.id, "alice"))?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Error handling
pub mod error;

// Configuration
pub mod config;

// PDF reading and rewriting
pub mod pdf;

// Records and persistence
pub mod model;
pub mod repository;
pub mod storage;

// Tenant and directory boundaries
pub mod context;
pub mod directory;

// Hashing
pub mod digest;

// Components
pub mod certificates;
pub mod pki;
pub mod session;
pub mod verification;
pub mod watermark;

mod engine;

// Re-exports
pub use certificates::{CertificateStore, SigningMaterial};
pub use config::{EngineConfig, VerificationLabels, WatermarkConfig};
pub use context::TenantContext;
pub use directory::{SignerDirectory, StaticDirectory};
pub use engine::Signflow;
pub use error::{Error, ErrorKind, Result, UnusableReason};
pub use model::{
    CertificateAuthority, Document, DocumentStatus, SessionStatus, Signature, SignatureStatus,
    Signer, SigningMode, SigningSession, UserCertificate,
};
pub use pki::{CertificateDetails, DistinguishedName, IssuedCertificate, PkiEngine};
pub use repository::{Repository, Tables};
pub use session::{
    PendingSignature, SessionProgress, SignOutcome, SignRequest, SignerSpec,
    SigningSessionEngine, Upload,
};
pub use storage::{BlobStore, FsBlobStore};
pub use verification::{
    SignatureCheck, VerificationEngine, VerificationResult, VerificationStatus, VerifiedSigner,
};
pub use watermark::{DocumentWatermarker, WatermarkRequest};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
