//! Verification of uploaded files against the signing records.
//!
//! Verification is a pure read path. An uploaded file is hashed and looked
//! up by hash: a match on a document's `current_hash` means the file is the
//! latest signed version, a match on `original_hash` means it is the
//! untouched upload. Anything else is unknown to the engine, which includes
//! intermediate versions superseded by a later signature.

use crate::digest::sha256_hex;
use crate::directory::SignerDirectory;
use crate::error::{Error, Result};
use crate::model::{DocumentStatus, SignatureStatus};
use crate::pki::{public_key_pem_from_certificate, PkiEngine};
use crate::repository::Repository;
use crate::storage::BlobStore;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of [`VerificationEngine::verify_uploaded_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VerificationStatus {
    /// Latest signed version of a document
    Verified,
    /// The original, unsigned upload
    OriginalUnsigned,
    /// Matches a document marked signed that has no signed signatures
    OrphanedInconsistent,
    /// Unknown file
    NotFound,
}

impl VerificationStatus {
    /// Fixed user-facing message.
    pub fn message(&self) -> &'static str {
        match self {
            VerificationStatus::Verified => {
                "This document is authentic. Its digital signatures are listed below."
            },
            VerificationStatus::OriginalUnsigned => {
                "This is the original upload of a document. It carries no digital signatures."
            },
            VerificationStatus::OrphanedInconsistent => {
                "This document is marked as signed but its signature records are missing. Contact your administrator."
            },
            VerificationStatus::NotFound => {
                "This document was not signed through this system or has been modified since signing."
            },
        }
    }
}

/// Summary of the matched document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    /// Document id
    pub id: Uuid,
    /// Title
    pub title: String,
    /// File name as uploaded; withheld for unsigned originals
    pub original_filename: Option<String>,
    /// Signing progress; withheld for unsigned originals
    pub status: Option<DocumentStatus>,
}

/// One verified signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifiedSigner {
    /// Display name
    pub name: String,
    /// E-mail address
    pub email: String,
    /// Role in the session
    pub role: String,
    /// Position in the signer list
    pub step_order: u32,
    /// Signing time
    pub signed_at: Option<DateTime<Utc>>,
    /// Serial of the signing certificate
    pub certificate_serial: Option<String>,
    /// Client address at signing time
    pub ip_address: Option<String>,
}

/// Result of verifying an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    /// Outcome
    pub status: VerificationStatus,
    /// Fixed user-facing message for `status`
    pub message: &'static str,
    /// SHA-256 of the uploaded bytes
    pub digest: String,
    /// Matched document
    pub document: Option<DocumentSummary>,
    /// Signers by step, for verified files only
    pub signers: Vec<VerifiedSigner>,
}

impl VerificationResult {
    fn new(status: VerificationStatus, digest: String) -> Self {
        Self {
            status,
            message: status.message(),
            digest,
            document: None,
            signers: Vec::new(),
        }
    }
}

/// Cryptographic re-check of one stored signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignatureCheck {
    /// Signature slot
    pub signature_id: Uuid,
    /// Serial of the signing certificate
    pub certificate_serial: String,
    /// Digest the signer signed
    pub signed_digest: String,
    /// The `.sig` file verifies against the certificate's public key
    pub signature_valid: bool,
    /// The signed digest is the hash of the preceding version
    pub chain_intact: bool,
}

impl SignatureCheck {
    /// Both checks passed.
    pub fn is_valid(&self) -> bool {
        self.signature_valid && self.chain_intact
    }
}

/// Read-only verification over the signing records.
pub struct VerificationEngine {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    pki: PkiEngine,
    directory: Arc<dyn SignerDirectory>,
}

impl std::fmt::Debug for VerificationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationEngine").finish_non_exhaustive()
    }
}

impl VerificationEngine {
    /// Create an engine.
    pub fn new(
        repo: Arc<Repository>,
        blobs: Arc<dyn BlobStore>,
        pki: PkiEngine,
        directory: Arc<dyn SignerDirectory>,
    ) -> Self {
        Self {
            repo,
            blobs,
            pki,
            directory,
        }
    }

    /// Classify an uploaded file.
    pub fn verify_uploaded_file(&self, bytes: &[u8]) -> Result<VerificationResult> {
        let digest = sha256_hex(bytes);
        let result = self.repo.read(|t| {
            if let Some(doc) = t.document_by_current_hash(&digest) {
                let signed = t.signed_signatures_for_document(doc.id);
                if !signed.is_empty() {
                    let mut result = VerificationResult::new(VerificationStatus::Verified, digest.clone());
                    result.document = Some(DocumentSummary {
                        id: doc.id,
                        title: doc.title.clone(),
                        original_filename: Some(doc.original_filename.clone()),
                        status: Some(doc.status),
                    });
                    result.signers = signed
                        .into_iter()
                        .map(|s| {
                            let cert = s.certificate_id.and_then(|id| t.certificates.get(&id));
                            let entry = self.directory.lookup(&s.user_id);
                            VerifiedSigner {
                                name: entry
                                    .as_ref()
                                    .map(|e| e.name.clone())
                                    .or_else(|| cert.map(|c| c.common_name.clone()))
                                    .unwrap_or_else(|| s.user_id.clone()),
                                email: entry
                                    .map(|e| e.email)
                                    .or_else(|| cert.map(|c| c.email.clone()))
                                    .unwrap_or_default(),
                                role: s.role.clone(),
                                step_order: s.step_order,
                                signed_at: s.signed_at,
                                certificate_serial: cert.map(|c| c.serial.clone()),
                                ip_address: s.ip_address.clone(),
                            }
                        })
                        .collect();
                    return result;
                }
            }

            if let Some(doc) = t.document_by_original_hash(&digest) {
                let mut result = VerificationResult::new(VerificationStatus::OriginalUnsigned, digest.clone());
                result.document = Some(DocumentSummary {
                    id: doc.id,
                    title: doc.title.clone(),
                    original_filename: None,
                    status: None,
                });
                return result;
            }

            if let Some(doc) = t.document_by_current_hash(&digest) {
                if doc.status == DocumentStatus::Signed {
                    log::error!(
                        "Document {} is marked signed with current hash {} but has no signed signatures",
                        doc.id,
                        digest
                    );
                    let mut result =
                        VerificationResult::new(VerificationStatus::OrphanedInconsistent, digest.clone());
                    result.document = Some(DocumentSummary {
                        id: doc.id,
                        title: doc.title.clone(),
                        original_filename: None,
                        status: Some(doc.status),
                    });
                    return result;
                }
            }

            VerificationResult::new(VerificationStatus::NotFound, digest.clone())
        })?;
        log::info!("Verification of {} -> {:?}", result.digest, result.status);
        Ok(result)
    }

    /// Re-check a stored signature against its certificate and the hash
    /// chain of its document.
    pub fn verify_signature_record(&self, signature_id: Uuid) -> Result<SignatureCheck> {
        let (signature, certificate, expected_digest) = self.repo.read(|t| -> Result<_> {
            let signature = t.signature(signature_id)?.clone();
            if signature.status != SignatureStatus::Signed {
                return Err(Error::InvalidRequest(format!("signature {} is not signed", signature_id)));
            }
            let certificate_id = signature.certificate_id.ok_or_else(|| Error::IntegrityAnomaly {
                document_id: signature.document_id,
                detail: format!("signed signature {} has no certificate", signature_id),
            })?;
            let certificate = t
                .certificates
                .get(&certificate_id)
                .cloned()
                .ok_or(Error::CertificateNotFound(certificate_id))?;
            let document = t.document(signature.document_id)?;

            // The signed digest must be the result of the previous signature,
            // or the original upload for the first one.
            let mut chain = t.signed_signatures_for_document(document.id);
            chain.sort_by_key(|s| s.signed_at);
            let position = chain.iter().position(|s| s.id == signature_id);
            let expected = match position {
                Some(0) | None => Some(document.original_hash.clone()),
                Some(i) => chain[i - 1].result_hash.clone(),
            };
            Ok((signature, certificate, expected))
        })??;

        let signature_path = signature.signature_file_path.as_deref().ok_or_else(|| {
            Error::IntegrityAnomaly {
                document_id: signature.document_id,
                detail: format!("signed signature {} has no signature file", signature_id),
            }
        })?;
        let raw = self.blobs.get(signature_path)?;
        let certificate_pem = String::from_utf8(self.blobs.get(&certificate.certificate_path)?)
            .map_err(|_| Error::Storage("certificate blob is not UTF-8".to_string()))?;
        let public_key_pem = public_key_pem_from_certificate(&certificate_pem)?;

        let signed_digest = signature.signed_digest.clone().unwrap_or_default();
        let signature_valid =
            self.pki
                .verify_signature(&signed_digest, &BASE64.encode(&raw), &public_key_pem);
        let chain_intact = expected_digest.as_deref() == Some(signed_digest.as_str());
        if !signature_valid || !chain_intact {
            log::error!(
                "Signature {} failed re-verification (signature valid: {}, chain intact: {})",
                signature_id,
                signature_valid,
                chain_intact
            );
        }
        Ok(SignatureCheck {
            signature_id,
            certificate_serial: certificate.serial,
            signed_digest,
            signature_valid,
            chain_intact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_distinct() {
        let all = [
            VerificationStatus::Verified,
            VerificationStatus::OriginalUnsigned,
            VerificationStatus::OrphanedInconsistent,
            VerificationStatus::NotFound,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a.message(), b.message());
            }
        }
    }

    #[test]
    fn test_result_carries_fixed_message() {
        let result = VerificationResult::new(VerificationStatus::NotFound, "00".to_string());
        assert_eq!(result.message, VerificationStatus::NotFound.message());
        assert!(result.document.is_none());
        assert!(result.signers.is_empty());
    }
}
