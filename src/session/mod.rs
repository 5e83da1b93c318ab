//! Multi-signer signing sessions.
//!
//! A session binds one document to an ordered list of signature slots.
//! Signing a slot signs the SHA-256 of the current version of the document,
//! stamps a signature block on a copy, and makes that copy the new current
//! version:
//!
//! ```text
//! original (H1) --sign #1--> v2 (H2) --sign #2--> v3 (H3) ...
//! ```
//!
//! `original_hash` stays H1 forever; `current_hash` follows the chain.
//!
//! All mutations of a session happen under its lock. The new files are
//! written to paths unique to the signature before the records commit, so a
//! failed sign leaves at most unreferenced files behind.

mod ordering;

pub use ordering::{
    strategy_for, HybridOrdering, OrderingStrategy, ParallelOrdering, SequentialOrdering,
};

use crate::certificates::CertificateStore;
use crate::context::TenantContext;
use crate::digest::sha256_hex;
use crate::directory::SignerDirectory;
use crate::error::{Error, Result};
use crate::model::{
    Document, DocumentMetadata, DocumentStatus, SessionStatus, Signature, SignatureStatus,
    SigningMode, SigningSession, UserCertificate, UserId,
};
use crate::repository::{Repository, Tables};
use crate::storage::BlobStore;
use crate::watermark::{DocumentWatermarker, PayloadSigner, WatermarkRequest};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// A file handed to [`SigningSessionEngine::create_session`].
#[derive(Debug, Clone)]
pub struct Upload {
    /// File name as uploaded
    pub filename: String,
    /// MIME type
    pub mime: String,
    /// File content
    pub content: Vec<u8>,
}

impl Upload {
    /// A PDF upload.
    pub fn pdf(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            mime: "application/pdf".to_string(),
            content,
        }
    }
}

/// One entry of a session's signer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSpec {
    /// Assigned signer
    pub user_id: UserId,
    /// Role label
    pub role: String,
    /// Whether completion waits for this signer
    pub is_required: bool,
}

impl SignerSpec {
    /// Required signer with role "signer".
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: "signer".to_string(),
            is_required: true,
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    /// Mark the signer optional.
    pub fn optional(mut self) -> Self {
        self.is_required = false;
        self
    }
}

/// Parameters of one signing action.
#[derive(Debug, Clone)]
pub struct SignRequest {
    /// Slot to sign
    pub signature_id: Uuid,
    /// Certificate the signer chose
    pub certificate_id: Uuid,
    /// Authenticated caller
    pub signer_user_id: UserId,
    /// Client address
    pub ip_address: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
}

impl SignRequest {
    /// Request without client details.
    pub fn new(signature_id: Uuid, certificate_id: Uuid, signer_user_id: impl Into<String>) -> Self {
        Self {
            signature_id,
            certificate_id,
            signer_user_id: signer_user_id.into(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Attach client details.
    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Result of a successful [`SigningSessionEngine::sign`].
#[derive(Debug, Clone)]
pub struct SignOutcome {
    /// The signed slot
    pub signature: Signature,
    /// Hash of the version that was signed
    pub signed_digest: String,
    /// Hash of the new current version
    pub current_hash: String,
    /// Blob path of the new current version
    pub signed_file_path: String,
    /// Document status after signing
    pub document_status: DocumentStatus,
    /// Session status after signing
    pub session_status: SessionStatus,
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionProgress {
    /// Session id
    pub session_id: Uuid,
    /// Document id
    pub document_id: Uuid,
    /// Ordering mode
    pub mode: SigningMode,
    /// Session lifecycle
    pub status: SessionStatus,
    /// Document signing progress
    pub document_status: DocumentStatus,
    /// Next step in sequential mode
    pub current_step_order: u32,
    /// Signed slots
    pub signed: usize,
    /// Required slots
    pub required: usize,
    /// Hash of the latest signed version
    pub current_hash: Option<String>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Slots by step
    pub signatures: Vec<Signature>,
}

/// A slot waiting for a user.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSignature {
    /// The slot
    pub signature: Signature,
    /// Title of its session
    pub session_title: String,
    /// Ordering mode of its session
    pub mode: SigningMode,
    /// Whether ordering allows signing right now
    pub can_sign_now: bool,
}

/// Drives signing sessions of one tenant.
pub struct SigningSessionEngine {
    ctx: TenantContext,
    blobs: Arc<dyn BlobStore>,
    repo: Arc<Repository>,
    certificates: Arc<CertificateStore>,
    watermarker: DocumentWatermarker,
    directory: Arc<dyn SignerDirectory>,
}

impl std::fmt::Debug for SigningSessionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningSessionEngine")
            .field("tenant", &self.ctx.tenant_id())
            .finish_non_exhaustive()
    }
}

fn session_closed(session: &SigningSession) -> Result<()> {
    if session.status != SessionStatus::InProgress {
        return Err(Error::SessionClosed {
            id: session.id,
            status: session.status,
        });
    }
    Ok(())
}

/// State read under the session lock.
struct Loaded {
    signature: Signature,
    session: SigningSession,
    document: Document,
}

fn load(t: &Tables, signature_id: Uuid) -> Result<Loaded> {
    let signature = t.signature(signature_id)?.clone();
    let session = t.session(signature.session_id)?.clone();
    let document = t.document(signature.document_id)?.clone();
    Ok(Loaded {
        signature,
        session,
        document,
    })
}

/// Recompute session and document state after a slot changed.
fn settle(t: &mut Tables, session_id: Uuid, now: DateTime<Utc>) -> Result<(SessionStatus, DocumentStatus)> {
    let session = t.session(session_id)?.clone();
    let strategy = strategy_for(session.mode);
    let (next, complete, any_signed) = {
        let sigs = t.session_signatures(session_id);
        (
            strategy.next_step(&session, &sigs),
            strategy.is_complete(&sigs),
            sigs.iter().any(|s| s.status == SignatureStatus::Signed),
        )
    };

    let session = t.session_mut(session_id)?;
    session.current_step_order = next;
    if complete && session.status == SessionStatus::InProgress {
        session.status = SessionStatus::Completed;
        session.completed_at = Some(now);
    }
    let session_status = session.status;
    let document_id = session.document_id;

    let document = t.document_mut(document_id)?;
    if session_status == SessionStatus::Completed {
        document.status = DocumentStatus::Signed;
    } else if any_signed {
        document.status = DocumentStatus::PartiallySigned;
    }
    document.updated_at = now;
    Ok((session_status, document.status))
}

impl SigningSessionEngine {
    /// Create an engine.
    pub fn new(
        ctx: TenantContext,
        blobs: Arc<dyn BlobStore>,
        repo: Arc<Repository>,
        certificates: Arc<CertificateStore>,
        watermarker: DocumentWatermarker,
        directory: Arc<dyn SignerDirectory>,
    ) -> Self {
        Self {
            ctx,
            blobs,
            repo,
            certificates,
            watermarker,
            directory,
        }
    }

    /// Store `upload` and open a session with one slot per signer, in order.
    pub fn create_session(
        &self,
        created_by: &str,
        upload: Upload,
        title: &str,
        mode: SigningMode,
        signers: &[SignerSpec],
    ) -> Result<SigningSession> {
        if signers.is_empty() {
            return Err(Error::InvalidRequest("a session needs at least one signer".to_string()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = signers.iter().find(|s| !seen.insert(s.user_id.as_str())) {
            return Err(Error::InvalidRequest(format!("signer '{}' is listed twice", dup.user_id)));
        }
        if upload.content.is_empty() {
            return Err(Error::InvalidRequest("the uploaded file is empty".to_string()));
        }
        match self.watermarker.ensure_room(&upload.content, signers.len()) {
            Err(Error::NoRoomForSignature { .. }) => {
                return Err(Error::InvalidRequest(format!(
                    "the last page has no room for {} signature blocks",
                    signers.len()
                )));
            },
            other => other?,
        }

        let now = Utc::now();
        let document_id = Uuid::new_v4();
        let session_id = Uuid::new_v4();
        let original_file_path = self
            .ctx
            .path(&format!("documents/{}/original.pdf", document_id));
        self.blobs.put(&original_file_path, &upload.content)?;

        let document = Document {
            id: document_id,
            owner_id: created_by.to_string(),
            title: title.to_string(),
            original_filename: upload.filename,
            original_file_path: original_file_path.clone(),
            original_hash: sha256_hex(&upload.content),
            current_hash: None,
            signed_file_path: None,
            status: DocumentStatus::Pending,
            metadata: DocumentMetadata {
                size: upload.content.len() as u64,
                mime: upload.mime,
            },
            created_at: now,
            updated_at: now,
        };
        let signatures: Vec<Signature> = signers
            .iter()
            .zip(1u32..)
            .map(|(spec, step_order)| Signature {
                id: Uuid::new_v4(),
                session_id,
                document_id,
                user_id: spec.user_id.clone(),
                certificate_id: None,
                role: spec.role.clone(),
                step_order,
                is_required: spec.is_required,
                status: SignatureStatus::Pending,
                signature_file_path: None,
                signed_digest: None,
                result_hash: None,
                signed_at: None,
                ip_address: None,
                user_agent: None,
                rejection_reason: None,
            })
            .collect();
        let session = SigningSession {
            id: session_id,
            document_id,
            title: title.to_string(),
            mode,
            status: SessionStatus::InProgress,
            created_by: created_by.to_string(),
            current_step_order: 1,
            signature_ids: signatures.iter().map(|s| s.id).collect(),
            created_at: now,
            completed_at: None,
        };

        let record = session.clone();
        let committed = self.repo.transaction(move |t| {
            t.documents.insert(document.id, document);
            for sig in signatures {
                t.signatures.insert(sig.id, sig);
            }
            t.sessions.insert(record.id, record);
            Ok(())
        });
        if let Err(e) = committed {
            let _ = self.blobs.delete(&original_file_path);
            return Err(e);
        }
        log::info!(
            "Created {:?} session {} on document {} with {} signer(s)",
            mode,
            session.id,
            document_id,
            signers.len()
        );
        Ok(session)
    }

    /// Apply one signature.
    pub fn sign(&self, request: &SignRequest) -> Result<SignOutcome> {
        let session_id = self
            .repo
            .read(|t| t.signature(request.signature_id).map(|s| s.session_id))??;
        let lock = self.repo.session_lock(session_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::Storage("session lock poisoned".to_string()))?;

        let Loaded {
            signature,
            session,
            document,
        } = self.repo.read(|t| load(t, request.signature_id))??;

        match signature.status {
            SignatureStatus::Signed => return Err(Error::AlreadySigned(signature.id)),
            SignatureStatus::Rejected => return Err(Error::SignatureRejected(signature.id)),
            SignatureStatus::Pending => {},
        }
        session_closed(&session)?;
        if signature.user_id != request.signer_user_id {
            log::warn!(
                "User {} tried to sign slot {} assigned to {}",
                request.signer_user_id,
                signature.id,
                signature.user_id
            );
            return Err(Error::UnauthorizedSigner(signature.id));
        }
        let certificate = self
            .certificates
            .find_usable_certificate(&request.signer_user_id, request.certificate_id)?;
        strategy_for(session.mode).check_turn(&session, &signature)?;

        let current_path = document.current_file_path().to_string();
        let current = self.blobs.get(&current_path)?;
        let digest = sha256_hex(&current);
        let expected = document.current_hash.as_deref().unwrap_or(&document.original_hash);
        if digest != expected {
            log::error!(
                "Stored file {} hashes to {} but the record says {}",
                current_path,
                digest,
                expected
            );
            return Err(Error::IntegrityAnomaly {
                document_id: document.id,
                detail: format!("current file {} does not match its recorded hash", current_path),
            });
        }

        let signature_b64 = self
            .certificates
            .load_signing_material(&certificate)
            .and_then(|m| {
                self.certificates
                    .pki()
                    .sign_data(&digest, &m.private_key_pem, &m.passphrase)
            })
            .map_err(|e| {
                log::error!("Signing slot {} with certificate {} failed: {}", signature.id, certificate.id, e);
                Error::SigningFailed(format!("certificate {}", certificate.id))
            })?;
        let raw = BASE64
            .decode(&signature_b64)
            .map_err(|e| Error::SigningFailed(format!("signature encoding: {}", e)))?;

        let signed_at = Utc::now();
        let signers = self.signers_to_date(&document, &certificate, signed_at)?;
        let stamp = WatermarkRequest::for_latest(
            document.title.clone(),
            document.original_filename.clone(),
            document.original_hash.clone(),
            signers,
        );
        let stamped = self.watermarker.stamp_bytes(&current, &stamp)?;
        let new_hash = sha256_hex(&stamped);

        let signature_file_path = self
            .ctx
            .path(&format!("signatures/{}/{}.sig", session.id, signature.id));
        let signed_file_path = self
            .ctx
            .path(&format!("documents/{}/signed/{}.pdf", document.id, signature.id));
        self.blobs.put(&signature_file_path, &raw)?;
        self.blobs.put(&signed_file_path, &stamped)?;

        let committed = self.repo.transaction(|t| {
            let sig = t.signature_mut(signature.id)?;
            if sig.status != SignatureStatus::Pending {
                return Err(Error::AlreadySigned(sig.id));
            }
            sig.status = SignatureStatus::Signed;
            sig.certificate_id = Some(certificate.id);
            sig.signature_file_path = Some(signature_file_path.clone());
            sig.signed_digest = Some(digest.clone());
            sig.result_hash = Some(new_hash.clone());
            sig.signed_at = Some(signed_at);
            sig.ip_address = request.ip_address.clone();
            sig.user_agent = request.user_agent.clone();
            let updated = sig.clone();

            let doc = t.document_mut(document.id)?;
            doc.current_hash = Some(new_hash.clone());
            doc.signed_file_path = Some(signed_file_path.clone());

            let (session_status, document_status) = settle(t, session.id, signed_at)?;
            Ok((updated, session_status, document_status))
        });
        let (updated, session_status, document_status) = match committed {
            Ok(v) => v,
            Err(e) => {
                let _ = self.blobs.delete(&signed_file_path);
                let _ = self.blobs.delete(&signature_file_path);
                return Err(e);
            },
        };

        log::info!(
            "Slot {} (step {}) of session {} signed by {}",
            updated.id,
            updated.step_order,
            session.id,
            updated.user_id
        );
        if session_status == SessionStatus::Completed {
            log::info!("Session {} completed; document {} is signed", session.id, document.id);
        }
        Ok(SignOutcome {
            signature: updated,
            signed_digest: digest,
            current_hash: new_hash,
            signed_file_path,
            document_status,
            session_status,
        })
    }

    /// Signers already stamped on the document, in signing order, followed
    /// by the signer about to sign.
    fn signers_to_date(
        &self,
        document: &Document,
        certificate: &UserCertificate,
        signed_at: DateTime<Utc>,
    ) -> Result<Vec<PayloadSigner>> {
        let mut previous = self.repo.read(|t| {
            t.signed_signatures_for_document(document.id)
                .into_iter()
                .map(|s| {
                    let cert = s.certificate_id.and_then(|id| t.certificates.get(&id));
                    (
                        s.signed_at,
                        s.user_id.clone(),
                        cert.map(|c| (c.common_name.clone(), c.email.clone(), c.serial.clone())),
                    )
                })
                .collect::<Vec<_>>()
        })?;
        previous.sort_by_key(|(at, _, _)| *at);

        let mut signers = Vec::with_capacity(previous.len() + 1);
        for (at, user_id, cert) in previous {
            let (cn, email, serial) = cert.unwrap_or_default();
            signers.push(self.payload_signer(&user_id, cn, email, serial, at.unwrap_or(signed_at)));
        }
        signers.push(self.payload_signer(
            &certificate.user_id,
            certificate.common_name.clone(),
            certificate.email.clone(),
            certificate.serial.clone(),
            signed_at,
        ));
        Ok(signers)
    }

    fn payload_signer(
        &self,
        user_id: &str,
        common_name: String,
        email: String,
        serial: String,
        signed_at: DateTime<Utc>,
    ) -> PayloadSigner {
        let entry = self.directory.lookup(user_id);
        PayloadSigner {
            name: entry.as_ref().map(|e| e.name.clone()).unwrap_or(common_name),
            email: entry.map(|e| e.email).unwrap_or(email),
            signed_at,
            certificate_serial: serial,
        }
    }

    /// Cancel a session. Only its creator may cancel.
    pub fn cancel_session(&self, session_id: Uuid, actor: &str) -> Result<SigningSession> {
        let lock = self.repo.session_lock(session_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::Storage("session lock poisoned".to_string()))?;
        let session = self.repo.transaction(|t| {
            let session = t.session_mut(session_id)?;
            session_closed(session)?;
            if session.created_by != actor {
                return Err(Error::InvalidRequest(format!(
                    "only the creator of session {} can cancel it",
                    session_id
                )));
            }
            session.status = SessionStatus::Cancelled;
            session.completed_at = Some(Utc::now());
            Ok(session.clone())
        })?;
        log::info!("Session {} cancelled by {}", session_id, actor);
        Ok(session)
    }

    /// Decline a slot. Declining a required slot cancels the session.
    pub fn reject(&self, signature_id: Uuid, user_id: &str, reason: &str) -> Result<SessionProgress> {
        let session_id = self
            .repo
            .read(|t| t.signature(signature_id).map(|s| s.session_id))??;
        let lock = self.repo.session_lock(session_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| Error::Storage("session lock poisoned".to_string()))?;

        self.repo.transaction(|t| {
            let Loaded {
                signature, session, ..
            } = load(t, signature_id)?;
            match signature.status {
                SignatureStatus::Signed => return Err(Error::AlreadySigned(signature.id)),
                SignatureStatus::Rejected => return Err(Error::SignatureRejected(signature.id)),
                SignatureStatus::Pending => {},
            }
            session_closed(&session)?;
            if signature.user_id != user_id {
                return Err(Error::UnauthorizedSigner(signature.id));
            }

            let now = Utc::now();
            let sig = t.signature_mut(signature_id)?;
            sig.status = SignatureStatus::Rejected;
            sig.rejection_reason = Some(reason.to_string());
            if signature.is_required {
                let session = t.session_mut(session_id)?;
                session.status = SessionStatus::Cancelled;
                session.completed_at = Some(now);
            } else {
                settle(t, session_id, now)?;
            }
            Ok(())
        })?;
        log::info!("Slot {} rejected by {}: {}", signature_id, user_id, reason);
        self.session_status(session_id)
    }

    /// Current state of a session.
    pub fn session_status(&self, session_id: Uuid) -> Result<SessionProgress> {
        self.repo.read(|t| -> Result<SessionProgress> {
            let session = t.session(session_id)?;
            let document = t.document(session.document_id)?;
            let signatures: Vec<Signature> =
                t.session_signatures(session_id).into_iter().cloned().collect();
            Ok(SessionProgress {
                session_id,
                document_id: document.id,
                mode: session.mode,
                status: session.status,
                document_status: document.status,
                current_step_order: session.current_step_order,
                signed: signatures
                    .iter()
                    .filter(|s| s.status == SignatureStatus::Signed)
                    .count(),
                required: signatures.iter().filter(|s| s.is_required).count(),
                current_hash: document.current_hash.clone(),
                completed_at: session.completed_at,
                signatures,
            })
        })?
    }

    /// Pending slots of `user_id` in open sessions.
    pub fn pending_for_user(&self, user_id: &str) -> Result<Vec<PendingSignature>> {
        self.repo.read(|t| {
            let mut out: Vec<PendingSignature> = t
                .signatures
                .values()
                .filter(|s| s.user_id == user_id && s.status == SignatureStatus::Pending)
                .filter_map(|s| {
                    let session = t.sessions.get(&s.session_id)?;
                    (session.status == SessionStatus::InProgress).then(|| PendingSignature {
                        signature: s.clone(),
                        session_title: session.title.clone(),
                        mode: session.mode,
                        can_sign_now: strategy_for(session.mode).check_turn(session, s).is_ok(),
                    })
                })
                .collect();
            out.sort_by_key(|p| (p.signature.session_id, p.signature.step_order));
            out
        })
    }

    /// The document of a session.
    pub fn document(&self, document_id: Uuid) -> Result<Document> {
        self.repo.read(|t| t.document(document_id).cloned())?
    }
}
