//! One tenant's signing engine with all components wired together.

use crate::certificates::CertificateStore;
use crate::config::EngineConfig;
use crate::context::TenantContext;
use crate::directory::SignerDirectory;
use crate::error::Result;
use crate::pki::PkiEngine;
use crate::repository::Repository;
use crate::session::SigningSessionEngine;
use crate::storage::{BlobStore, FsBlobStore};
use crate::verification::VerificationEngine;
use crate::watermark::DocumentWatermarker;
use std::path::Path;
use std::sync::Arc;

/// Certificate store, session engine and verifier sharing one record store
/// and one blob store.
///
/// ```ignore
/// use signflow::{EngineConfig, Signflow, StaticDirectory, TenantContext};
///
/// let directory = StaticDirectory::new().with_signer("alice", "Alice", "alice@example.com");
/// let engine = Signflow::open_dir("data", TenantContext::new("acme", "secret")?,
///                                 EngineConfig::default(), directory)?;
/// engine.certificates().create_ca("Acme", "Acme Root CA", None)?;
/// ```
pub struct Signflow {
    repo: Arc<Repository>,
    blobs: Arc<dyn BlobStore>,
    certificates: Arc<CertificateStore>,
    sessions: SigningSessionEngine,
    verification: VerificationEngine,
}

impl std::fmt::Debug for Signflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signflow")
            .field("certificates", &self.certificates)
            .finish_non_exhaustive()
    }
}

impl Signflow {
    /// Wire the components over existing stores.
    pub fn new(
        ctx: TenantContext,
        blobs: Arc<dyn BlobStore>,
        repo: Arc<Repository>,
        config: EngineConfig,
        directory: Arc<dyn SignerDirectory>,
    ) -> Result<Self> {
        config.validate()?;
        let certificates = Arc::new(CertificateStore::new(
            ctx.clone(),
            blobs.clone(),
            repo.clone(),
            config.clone(),
        ));
        let watermarker =
            DocumentWatermarker::new(config.watermark.clone(), config.verification.clone());
        let sessions = SigningSessionEngine::new(
            ctx,
            blobs.clone(),
            repo.clone(),
            certificates.clone(),
            watermarker,
            directory.clone(),
        );
        let verification =
            VerificationEngine::new(repo.clone(), blobs.clone(), PkiEngine::new(&config), directory);
        Ok(Self {
            repo,
            blobs,
            certificates,
            sessions,
            verification,
        })
    }

    /// Engine over a blob directory with an empty record store.
    pub fn open_dir(
        root: impl AsRef<Path>,
        ctx: TenantContext,
        config: EngineConfig,
        directory: impl SignerDirectory + 'static,
    ) -> Result<Self> {
        let blobs = Arc::new(FsBlobStore::new(root.as_ref())?);
        Self::new(ctx, blobs, Arc::new(Repository::new()), config, Arc::new(directory))
    }

    /// Certificate lifecycle.
    pub fn certificates(&self) -> &CertificateStore {
        &self.certificates
    }

    /// Signing sessions.
    pub fn sessions(&self) -> &SigningSessionEngine {
        &self.sessions
    }

    /// Verification of uploads and stored signatures.
    pub fn verification(&self) -> &VerificationEngine {
        &self.verification
    }

    /// Shared record store.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    /// Shared blob store.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }
}
