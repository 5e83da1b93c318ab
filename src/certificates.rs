//! Certificate authority and user certificate lifecycle.
//!
//! The store owns one root CA per tenant and any number of leaf
//! certificates per user. PEM material lives in the blob store:
//!
//! ```text
//! tenants/{tenant}/ca/root.crt
//! tenants/{tenant}/ca/root.key
//! tenants/{tenant}/certificates/{user}/{certificate_id}.crt
//! tenants/{tenant}/certificates/{user}/{certificate_id}.key
//! ```
//!
//! User keys are encrypted with a passphrase derived from the tenant secret:
//! `hex(HMAC-SHA256(secret, user_id))`. The derived value is stored as the
//! working secret next to a bcrypt commitment; the HMAC is what unlocks keys.

use crate::config::EngineConfig;
use crate::context::TenantContext;
use crate::error::{Error, Result};
use crate::model::{CertificateAuthority, Signer, UserCertificate};
use crate::pki::{DistinguishedName, PkiEngine};
use crate::repository::Repository;
use crate::storage::BlobStore;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// PEM material and passphrase needed to sign with one certificate.
#[derive(Clone)]
pub struct SigningMaterial {
    /// Certificate PEM
    pub certificate_pem: String,
    /// Encrypted PKCS#8 private key PEM
    pub private_key_pem: String,
    /// Passphrase unlocking the private key
    pub passphrase: String,
}

impl fmt::Debug for SigningMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningMaterial")
            .field("certificate_pem", &format!("{} bytes", self.certificate_pem.len()))
            .field("private_key_pem", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Persists the CA and user certificates of one tenant.
pub struct CertificateStore {
    ctx: TenantContext,
    blobs: Arc<dyn BlobStore>,
    repo: Arc<Repository>,
    pki: PkiEngine,
    config: EngineConfig,
    ca_guard: Mutex<()>,
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("tenant", &self.ctx.tenant_id())
            .finish_non_exhaustive()
    }
}

fn user_segment(user_id: &str) -> Result<&str> {
    if user_id.is_empty()
        || !user_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'@'))
        || user_id.starts_with('.')
    {
        return Err(Error::InvalidRequest(format!("invalid user id '{}'", user_id)));
    }
    Ok(user_id)
}

fn read_text(blobs: &dyn BlobStore, path: &str) -> Result<String> {
    String::from_utf8(blobs.get(path)?)
        .map_err(|_| Error::Storage(format!("blob {} is not UTF-8 text", path)))
}

impl CertificateStore {
    /// Create a store for `ctx`.
    pub fn new(
        ctx: TenantContext,
        blobs: Arc<dyn BlobStore>,
        repo: Arc<Repository>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pki: PkiEngine::new(&config),
            ctx,
            blobs,
            repo,
            config,
            ca_guard: Mutex::new(()),
        }
    }

    /// The PKI engine used by this store.
    pub fn pki(&self) -> &PkiEngine {
        &self.pki
    }

    /// Passphrase for `user_id`: lowercase hex HMAC-SHA256 under the tenant
    /// secret.
    pub fn derive_passphrase(&self, user_id: &str) -> Result<String> {
        let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(self.ctx.secret())
            .map_err(|e| Error::KeyGeneration(format!("HMAC key: {}", e)))?;
        mac.update(user_id.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Create the tenant's root CA. Refused while a non-revoked CA exists.
    pub fn create_ca(
        &self,
        organization: &str,
        common_name: &str,
        validity_days: Option<u32>,
    ) -> Result<CertificateAuthority> {
        let _guard = self
            .ca_guard
            .lock()
            .map_err(|_| Error::Storage("CA lock poisoned".to_string()))?;
        if self.repo.read(|t| t.active_ca().is_some())? {
            log::warn!("Tenant {} already has an active CA", self.ctx.tenant_id());
            return Err(Error::CaAlreadyExists);
        }

        let subject = DistinguishedName::new(common_name).with_organization(organization);
        let days = validity_days.unwrap_or(self.config.ca_validity_days);
        let issued = self.pki.create_root_ca(&subject, days)?;

        let certificate_path = self.ctx.path("ca/root.crt");
        let private_key_path = self.ctx.path("ca/root.key");
        self.blobs.put(&certificate_path, issued.certificate_pem.as_bytes())?;
        self.blobs.put(&private_key_path, issued.private_key_pem.as_bytes())?;

        let ca = CertificateAuthority {
            id: Uuid::new_v4(),
            organization: organization.to_string(),
            common_name: common_name.to_string(),
            serial: issued.serial,
            valid_from: issued.valid_from,
            valid_to: issued.valid_to,
            certificate_path,
            private_key_path,
            is_revoked: false,
            created_at: Utc::now(),
        };
        let record = ca.clone();
        self.repo.transaction(move |t| {
            if t.active_ca().is_some() {
                return Err(Error::CaAlreadyExists);
            }
            t.authorities.insert(record.id, record);
            Ok(())
        })?;
        log::info!(
            "Created root CA '{}' (serial {}) for tenant {}",
            ca.common_name,
            ca.serial,
            self.ctx.tenant_id()
        );
        Ok(ca)
    }

    /// The non-revoked CA, if any.
    pub fn active_ca(&self) -> Result<Option<CertificateAuthority>> {
        self.repo.read(|t| t.active_ca().cloned())
    }

    /// Revoke the active CA. Certificates it issued keep their own state.
    pub fn revoke_ca(&self) -> Result<CertificateAuthority> {
        let _guard = self
            .ca_guard
            .lock()
            .map_err(|_| Error::Storage("CA lock poisoned".to_string()))?;
        let ca = self.repo.transaction(|t| {
            let id = t.active_ca().map(|ca| ca.id).ok_or(Error::NoCaRegistered)?;
            let ca = t
                .authorities
                .get_mut(&id)
                .ok_or_else(|| Error::not_found("certificate authority", id))?;
            ca.is_revoked = true;
            Ok(ca.clone())
        })?;
        log::info!("Revoked root CA {} (serial {})", ca.id, ca.serial);
        Ok(ca)
    }

    /// Issue a new certificate for `user` under the active CA.
    pub fn issue_certificate(&self, user: &Signer, label: &str) -> Result<UserCertificate> {
        let user_dir = user_segment(&user.user_id)?;
        let ca = self.active_ca()?.ok_or(Error::NoCaRegistered)?;
        let ca_cert_pem = read_text(self.blobs.as_ref(), &ca.certificate_path)?;
        let ca_key_pem = read_text(self.blobs.as_ref(), &ca.private_key_path)?;

        let passphrase = self.derive_passphrase(&user.user_id)?;
        let commitment = bcrypt::hash(&passphrase, self.config.bcrypt_cost)
            .map_err(|e| Error::KeyGeneration(format!("bcrypt: {}", e)))?;

        for attempt in 0..=self.config.serial_retry_limit {
            let issued = self.pki.create_user_certificate(
                &ca_cert_pem,
                &ca_key_pem,
                &user.name,
                &user.email,
                &passphrase,
            )?;
            if self.repo.read(|t| t.serial_in_use(&issued.serial))? {
                log::warn!("Serial {} collided (attempt {}), reissuing", issued.serial, attempt + 1);
                continue;
            }

            let id = Uuid::new_v4();
            let certificate_path = self
                .ctx
                .path(&format!("certificates/{}/{}.crt", user_dir, id));
            let private_key_path = self
                .ctx
                .path(&format!("certificates/{}/{}.key", user_dir, id));
            self.blobs.put(&certificate_path, issued.certificate_pem.as_bytes())?;
            self.blobs.put(&private_key_path, issued.private_key_pem.as_bytes())?;

            let cert = UserCertificate {
                id,
                ca_id: ca.id,
                user_id: user.user_id.clone(),
                label: label.to_string(),
                common_name: user.name.clone(),
                email: user.email.clone(),
                serial: issued.serial,
                valid_from: issued.valid_from,
                valid_to: issued.valid_to,
                certificate_path,
                private_key_path,
                passphrase_hash: passphrase.clone(),
                passphrase_bcrypt: commitment.clone(),
                is_revoked: false,
                is_active: true,
                created_at: Utc::now(),
            };
            let record = cert.clone();
            let committed = self.repo.transaction(move |t| {
                if t.active_ca().map(|a| a.id) != Some(record.ca_id) {
                    return Err(Error::NoCaRegistered);
                }
                if t.serial_in_use(&record.serial) {
                    return Ok(false);
                }
                t.certificates.insert(record.id, record);
                Ok(true)
            });
            match committed {
                Ok(true) => {
                    log::info!(
                        "Issued certificate {} (serial {}, label '{}') to {}",
                        cert.id,
                        cert.serial,
                        cert.label,
                        cert.user_id
                    );
                    return Ok(cert);
                },
                Ok(false) => {
                    log::warn!("Serial {} collided at commit, reissuing", cert.serial);
                    self.blobs.delete(&cert.certificate_path)?;
                    self.blobs.delete(&cert.private_key_path)?;
                },
                Err(e) => {
                    self.blobs.delete(&cert.certificate_path)?;
                    self.blobs.delete(&cert.private_key_path)?;
                    return Err(e);
                },
            }
        }
        log::error!(
            "Could not find a free serial after {} attempts",
            self.config.serial_retry_limit + 1
        );
        Err(Error::CertificateSigning("serial number collision".to_string()))
    }

    /// The certificate `certificate_id` of `user_id` if it may sign now.
    ///
    /// A certificate that does not exist or belongs to someone else is
    /// `CertificateNotFound`; one outside its lifecycle is
    /// `CertificateNotUsable`.
    pub fn find_usable_certificate(&self, user_id: &str, certificate_id: Uuid) -> Result<UserCertificate> {
        let cert = self
            .repo
            .read(|t| t.certificates.get(&certificate_id).cloned())?
            .filter(|c| c.user_id == user_id)
            .ok_or(Error::CertificateNotFound(certificate_id))?;
        cert.usability(Utc::now())
            .map_err(|reason| Error::CertificateNotUsable {
                id: certificate_id,
                reason,
            })?;
        Ok(cert)
    }

    /// Certificates held by `user_id`, oldest first.
    pub fn certificates_for_user(&self, user_id: &str) -> Result<Vec<UserCertificate>> {
        let mut certs = self.repo.read(|t| {
            t.certificates
                .values()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect::<Vec<_>>()
        })?;
        certs.sort_by_key(|c| c.created_at);
        Ok(certs)
    }

    fn update_owned(
        &self,
        user_id: &str,
        certificate_id: Uuid,
        f: impl FnOnce(&mut UserCertificate),
    ) -> Result<UserCertificate> {
        self.repo.transaction(|t| {
            let cert = t
                .certificates
                .get_mut(&certificate_id)
                .filter(|c| c.user_id == user_id)
                .ok_or(Error::CertificateNotFound(certificate_id))?;
            f(cert);
            Ok(cert.clone())
        })
    }

    /// Permanently revoke a certificate.
    pub fn revoke_certificate(&self, user_id: &str, certificate_id: Uuid) -> Result<UserCertificate> {
        let cert = self.update_owned(user_id, certificate_id, |c| c.is_revoked = true)?;
        log::info!("Revoked certificate {} of {}", certificate_id, user_id);
        Ok(cert)
    }

    /// Stop offering a certificate for signing.
    pub fn deactivate_certificate(&self, user_id: &str, certificate_id: Uuid) -> Result<UserCertificate> {
        let cert = self.update_owned(user_id, certificate_id, |c| c.is_active = false)?;
        log::info!("Deactivated certificate {} of {}", certificate_id, user_id);
        Ok(cert)
    }

    /// Certificate PEM, encrypted key and passphrase for signing.
    ///
    /// The passphrase is re-derived from the tenant secret and must match
    /// the stored working secret.
    pub fn load_signing_material(&self, cert: &UserCertificate) -> Result<SigningMaterial> {
        let passphrase = self.derive_passphrase(&cert.user_id)?;
        if passphrase != cert.passphrase_hash {
            log::error!(
                "Derived passphrase for certificate {} does not match the stored secret",
                cert.id
            );
            return Err(Error::InvalidKey("passphrase mismatch".to_string()));
        }
        Ok(SigningMaterial {
            certificate_pem: read_text(self.blobs.as_ref(), &cert.certificate_path)?,
            private_key_pem: read_text(self.blobs.as_ref(), &cert.private_key_path)?,
            passphrase,
        })
    }

    /// Check the bcrypt commitment of a certificate against its working
    /// secret.
    pub fn verify_passphrase_commitment(&self, cert: &UserCertificate) -> Result<bool> {
        bcrypt::verify(&cert.passphrase_hash, &cert.passphrase_bcrypt)
            .map_err(|e| Error::InvalidKey(format!("bcrypt: {}", e)))
    }

    /// Certificate PEM of a stored certificate.
    pub fn certificate_pem(&self, cert: &UserCertificate) -> Result<String> {
        read_text(self.blobs.as_ref(), &cert.certificate_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsBlobStore;

    fn store(dir: &std::path::Path) -> CertificateStore {
        let blobs = Arc::new(FsBlobStore::new(dir).unwrap());
        CertificateStore::new(
            TenantContext::new("acme", "tenant-secret").unwrap(),
            blobs,
            Arc::new(Repository::new()),
            EngineConfig::fast_insecure(),
        )
    }

    #[test]
    fn test_passphrase_is_hex_hmac() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let a = store.derive_passphrase("alice").unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, store.derive_passphrase("alice").unwrap());
        assert_ne!(a, store.derive_passphrase("bob").unwrap());
    }

    #[test]
    fn test_issue_requires_ca() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let user = Signer {
            user_id: "alice".to_string(),
            name: "Alice".to_string(),
            email: "alice@example.com".to_string(),
        };
        assert!(matches!(store.issue_certificate(&user, "default"), Err(Error::NoCaRegistered)));
    }

    #[test]
    fn test_user_segment_validation() {
        assert!(user_segment("alice@example.com").is_ok());
        assert!(user_segment("../x").is_err());
        assert!(user_segment("a/b").is_err());
        assert!(user_segment(".hidden").is_err());
    }
}
