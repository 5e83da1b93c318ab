//! Key pairs, certificates and raw digest signatures.
//!
//! The PKI engine never sees documents. It creates a self-signed root CA,
//! issues CA-signed leaf certificates from a PKCS#10 request built with the
//! user's fresh key, and signs or verifies 32-byte SHA-256 digests.
//!
//! # Algorithms
//!
//! - Keys: RSA (2048-bit by default)
//! - Certificate and request signatures: sha256WithRSAEncryption
//! - Digest signatures: RSASSA-PKCS1-v1_5 over a prehashed SHA-256 digest,
//!   so verifying an uploaded signature only needs the digest and the
//!   signer's public key
//! - User private keys: encrypted PKCS#8 (PBES2, PBKDF2-SHA256, AES-256-CBC)

mod inspect;
mod types;

pub use inspect::{inspect_certificate, public_key_pem_from_certificate};
pub use types::{CertificateDetails, DistinguishedName, IssuedCertificate};

use crate::config::EngineConfig;
use crate::digest::decode_sha256_hex;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use der::{DecodePem, Encode, EncodePem};
use pkcs8::LineEnding;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use signature::hazmat::{PrehashSigner, PrehashVerifier};
use signature::{SignatureEncoding, Verifier};
use spki::SubjectPublicKeyInfoOwned;
use std::str::FromStr;
use std::time::Duration;
use x509_cert::builder::{Builder, CertificateBuilder, Profile, RequestBuilder};
use x509_cert::der::asn1::Ia5String;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;
use x509_cert::name::Name;
use x509_cert::request::CertReq;
use x509_cert::serial_number::SerialNumber;
use x509_cert::time::{Time, Validity};
use x509_cert::Certificate;

const SECONDS_PER_DAY: u64 = 86_400;

/// Stateless PKI operations parameterized by policy.
#[derive(Debug, Clone)]
pub struct PkiEngine {
    key_bits: usize,
    pbkdf2_iterations: u32,
    user_certificate_days: u32,
}

impl Default for PkiEngine {
    fn default() -> Self {
        Self::new(&EngineConfig::default())
    }
}

fn to_datetime(time: Time) -> Result<DateTime<Utc>> {
    let secs = time.to_unix_duration().as_secs();
    i64::try_from(secs)
        .ok()
        .and_then(|s| DateTime::<Utc>::from_timestamp(s, 0))
        .ok_or_else(|| Error::CertificateSigning(format!("validity time out of range: {}", secs)))
}

/// Four random bytes forming a positive, minimally encoded DER integer.
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; 4];
    loop {
        OsRng.fill_bytes(&mut bytes);
        bytes[0] &= 0x7F;
        if bytes[0] != 0 {
            break;
        }
    }
    SerialNumber::new(&bytes).map_err(|e| Error::CertificateSigning(format!("serial: {}", e)))
}

fn validity_days(days: u32) -> Result<Validity> {
    Validity::from_now(Duration::from_secs(u64::from(days) * SECONDS_PER_DAY))
        .map_err(|e| Error::CertificateSigning(format!("validity: {}", e)))
}

fn issued(cert: &Certificate, private_key_pem: String) -> Result<IssuedCertificate> {
    let certificate_pem = cert
        .to_pem(LineEnding::LF)
        .map_err(|e| Error::CertificateSigning(format!("PEM encoding: {}", e)))?;
    let tbs = &cert.tbs_certificate;
    Ok(IssuedCertificate {
        certificate_pem,
        private_key_pem,
        serial: hex::encode(tbs.serial_number.as_bytes()),
        valid_from: to_datetime(tbs.validity.not_before)?,
        valid_to: to_datetime(tbs.validity.not_after)?,
    })
}

fn public_key_of(spki: &SubjectPublicKeyInfoOwned) -> std::result::Result<RsaPublicKey, String> {
    let der = spki.to_der().map_err(|e| e.to_string())?;
    RsaPublicKey::from_public_key_der(&der).map_err(|e| e.to_string())
}

/// Load an RSA private key from PKCS#8 or PKCS#1 PEM.
fn load_plain_key(pem: &str) -> std::result::Result<RsaPrivateKey, String> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| e.to_string())
}

impl PkiEngine {
    /// Build an engine from the configuration's key policy.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            key_bits: config.rsa_key_bits,
            pbkdf2_iterations: config.pbkdf2_iterations,
            user_certificate_days: config.user_certificate_days,
        }
    }

    fn generate_key(&self) -> Result<RsaPrivateKey> {
        RsaPrivateKey::new(&mut OsRng, self.key_bits).map_err(|e| {
            log::error!("RSA key generation ({} bits) failed: {}", self.key_bits, e);
            Error::KeyGeneration(e.to_string())
        })
    }

    /// Create a self-signed root CA valid for `validity_days`.
    pub fn create_root_ca(
        &self,
        subject: &DistinguishedName,
        validity_days: u32,
    ) -> Result<IssuedCertificate> {
        let key = self.generate_key()?;
        let name = Name::from_str(&subject.to_rfc4514())
            .map_err(|e| Error::CertificateSigning(format!("subject: {}", e)))?;
        let spki = SubjectPublicKeyInfoOwned::from_key(key.to_public_key())
            .map_err(|e| Error::CertificateSigning(format!("public key: {}", e)))?;
        let signer = SigningKey::<Sha256>::new(key.clone());

        let builder = CertificateBuilder::new(
            Profile::Root,
            random_serial()?,
            validity_days_checked(validity_days)?,
            name,
            spki,
            &signer,
        )
        .map_err(|e| Error::CertificateSigning(e.to_string()))?;
        let cert = builder.build::<Signature>().map_err(|e| {
            log::error!("Self-signing root CA failed: {}", e);
            Error::CertificateSigning(e.to_string())
        })?;

        let key_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::CertificateSigning(format!("key encoding: {}", e)))?;
        issued(&cert, key_pem.to_string())
    }

    /// Issue a leaf certificate for a fresh key pair, signed by the CA.
    ///
    /// The subject is `CN=common_name`; `email` goes into an RFC 822
    /// SubjectAltName.
    /// The returned private key is an encrypted PKCS#8 PEM unlocked by
    /// `passphrase`.
    pub fn create_user_certificate(
        &self,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        common_name: &str,
        email: &str,
        passphrase: &str,
    ) -> Result<IssuedCertificate> {
        let ca_cert = Certificate::from_pem(ca_cert_pem)
            .map_err(|e| Error::InvalidCa(format!("certificate: {}", e)))?;
        let ca_key = load_plain_key(ca_key_pem).map_err(|e| Error::InvalidCa(format!("key: {}", e)))?;
        let ca_public = public_key_of(&ca_cert.tbs_certificate.subject_public_key_info)
            .map_err(|e| Error::InvalidCa(format!("certificate key: {}", e)))?;
        if ca_public != ca_key.to_public_key() {
            return Err(Error::InvalidCa("CA key does not match CA certificate".to_string()));
        }

        let user_key = self.generate_key()?;
        let subject = DistinguishedName::new(common_name);
        let csr = self.build_request(&user_key, &subject, email)?;
        verify_request(&csr)?;

        let ca_signer = SigningKey::<Sha256>::new(ca_key);
        let mut builder = CertificateBuilder::new(
            Profile::Leaf {
                issuer: ca_cert.tbs_certificate.subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            },
            random_serial()?,
            validity_days_checked(self.user_certificate_days)?,
            csr.info.subject.clone(),
            csr.info.public_key.clone(),
            &ca_signer,
        )
        .map_err(|e| Error::CertificateSigning(e.to_string()))?;
        builder
            .add_extension(&email_san(email)?)
            .map_err(|e| Error::CertificateSigning(format!("SubjectAltName: {}", e)))?;
        let cert = builder.build::<Signature>().map_err(|e| {
            log::error!("CA signing of leaf certificate failed: {}", e);
            Error::CertificateSigning(e.to_string())
        })?;

        let key_pem = self.encrypt_private_key(&user_key, passphrase)?;
        issued(&cert, key_pem)
    }

    fn build_request(
        &self,
        key: &RsaPrivateKey,
        subject: &DistinguishedName,
        email: &str,
    ) -> Result<CertReq> {
        let name = Name::from_str(&subject.to_rfc4514())
            .map_err(|e| Error::CertificateSigning(format!("subject: {}", e)))?;
        let signer = SigningKey::<Sha256>::new(key.clone());
        let mut builder = RequestBuilder::new(name, &signer)
            .map_err(|e| Error::CertificateSigning(format!("request: {}", e)))?;
        builder
            .add_extension(&email_san(email)?)
            .map_err(|e| Error::CertificateSigning(format!("request SubjectAltName: {}", e)))?;
        builder
            .build::<Signature>()
            .map_err(|e| Error::CertificateSigning(format!("request signing: {}", e)))
    }

    /// PBES2 (PBKDF2-SHA256 + AES-256-CBC) encrypted PKCS#8 PEM.
    fn encrypt_private_key(&self, key: &RsaPrivateKey, passphrase: &str) -> Result<String> {
        let der = key
            .to_pkcs8_der()
            .map_err(|e| Error::KeyGeneration(format!("key encoding: {}", e)))?;
        let info = pkcs8::PrivateKeyInfo::try_from(der.as_bytes())
            .map_err(|e| Error::KeyGeneration(format!("key encoding: {}", e)))?;

        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);
        let params =
            pkcs8::pkcs5::pbes2::Parameters::pbkdf2_sha256_aes256cbc(self.pbkdf2_iterations, &salt, &iv)
                .map_err(|e| Error::KeyGeneration(format!("PBES2 parameters: {}", e)))?;
        let encrypted = info
            .encrypt_with_params(params, passphrase.as_bytes())
            .map_err(|e| Error::KeyGeneration(format!("key encryption: {}", e)))?;
        let pem = encrypted
            .to_pem("ENCRYPTED PRIVATE KEY", LineEnding::LF)
            .map_err(|e| Error::KeyGeneration(format!("key encoding: {}", e)))?;
        Ok(pem.to_string())
    }

    /// Decrypt an encrypted PKCS#8 PEM.
    pub fn decrypt_private_key(&self, private_key_pem: &str, passphrase: &str) -> Result<RsaPrivateKey> {
        RsaPrivateKey::from_pkcs8_encrypted_pem(private_key_pem, passphrase.as_bytes())
            .map_err(|e| Error::InvalidKey(e.to_string()))
    }

    /// Sign a hex SHA-256 digest. Returns the base64 signature.
    pub fn sign_data(&self, digest_hex: &str, private_key_pem: &str, passphrase: &str) -> Result<String> {
        let digest = decode_sha256_hex(digest_hex)?;
        let key = self.decrypt_private_key(private_key_pem, passphrase)?;
        let signature: Signature = SigningKey::<Sha256>::new(key)
            .sign_prehash(&digest)
            .map_err(|e| Error::SigningFailed(e.to_string()))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Verify a base64 signature over a hex SHA-256 digest. Any malformed
    /// input yields `false`.
    pub fn verify_signature(&self, digest_hex: &str, signature_base64: &str, public_key_pem: &str) -> bool {
        let Ok(digest) = decode_sha256_hex(digest_hex) else {
            return false;
        };
        let Ok(raw) = BASE64.decode(signature_base64.trim()) else {
            return false;
        };
        let Ok(public_key) = RsaPublicKey::from_public_key_pem(public_key_pem) else {
            return false;
        };
        let Ok(signature) = Signature::try_from(raw.as_slice()) else {
            return false;
        };
        VerifyingKey::<Sha256>::new(public_key)
            .verify_prehash(&digest, &signature)
            .is_ok()
    }
}

fn validity_days_checked(days: u32) -> Result<Validity> {
    if days == 0 {
        return Err(Error::InvalidRequest("validity must be at least one day".to_string()));
    }
    validity_days(days)
}

fn email_san(email: &str) -> Result<SubjectAltName> {
    let ia5 = Ia5String::new(email)
        .map_err(|e| Error::InvalidRequest(format!("e-mail is not IA5: {}", e)))?;
    Ok(SubjectAltName(vec![GeneralName::Rfc822Name(ia5)]))
}

/// Check the request is signed by the key it carries.
fn verify_request(csr: &CertReq) -> Result<()> {
    let public_key = public_key_of(&csr.info.public_key)
        .map_err(|e| Error::CertificateSigning(format!("request key: {}", e)))?;
    let info = csr
        .info
        .to_der()
        .map_err(|e| Error::CertificateSigning(format!("request encoding: {}", e)))?;
    let signature = Signature::try_from(csr.signature.raw_bytes())
        .map_err(|e| Error::CertificateSigning(format!("request signature: {}", e)))?;
    VerifyingKey::<Sha256>::new(public_key)
        .verify(&info, &signature)
        .map_err(|e| Error::CertificateSigning(format!("request signature invalid: {}", e)))
}
