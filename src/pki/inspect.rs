//! Read-only views of PEM certificates.

use super::types::CertificateDetails;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use der::{DecodePem, Encode};
use pkcs8::LineEnding;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::RsaPublicKey;
use x509_cert::Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| Error::InvalidRequest(format!("certificate time out of range: {}", secs)))
}

fn first_common_name(name: &X509Name<'_>) -> Option<String> {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
}

/// Decode subject, issuer, serial and validity of a PEM certificate.
pub fn inspect_certificate(certificate_pem: &str) -> Result<CertificateDetails> {
    let (_, pem) = parse_x509_pem(certificate_pem.as_bytes())
        .map_err(|e| Error::InvalidRequest(format!("not a PEM certificate: {:?}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::InvalidRequest(format!("Failed to parse certificate: {:?}", e)))?;

    let mut emails = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::RFC822Name(email) = name {
                emails.push(email.to_string());
            }
        }
    }

    Ok(CertificateDetails {
        subject_common_name: first_common_name(cert.subject()),
        issuer_common_name: first_common_name(cert.issuer()),
        emails,
        serial: hex::encode(cert.raw_serial()),
        valid_from: timestamp(cert.validity().not_before.timestamp())?,
        valid_to: timestamp(cert.validity().not_after.timestamp())?,
        is_ca: cert.is_ca(),
    })
}

/// SubjectPublicKeyInfo PEM of the RSA key certified by `certificate_pem`.
pub fn public_key_pem_from_certificate(certificate_pem: &str) -> Result<String> {
    let cert = Certificate::from_pem(certificate_pem)
        .map_err(|e| Error::InvalidRequest(format!("not a PEM certificate: {}", e)))?;
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::InvalidRequest(format!("public key encoding: {}", e)))?;
    let key = RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| Error::InvalidRequest(format!("certificate key is not RSA: {}", e)))?;
    key.to_public_key_pem(LineEnding::LF)
        .map_err(|e| Error::InvalidRequest(format!("public key encoding: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_pem() {
        assert!(inspect_certificate("hello").is_err());
        assert!(public_key_pem_from_certificate("hello").is_err());
    }
}
