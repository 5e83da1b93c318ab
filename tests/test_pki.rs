//! PKI engine: root CA, leaf certificates and digest signatures.

use signflow::digest::sha256_hex;
use signflow::pki::{inspect_certificate, public_key_pem_from_certificate};
use signflow::{DistinguishedName, EngineConfig, Error, PkiEngine};

fn engine() -> PkiEngine {
    PkiEngine::new(&EngineConfig::fast_insecure())
}

fn root(pki: &PkiEngine) -> signflow::IssuedCertificate {
    let subject = DistinguishedName::new("Acme Root CA").with_organization("Acme Corp");
    pki.create_root_ca(&subject, 30).unwrap()
}

#[test]
fn test_root_ca_is_self_signed_ca() {
    let pki = engine();
    let ca = root(&pki);

    assert!(ca.certificate_pem.starts_with("-----BEGIN CERTIFICATE-----"));
    assert!(ca.private_key_pem.contains("BEGIN PRIVATE KEY"));

    let details = inspect_certificate(&ca.certificate_pem).unwrap();
    assert!(details.is_ca);
    assert_eq!(details.subject_common_name.as_deref(), Some("Acme Root CA"));
    assert_eq!(details.issuer_common_name.as_deref(), Some("Acme Root CA"));
    assert_eq!(details.serial, ca.serial);
    let days = (details.valid_to - details.valid_from).num_days();
    assert!((29..=30).contains(&days), "validity was {} days", days);
}

#[test]
fn test_user_certificate_signed_by_ca() {
    let pki = engine();
    let ca = root(&pki);
    let user = pki
        .create_user_certificate(
            &ca.certificate_pem,
            &ca.private_key_pem,
            "Alice Anders",
            "alice@example.com",
            "correct horse",
        )
        .unwrap();

    assert!(user.private_key_pem.contains("BEGIN ENCRYPTED PRIVATE KEY"));
    assert_ne!(user.serial, ca.serial);

    let details = inspect_certificate(&user.certificate_pem).unwrap();
    assert!(!details.is_ca);
    assert_eq!(details.subject_common_name.as_deref(), Some("Alice Anders"));
    assert_eq!(details.issuer_common_name.as_deref(), Some("Acme Root CA"));
    assert_eq!(details.emails, vec!["alice@example.com".to_string()]);
}

#[test]
fn test_sign_and_verify_digest() {
    let pki = engine();
    let ca = root(&pki);
    let user = pki
        .create_user_certificate(
            &ca.certificate_pem,
            &ca.private_key_pem,
            "Bob Brown",
            "bob@example.com",
            "passphrase",
        )
        .unwrap();
    let public_key = public_key_pem_from_certificate(&user.certificate_pem).unwrap();

    let digest = sha256_hex(b"document bytes");
    let signature = pki.sign_data(&digest, &user.private_key_pem, "passphrase").unwrap();

    assert!(pki.verify_signature(&digest, &signature, &public_key));

    let other = sha256_hex(b"other bytes");
    assert!(!pki.verify_signature(&other, &signature, &public_key));

    let ca_key = public_key_pem_from_certificate(&ca.certificate_pem).unwrap();
    assert!(!pki.verify_signature(&digest, &signature, &ca_key));
}

#[test]
fn test_wrong_passphrase_is_invalid_key() {
    let pki = engine();
    let ca = root(&pki);
    let user = pki
        .create_user_certificate(
            &ca.certificate_pem,
            &ca.private_key_pem,
            "Carol Chen",
            "carol@example.com",
            "right",
        )
        .unwrap();

    let result = pki.sign_data(&sha256_hex(b"x"), &user.private_key_pem, "wrong");
    assert!(matches!(result, Err(Error::InvalidKey(_))));
    assert!(pki.decrypt_private_key(&user.private_key_pem, "right").is_ok());
}

#[test]
fn test_mismatched_ca_key_is_invalid_ca() {
    let pki = engine();
    let first = root(&pki);
    let second = root(&pki);

    let result = pki.create_user_certificate(
        &first.certificate_pem,
        &second.private_key_pem,
        "Alice Anders",
        "alice@example.com",
        "pw",
    );
    assert!(matches!(result, Err(Error::InvalidCa(_))));
}

#[test]
fn test_garbage_ca_material_is_invalid_ca() {
    let pki = engine();
    let result =
        pki.create_user_certificate("not a cert", "not a key", "Alice", "alice@example.com", "pw");
    assert!(matches!(result, Err(Error::InvalidCa(_))));
}

#[test]
fn test_default_key_size_round_trip() {
    let pki = PkiEngine::new(&EngineConfig::default().with_pbkdf2_iterations(1_000));
    let ca = pki
        .create_root_ca(&DistinguishedName::new("Full Size CA"), 10)
        .unwrap();
    let user = pki
        .create_user_certificate(
            &ca.certificate_pem,
            &ca.private_key_pem,
            "Dana Diaz",
            "dana@example.com",
            "pw",
        )
        .unwrap();
    let digest = sha256_hex(b"2048-bit");
    let signature = pki.sign_data(&digest, &user.private_key_pem, "pw").unwrap();
    let public_key = public_key_pem_from_certificate(&user.certificate_pem).unwrap();

    assert!(pki.verify_signature(&digest, &signature, &public_key));
}
