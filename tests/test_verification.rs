//! Verification of uploaded files and stored signatures.

mod common;

use common::{letter_pdf, TestEnv};
use signflow::{
    SignOutcome, SignRequest, SignatureStatus, SignerSpec, SigningMode, SigningSession, Upload,
    VerificationStatus,
};

struct Signed {
    env: TestEnv,
    session: SigningSession,
    first: SignOutcome,
    second: SignOutcome,
}

/// Alice then Bob sign a two-page contract.
fn signed_contract() -> Signed {
    let env = TestEnv::with_ca();
    let alice = env.issue("alice");
    let bob = env.issue("bob");
    let sessions = env.engine.sessions();
    let session = sessions
        .create_session(
            "owner",
            Upload::pdf("contract.pdf", letter_pdf()),
            "Service Contract",
            SigningMode::Sequential,
            &[SignerSpec::new("alice"), SignerSpec::new("bob")],
        )
        .unwrap();
    let first = sessions
        .sign(&SignRequest::new(session.signature_ids[0], alice.id, "alice"))
        .unwrap();
    let second = sessions
        .sign(&SignRequest::new(session.signature_ids[1], bob.id, "bob").with_client("192.0.2.7", "ua"))
        .unwrap();
    Signed {
        env,
        session,
        first,
        second,
    }
}

#[test]
fn test_latest_version_is_verified() {
    let signed = signed_contract();
    let latest = signed.env.engine.blobs().get(&signed.second.signed_file_path).unwrap();

    let result = signed.env.engine.verification().verify_uploaded_file(&latest).unwrap();
    assert_eq!(result.status, VerificationStatus::Verified);
    assert_eq!(result.message, VerificationStatus::Verified.message());
    assert_eq!(result.digest, signed.second.current_hash);

    let document = result.document.unwrap();
    assert_eq!(document.id, signed.session.document_id);
    assert_eq!(document.title, "Service Contract");
    assert_eq!(document.original_filename.as_deref(), Some("contract.pdf"));

    let names: Vec<&str> = result.signers.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Alice Anders", "Bob Brown"]);
    assert_eq!(result.signers[0].email, "alice@example.com");
    assert_eq!(result.signers[1].step_order, 2);
    assert_eq!(result.signers[1].ip_address.as_deref(), Some("192.0.2.7"));
    assert!(result.signers.iter().all(|s| s.certificate_serial.is_some()));
}

#[test]
fn test_original_is_unsigned() {
    let signed = signed_contract();
    let result = signed
        .env
        .engine
        .verification()
        .verify_uploaded_file(&letter_pdf())
        .unwrap();

    assert_eq!(result.status, VerificationStatus::OriginalUnsigned);
    assert!(result.signers.is_empty());
    let document = result.document.unwrap();
    assert_eq!(document.id, signed.session.document_id);
    assert!(document.original_filename.is_none());
}

#[test]
fn test_original_before_any_signature() {
    let env = TestEnv::with_ca();
    env.engine
        .sessions()
        .create_session(
            "owner",
            Upload::pdf("draft.pdf", letter_pdf()),
            "Draft",
            SigningMode::Parallel,
            &[SignerSpec::new("alice")],
        )
        .unwrap();

    let result = env.engine.verification().verify_uploaded_file(&letter_pdf()).unwrap();
    assert_eq!(result.status, VerificationStatus::OriginalUnsigned);
}

#[test]
fn test_intermediate_and_unknown_are_not_found() {
    let signed = signed_contract();
    let verification = signed.env.engine.verification();

    let intermediate = signed.env.engine.blobs().get(&signed.first.signed_file_path).unwrap();
    let result = verification.verify_uploaded_file(&intermediate).unwrap();
    assert_eq!(result.status, VerificationStatus::NotFound);
    assert!(result.document.is_none());

    let result = verification.verify_uploaded_file(b"%PDF-1.4 unrelated").unwrap();
    assert_eq!(result.status, VerificationStatus::NotFound);

    let mut modified = signed.env.engine.blobs().get(&signed.second.signed_file_path).unwrap();
    modified.push(b'\n');
    let result = verification.verify_uploaded_file(&modified).unwrap();
    assert_eq!(result.status, VerificationStatus::NotFound);
}

#[test]
fn test_signed_document_without_signatures_is_orphaned() {
    let signed = signed_contract();
    let document_id = signed.session.document_id;
    signed
        .env
        .engine
        .repository()
        .transaction(|t| {
            for sig in t.signatures.values_mut() {
                if sig.document_id == document_id {
                    sig.status = SignatureStatus::Pending;
                }
            }
            Ok(())
        })
        .unwrap();

    let latest = signed.env.engine.blobs().get(&signed.second.signed_file_path).unwrap();
    let result = signed.env.engine.verification().verify_uploaded_file(&latest).unwrap();
    assert_eq!(result.status, VerificationStatus::OrphanedInconsistent);
    assert!(result.signers.is_empty());
}

#[test]
fn test_stored_signatures_reverify() {
    let signed = signed_contract();
    let verification = signed.env.engine.verification();

    let first = verification
        .verify_signature_record(signed.first.signature.id)
        .unwrap();
    assert!(first.is_valid());
    assert_eq!(first.signed_digest, signed.first.signed_digest);

    let second = verification
        .verify_signature_record(signed.second.signature.id)
        .unwrap();
    assert!(second.signature_valid);
    assert!(second.chain_intact);
}

#[test]
fn test_tampered_signature_file_fails() {
    let signed = signed_contract();
    let path = signed
        .second
        .signature
        .signature_file_path
        .clone()
        .unwrap();
    signed.env.engine.blobs().put(&path, &[0u8; 128]).unwrap();

    let check = signed
        .env
        .engine
        .verification()
        .verify_signature_record(signed.second.signature.id)
        .unwrap();
    assert!(!check.signature_valid);
    assert!(check.chain_intact);
    assert!(!check.is_valid());
}

#[test]
fn test_unsigned_slot_cannot_be_rechecked() {
    let env = TestEnv::with_ca();
    let session = env
        .engine
        .sessions()
        .create_session(
            "owner",
            Upload::pdf("draft.pdf", letter_pdf()),
            "Draft",
            SigningMode::Parallel,
            &[SignerSpec::new("alice")],
        )
        .unwrap();

    assert!(env
        .engine
        .verification()
        .verify_signature_record(session.signature_ids[0])
        .is_err());
}
