//! Signature blocks on real (hand-built) PDFs.

mod common;

use chrono::{TimeZone, Utc};
use common::{letter_pdf, pdf_with_pages, rc4_encrypted_pdf};
use signflow::pdf::decoders::decode_stream;
use signflow::pdf::{Object, PdfDocument};
use signflow::watermark::PayloadSigner;
use signflow::{DocumentWatermarker, Error, WatermarkRequest};

fn signer(name: &str, minute: u32) -> PayloadSigner {
    PayloadSigner {
        name: name.to_string(),
        email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        signed_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap(),
        certificate_serial: "01ab".to_string(),
    }
}

fn request(signers: Vec<PayloadSigner>) -> WatermarkRequest {
    WatermarkRequest::for_latest("Contract", "contract.pdf", "ab".repeat(32), signers)
}

/// Decoded content streams of the last page, in order.
fn last_page_contents(pdf: &[u8]) -> Vec<Vec<u8>> {
    let doc = PdfDocument::load(pdf).unwrap();
    let last = *doc.pages().unwrap().last().unwrap();
    let page = doc.get(last).unwrap().as_dict().unwrap();
    let refs = match page.get("Contents").unwrap() {
        Object::Array(items) => items.clone(),
        other => vec![other.clone()],
    };
    refs.iter()
        .map(|r| match doc.resolve(r) {
            Object::Stream { dict, data } => decode_stream(dict, data).unwrap(),
            other => panic!("content is a {}", other.type_name()),
        })
        .collect()
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

#[test]
fn test_stamps_last_page_only() {
    let wm = DocumentWatermarker::default();
    let stamped = wm
        .stamp_bytes(&letter_pdf(), &request(vec![signer("Alice Anders", 0)]))
        .unwrap();

    let doc = PdfDocument::load(&stamped).unwrap();
    let pages = doc.pages().unwrap();
    assert_eq!(pages.len(), 2);

    let first = doc.get(pages[0]).unwrap().as_dict().unwrap();
    assert!(matches!(first.get("Contents"), Some(Object::Reference(_))));

    let contents = last_page_contents(&stamped);
    assert_eq!(contents.len(), 4);
    assert_eq!(text(&contents[0]), "q");
    assert!(contains(&contents[1], "(Page 2) Tj"));
    assert_eq!(text(&contents[2]), "Q");
    let block = &contents[3];
    assert!(contains(block, "(Digitally Signed by) Tj"));
    assert!(contains(block, "(Alice Anders) Tj"));
    assert!(contains(block, "Date: 2024-05-01 10:00 UTC"));
}

#[test]
fn test_fonts_added_beside_existing_resources() {
    let wm = DocumentWatermarker::default();
    let stamped = wm
        .stamp_bytes(&letter_pdf(), &request(vec![signer("Alice Anders", 0)]))
        .unwrap();

    let doc = PdfDocument::load(&stamped).unwrap();
    let last = *doc.pages().unwrap().last().unwrap();
    let resources = doc
        .inherited_attribute(last, "Resources")
        .and_then(Object::as_dict)
        .unwrap();
    let fonts = doc.resolve(resources.get("Font").unwrap()).as_dict().unwrap();
    assert!(fonts.contains_key("F1"));
    assert!(fonts.contains_key("SfHelv"));
    assert!(fonts.contains_key("SfHelvB"));
    let bold = doc.resolve(fonts.get("SfHelvB").unwrap()).as_dict().unwrap();
    assert_eq!(bold.get("BaseFont").and_then(Object::as_name), Some("Helvetica-Bold"));
}

#[test]
fn test_second_signer_stacks_above_first() {
    let wm = DocumentWatermarker::default();
    let once = wm
        .stamp_bytes(&letter_pdf(), &request(vec![signer("Alice Anders", 0)]))
        .unwrap();
    let twice = wm
        .stamp_bytes(
            &once,
            &request(vec![signer("Alice Anders", 0), signer("Bob Brown", 5)]),
        )
        .unwrap();

    let contents = last_page_contents(&twice);
    let blocks: Vec<&Vec<u8>> = contents
        .iter()
        .filter(|c| contains(c, "Digitally Signed by"))
        .collect();
    assert_eq!(blocks.len(), 2);
    assert!(contains(blocks[0], "(Alice Anders) Tj"));
    assert!(contains(blocks[1], "(Bob Brown) Tj"));
    assert!(!contains(blocks[1], "(Alice Anders) Tj"));
    // Slot 1 sits one block height plus gap above slot 0.
    assert!(contains(blocks[0], "356 36 220 64 re"));
    assert!(contains(blocks[1], "356 108 220 64 re"));
}

#[test]
fn test_no_room_on_small_page() {
    let wm = DocumentWatermarker::default();
    let pdf = pdf_with_pages(&[(200.0, 200.0)]);
    let result = wm.stamp_bytes(&pdf, &request(vec![signer("Alice Anders", 0)]));
    assert!(matches!(result, Err(Error::NoRoomForSignature { slot: 0 })));
}

#[test]
fn test_blank_user_password_is_stripped() {
    let wm = DocumentWatermarker::default();
    let pdf = rc4_encrypted_pdf(b"", b"owner-secret");
    assert!(matches!(PdfDocument::load(&pdf), Err(signflow::pdf::PdfError::Encrypted)));

    let stamped = wm
        .stamp_bytes(&pdf, &request(vec![signer("Carol Chen", 0)]))
        .unwrap();
    let doc = PdfDocument::load(&stamped).unwrap();
    assert!(doc.trailer().get("Encrypt").is_none());

    let contents = last_page_contents(&stamped);
    assert!(contains(&contents[1], "(Page 2) Tj"));
    assert!(contains(contents.last().unwrap(), "(Carol Chen) Tj"));
}

#[test]
fn test_user_password_is_protected() {
    let wm = DocumentWatermarker::default();
    let pdf = rc4_encrypted_pdf(b"open-sesame", b"owner-secret");
    let result = wm.stamp_bytes(&pdf, &request(vec![signer("Carol Chen", 0)]));
    assert!(matches!(result, Err(Error::ProtectedDocument)));
}

#[test]
fn test_garbage_is_unreadable() {
    let wm = DocumentWatermarker::default();
    let result = wm.stamp_bytes(b"this is not a pdf", &request(vec![signer("Alice Anders", 0)]));
    assert!(matches!(result, Err(Error::UnreadableDocument(_))));
}

#[test]
fn test_add_watermarks_on_paths() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.pdf");
    let output = dir.path().join("out").join("signed.pdf");
    std::fs::write(&input, letter_pdf()).unwrap();

    let wm = DocumentWatermarker::default();
    let written = wm
        .add_watermarks(&input, &output, &request(vec![signer("Alice Anders", 0)]))
        .unwrap();

    assert_eq!(written, output);
    let bytes = std::fs::read(&output).unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    assert_ne!(bytes, std::fs::read(&input).unwrap());
}
