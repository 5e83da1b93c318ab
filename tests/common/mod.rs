//! Shared fixtures: hand-built PDFs and engines in temporary directories.

#![allow(dead_code)]

use md5::{Digest, Md5};
use signflow::pdf::encryption::rc4;
use signflow::{
    EngineConfig, Signer, Signflow, StaticDirectory, TenantContext, UserCertificate,
};
use tempfile::TempDir;

const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

const FILE_ID: [u8; 16] = *b"signflow-test-id";

/// Serialize numbered object bodies into a PDF with a classic xref table.
fn assemble(objects: &[Vec<u8>], trailer_extra: &str) -> Vec<u8> {
    let mut pdf = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets = Vec::new();
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }
    let xref = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
    for off in offsets {
        pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R {}>>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            trailer_extra,
            xref
        )
        .as_bytes(),
    );
    pdf
}

fn stream(data: &[u8]) -> Vec<u8> {
    let mut body = format!("<< /Length {} >>\nstream\n", data.len()).into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(b"\nendstream");
    body
}

fn page_objects(sizes: &[(f64, f64)]) -> Vec<Vec<u8>> {
    // 1 catalog, 2 pages node, 3 font, then (page, content) per page.
    let kids: Vec<String> = (0..sizes.len()).map(|i| format!("{} 0 R", 4 + 2 * i)).collect();
    let mut objects = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        format!(
            "<< /Type /Pages /Kids [{}] /Count {} /Resources << /Font << /F1 3 0 R >> >> >>",
            kids.join(" "),
            sizes.len()
        )
        .into_bytes(),
        b"<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_vec(),
    ];
    for (i, (w, h)) in sizes.iter().enumerate() {
        objects.push(
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {} {}] /Contents {} 0 R >>",
                w,
                h,
                5 + 2 * i
            )
            .into_bytes(),
        );
        let content = format!("BT /F1 18 Tf 72 {} Td (Page {}) Tj ET", h - 100.0, i + 1);
        objects.push(stream(content.as_bytes()));
    }
    objects
}

/// PDF with one page per entry of `sizes` (width, height in points).
pub fn pdf_with_pages(sizes: &[(f64, f64)]) -> Vec<u8> {
    assemble(&page_objects(sizes), "")
}

/// Two US Letter pages.
pub fn letter_pdf() -> Vec<u8> {
    pdf_with_pages(&[(612.0, 792.0), (612.0, 792.0)])
}

fn pad(password: &[u8]) -> [u8; 32] {
    let mut out = PADDING;
    let n = password.len().min(32);
    out[..n].copy_from_slice(&password[..n]);
    out[n..].copy_from_slice(&PADDING[..32 - n]);
    out
}

/// Two-page Letter PDF encrypted with 40-bit RC4 (V1/R2).
pub fn rc4_encrypted_pdf(user_password: &[u8], owner_password: &[u8]) -> Vec<u8> {
    let permissions: i32 = -4;
    let owner_hash = Md5::digest(pad(owner_password));
    let o = rc4(&owner_hash[..5], &pad(user_password));

    let mut hasher = Md5::new();
    hasher.update(pad(user_password));
    hasher.update(&o);
    hasher.update(permissions.to_le_bytes());
    hasher.update(FILE_ID);
    let file_key = hasher.finalize()[..5].to_vec();
    let u = rc4(&file_key, &PADDING);

    let mut objects = page_objects(&[(612.0, 792.0), (612.0, 792.0)]);
    // Encrypt content streams (objects 5 and 7).
    for id in [5u32, 7u32] {
        let mut hasher = Md5::new();
        hasher.update(&file_key);
        hasher.update(&id.to_le_bytes()[..3]);
        hasher.update(0u16.to_le_bytes());
        let object_hash = hasher.finalize();
        let page_index = ((id - 5) / 2) as usize;
        let plain = format!("BT /F1 18 Tf 72 692 Td (Page {}) Tj ET", page_index + 1);
        objects[id as usize - 1] = stream(&rc4(&object_hash[..10], plain.as_bytes()));
    }
    objects.push(
        format!(
            "<< /Filter /Standard /V 1 /R 2 /O <{}> /U <{}> /P {} >>",
            hex::encode(&o),
            hex::encode(&u),
            permissions
        )
        .into_bytes(),
    );
    let encrypt_id = objects.len();
    let id_hex = hex::encode(FILE_ID);
    assemble(
        &objects,
        &format!("/Encrypt {} 0 R /ID [<{}> <{}>] ", encrypt_id, id_hex, id_hex),
    )
}

/// An engine over a temporary directory with Alice, Bob and Carol in the
/// directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub directory: StaticDirectory,
    pub engine: Signflow,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let directory = StaticDirectory::new()
            .with_signer("alice", "Alice Anders", "alice@example.com")
            .with_signer("bob", "Bob Brown", "bob@example.com")
            .with_signer("carol", "Carol Chen", "carol@example.com");
        let engine = Signflow::open_dir(
            dir.path().join("blobs"),
            TenantContext::new("acme", "tenant-secret").unwrap(),
            EngineConfig::fast_insecure(),
            directory.clone(),
        )
        .unwrap();
        Self {
            dir,
            directory,
            engine,
        }
    }

    /// Environment with a root CA already created.
    pub fn with_ca() -> Self {
        let env = Self::new();
        env.engine
            .certificates()
            .create_ca("Acme Corp", "Acme Root CA", None)
            .unwrap();
        env
    }

    pub fn signer(&self, user_id: &str) -> Signer {
        use signflow::SignerDirectory;
        self.directory.lookup(user_id).unwrap()
    }

    /// Issue a certificate to a directory user.
    pub fn issue(&self, user_id: &str) -> UserCertificate {
        self.engine
            .certificates()
            .issue_certificate(&self.signer(user_id), "default")
            .unwrap()
    }
}
