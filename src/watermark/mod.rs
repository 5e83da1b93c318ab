//! Signature blocks on the last page of a PDF.
//!
//! The watermarker rewrites a whole document: every object is re-emitted
//! decrypted with a fresh cross-reference table, and the last page gets one
//! block per new signer. Blocks sit in the bottom-right corner and stack
//! upward; block `i` always occupies slot `i`, so a document signed `k`
//! times already has slots `0..k` filled and the next signer takes slot `k`.
//!
//! Each block holds a "Digitally Signed by" label, the signer name, a QR
//! code, a caption and the signing date. The QR payload of block `i` lists
//! signers `0..=i`.
//!
//! The original page content is wrapped in `q`/`Q` so graphics state it
//! leaves behind cannot leak into the blocks. Page rotation is not
//! compensated; blocks are placed in unrotated user space.
//!
//! PDF Spec: Section 7.7.3.3 - Page Objects, Section 8.4 - Graphics State

mod payload;
mod qr;

pub use payload::{PayloadDocument, PayloadSigner, PayloadVerification, QrPayload};
pub use qr::QrMatrix;

use crate::config::{VerificationLabels, WatermarkConfig};
use crate::error::{Error, Result};
use crate::pdf::decoders::flate_encode;
use crate::pdf::writer::{text_width, ContentBuilder};
use crate::pdf::{Dictionary, Object, ObjectRef, PdfDocument, PdfError, Rect};
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Font resource names tried for the regular and bold faces.
const REGULAR_FONT: &str = "SfHelv";
const BOLD_FONT: &str = "SfHelvB";

/// What to stamp on a document.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkRequest {
    /// Document title
    pub title: String,
    /// Original file name
    pub filename: String,
    /// Hash recorded in every payload's `document.hash`
    pub document_hash: String,
    /// All signers to date, in signing order
    pub signers: Vec<PayloadSigner>,
    /// Index of the first signer that still needs a block
    pub stamp_from: usize,
}

impl WatermarkRequest {
    /// Request stamping only the last signer of `signers`.
    pub fn for_latest(
        title: impl Into<String>,
        filename: impl Into<String>,
        document_hash: impl Into<String>,
        signers: Vec<PayloadSigner>,
    ) -> Self {
        let stamp_from = signers.len().saturating_sub(1);
        Self {
            title: title.into(),
            filename: filename.into(),
            document_hash: document_hash.into(),
            signers,
            stamp_from,
        }
    }
}

/// Rewrites PDFs with signature blocks.
#[derive(Debug, Clone, Default)]
pub struct DocumentWatermarker {
    layout: WatermarkConfig,
    labels: VerificationLabels,
}

impl DocumentWatermarker {
    /// Create a watermarker with the given layout and payload labels.
    pub fn new(layout: WatermarkConfig, labels: VerificationLabels) -> Self {
        Self { layout, labels }
    }

    /// Stamp the file at `input_path` and write the result to `output_path`.
    pub fn add_watermarks(
        &self,
        input_path: &Path,
        output_path: &Path,
        request: &WatermarkRequest,
    ) -> Result<PathBuf> {
        let data = std::fs::read(input_path)?;
        let stamped = self.stamp_bytes(&data, request)?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output_path, stamped)?;
        Ok(output_path.to_path_buf())
    }

    /// Stamp an in-memory PDF.
    pub fn stamp_bytes(&self, data: &[u8], request: &WatermarkRequest) -> Result<Vec<u8>> {
        if request.signers.is_empty() || request.stamp_from >= request.signers.len() {
            return Err(Error::InvalidRequest("no signer to stamp".to_string()));
        }
        let mut doc = open_document(data)?;
        let pages = doc.pages().map_err(Error::UnreadableDocument)?;
        let last = *pages
            .last()
            .ok_or_else(|| Error::UnreadableDocument(PdfError::InvalidPdf("no pages".to_string())))?;
        let page_box = doc.page_box(last);

        let (regular, bold) = install_fonts(&mut doc, last)?;
        let mut content = ContentBuilder::new();
        for slot in request.stamp_from..request.signers.len() {
            let origin = self.slot_origin(&page_box, slot)?;
            let payload = self.payload(request, slot);
            let json = payload.to_json()?;
            let qr = QrMatrix::encode(&json)?;
            self.draw_block(&mut content, origin, &request.signers[slot], &qr, &regular, &bold);
        }
        append_content(&mut doc, last, content.build())?;

        log::debug!(
            "Stamped {} block(s) on page {} starting at slot {}",
            request.signers.len() - request.stamp_from,
            last,
            request.stamp_from
        );
        doc.save().map_err(Error::UnreadableDocument)
    }

    /// Check that the last page of `data` can hold `blocks` signature
    /// blocks. Slots only move up the page, so the top one decides.
    pub fn ensure_room(&self, data: &[u8], blocks: usize) -> Result<()> {
        let Some(top) = blocks.checked_sub(1) else {
            return Ok(());
        };
        let doc = open_document(data)?;
        let pages = doc.pages().map_err(Error::UnreadableDocument)?;
        let last = *pages
            .last()
            .ok_or_else(|| Error::UnreadableDocument(PdfError::InvalidPdf("no pages".to_string())))?;
        self.slot_origin(&doc.page_box(last), top).map(|_| ())
    }

    /// Lower-left corner of block `slot`, or `NoRoomForSignature`.
    fn slot_origin(&self, page: &Rect, slot: usize) -> Result<(f64, f64)> {
        let l = &self.layout;
        let x = page.urx - l.margin - l.block_width;
        let y = page.lly + l.margin + slot as f64 * (l.block_height + l.gap);
        if x < page.llx + l.margin || y + l.block_height > page.ury - l.margin {
            log::warn!("Signature block {} does not fit on a {}x{} page", slot, page.width(), page.height());
            return Err(Error::NoRoomForSignature { slot });
        }
        Ok((x, y))
    }

    fn payload(&self, request: &WatermarkRequest, slot: usize) -> QrPayload {
        let signed_at = request.signers[slot].signed_at;
        QrPayload {
            document: PayloadDocument {
                title: request.title.clone(),
                filename: request.filename.clone(),
                hash: request.document_hash.clone(),
                signed_at,
            },
            signers: request.signers[..=slot].to_vec(),
            verification: PayloadVerification {
                verified_by: self.labels.verified_by.clone(),
                verification_timestamp: signed_at,
                verification_method: self.labels.verification_method.clone(),
            },
        }
    }

    fn draw_block(
        &self,
        content: &mut ContentBuilder,
        (x, y): (f64, f64),
        signer: &PayloadSigner,
        qr: &QrMatrix,
        regular: &str,
        bold: &str,
    ) {
        let l = &self.layout;
        let pad = ((l.block_height - l.qr_size) / 2.0).max(2.0);
        content
            .save_state()
            .fill_rgb(0.96, 0.97, 1.0)
            .stroke_rgb(0.2, 0.3, 0.6)
            .line_width(0.75)
            .rect(x, y, l.block_width, l.block_height)
            .fill_stroke()
            .restore_state();
        qr.draw(content, x + pad, y + pad, l.qr_size);

        let text_x = x + pad + l.qr_size + 6.0;
        let text_room = x + l.block_width - 4.0 - text_x;
        let name_size = l.font_size + 2.0;
        let line = l.font_size * 1.6;
        let top = y + l.block_height - pad - l.font_size;
        let date = signer.signed_at.format("%Y-%m-%d %H:%M UTC").to_string();

        let label = fit_text("Digitally Signed by", l.font_size, false, text_room);
        let name = fit_text(&signer.name, name_size, true, text_room);
        let caption = fit_text(&l.verified_via_caption, l.font_size, false, text_room);
        let date = fit_text(&format!("Date: {}", date), l.font_size, false, text_room);

        content
            .save_state()
            .fill_rgb(0.1, 0.1, 0.1)
            .text(regular, l.font_size, text_x, top, &label)
            .text(bold, name_size, text_x, top - line - 1.0, &name)
            .text(regular, l.font_size, text_x, top - 2.0 * line - 2.0, &caption)
            .text(regular, l.font_size, text_x, top - 3.0 * line - 2.0, &date)
            .restore_state();
    }
}

/// Shorten `text` with an ellipsis until it fits `room` points.
fn fit_text(text: &str, size: f64, bold: bool, room: f64) -> String {
    if text_width(text, size, bold) <= room {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    while !chars.is_empty() {
        chars.pop();
        let candidate: String = chars.iter().collect::<String>() + "...";
        if text_width(&candidate, size, bold) <= room {
            return candidate;
        }
    }
    String::new()
}

/// Load `data`, stripping blank-user-password encryption when present.
fn open_document(data: &[u8]) -> Result<PdfDocument> {
    match PdfDocument::load(data) {
        Ok(doc) => Ok(doc),
        Err(PdfError::Encrypted) => {
            log::info!("Document is encrypted, retrying with the blank user password");
            let stripped = PdfDocument::decrypt_to_bytes(data, b"").map_err(|e| {
                log::warn!("Blank password did not open the document: {}", e);
                Error::ProtectedDocument
            })?;
            PdfDocument::load(&stripped).map_err(|e| {
                log::warn!("Decrypted copy could not be reloaded: {}", e);
                Error::ProtectedDocument
            })
        },
        Err(e) => {
            log::warn!("Unreadable PDF: {}", e);
            Err(Error::UnreadableDocument(e))
        },
    }
}

fn unique_name(existing: &Dictionary, base: &str) -> String {
    if !existing.contains_key(base) {
        return base.to_string();
    }
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|name| !existing.contains_key(name))
        .unwrap_or_else(|| base.to_string())
}

fn helvetica(base_font: &str) -> Object {
    let mut dict = Dictionary::new();
    dict.insert("Type".to_string(), Object::name("Font"));
    dict.insert("Subtype".to_string(), Object::name("Type1"));
    dict.insert("BaseFont".to_string(), Object::name(base_font));
    dict.insert("Encoding".to_string(), Object::name("WinAnsiEncoding"));
    Object::Dictionary(dict)
}

fn page_dict(doc: &PdfDocument, page: ObjectRef) -> Result<Dictionary> {
    doc.get(page)
        .and_then(Object::as_dict)
        .cloned()
        .ok_or_else(|| Error::UnreadableDocument(PdfError::ObjectNotFound(page.id, page.gen)))
}

/// Add the two Helvetica faces to the page's resources and return their
/// resource names. Inherited resources are copied onto the page.
fn install_fonts(doc: &mut PdfDocument, page: ObjectRef) -> Result<(String, String)> {
    let mut resources = doc
        .inherited_attribute(page, "Resources")
        .and_then(Object::as_dict)
        .cloned()
        .unwrap_or_default();
    let mut fonts = resources
        .get("Font")
        .map(|f| doc.resolve(f))
        .and_then(Object::as_dict)
        .cloned()
        .unwrap_or_default();

    let regular = unique_name(&fonts, REGULAR_FONT);
    let regular_ref = doc.add_object(helvetica("Helvetica"));
    fonts.insert(regular.clone(), Object::Reference(regular_ref));
    let bold = unique_name(&fonts, BOLD_FONT);
    let bold_ref = doc.add_object(helvetica("Helvetica-Bold"));
    fonts.insert(bold.clone(), Object::Reference(bold_ref));

    resources.insert("Font".to_string(), Object::Dictionary(fonts));
    let mut dict = page_dict(doc, page)?;
    dict.insert("Resources".to_string(), Object::Dictionary(resources));
    doc.set_object(page, Object::Dictionary(dict));
    Ok((regular, bold))
}

fn raw_stream(data: &'static [u8]) -> Object {
    Object::Stream {
        dict: Dictionary::new(),
        data: Bytes::from_static(data),
    }
}

/// Wrap the existing page content in `q`/`Q` and append `ops`.
fn append_content(doc: &mut PdfDocument, page: ObjectRef, ops: Vec<u8>) -> Result<()> {
    let mut dict = page_dict(doc, page)?;
    let existing: Vec<Object> = match dict.get("Contents") {
        None => Vec::new(),
        Some(Object::Reference(r)) => match doc.get(*r) {
            Some(Object::Array(items)) => items.clone(),
            Some(_) => vec![Object::Reference(*r)],
            None => Vec::new(),
        },
        Some(Object::Array(items)) => items.clone(),
        Some(other) => {
            log::warn!("Ignoring /Contents of type {} on page {}", other.type_name(), page);
            Vec::new()
        },
    };

    let compressed = flate_encode(&ops).map_err(Error::UnreadableDocument)?;
    let mut block_dict = Dictionary::new();
    block_dict.insert("Filter".to_string(), Object::name("FlateDecode"));
    let block = doc.add_object(Object::Stream {
        dict: block_dict,
        data: Bytes::from(compressed),
    });

    let mut contents = Vec::with_capacity(existing.len() + 3);
    if !existing.is_empty() {
        contents.push(Object::Reference(doc.add_object(raw_stream(b"q\n"))));
        contents.extend(existing);
        contents.push(Object::Reference(doc.add_object(raw_stream(b"\nQ\n"))));
    }
    contents.push(Object::Reference(block));
    dict.insert("Contents".to_string(), Object::Array(contents));
    doc.set_object(page, Object::Dictionary(dict));
    Ok(())
}
