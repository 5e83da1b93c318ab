//! Whole-document loading and editing.
//!
//! A [`PdfDocument`] holds every live object of a file in memory, already
//! decrypted, with object streams expanded and cross-reference streams
//! dropped. That makes the rewrite path straightforward: edit objects, then
//! [`PdfDocument::save`] emits a fresh file with a classic xref table.
//!
//! PDF Spec: Section 7.5 - File Structure, Section 7.7.3 - Page Tree

use super::decoders::decode_stream;
use super::encryption::SecurityHandler;
use super::error::{PdfError, PdfResult};
use super::object::{Dictionary, Object, ObjectRef};
use super::parser::{find_bytes, parse_object, parse_object_at};
use super::writer;
use super::xref::{load_xref, reconstruct, CrossRefTable, XrefEntry};
use std::collections::{BTreeMap, HashSet};

static NULL: Object = Object::Null;

/// Maximum depth when following reference chains or the page tree.
const MAX_DEPTH: usize = 64;

/// A page rectangle in default user space units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Lower-left x
    pub llx: f64,
    /// Lower-left y
    pub lly: f64,
    /// Upper-right x
    pub urx: f64,
    /// Upper-right y
    pub ury: f64,
}

impl Rect {
    /// US Letter, used when a page declares no usable box.
    pub const LETTER: Rect = Rect {
        llx: 0.0,
        lly: 0.0,
        urx: 612.0,
        ury: 792.0,
    };

    fn from_object(obj: &Object) -> Option<Rect> {
        let nums: Vec<f64> = obj.as_array()?.iter().filter_map(Object::as_number).collect();
        if nums.len() != 4 {
            return None;
        }
        Some(Rect {
            llx: nums[0].min(nums[2]),
            lly: nums[1].min(nums[3]),
            urx: nums[0].max(nums[2]),
            ury: nums[1].max(nums[3]),
        })
    }

    /// Width of the rectangle.
    pub fn width(&self) -> f64 {
        self.urx - self.llx
    }

    /// Height of the rectangle.
    pub fn height(&self) -> f64 {
        self.ury - self.lly
    }
}

/// An in-memory, decrypted PDF document.
#[derive(Debug, Clone)]
pub struct PdfDocument {
    version: String,
    objects: BTreeMap<u32, (u16, Object)>,
    trailer: Dictionary,
}

fn header_version(data: &[u8]) -> PdfResult<String> {
    let window = &data[..data.len().min(1024)];
    let pos = find_bytes(window, b"%PDF-").ok_or(PdfError::InvalidHeader)?;
    let version: String = data[pos + 5..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| char::from(b))
        .collect();
    if version.is_empty() {
        return Err(PdfError::InvalidHeader);
    }
    Ok(version)
}

impl PdfDocument {
    /// Load an unencrypted document.
    ///
    /// Returns [`PdfError::Encrypted`] when the trailer carries `/Encrypt`.
    pub fn load(data: &[u8]) -> PdfResult<Self> {
        Self::load_inner(data, None)
    }

    /// Load a document, decrypting it with `password` if it is encrypted.
    pub fn load_with_password(data: &[u8], password: &[u8]) -> PdfResult<Self> {
        Self::load_inner(data, Some(password))
    }

    fn load_inner(data: &[u8], password: Option<&[u8]>) -> PdfResult<Self> {
        let version = header_version(data)?;
        let table = load_xref(data)?;

        let doc = match Self::from_table(data, version.clone(), &table, password) {
            Ok(doc) => doc,
            Err(PdfError::Parse { offset, reason }) if !table.reconstructed => {
                log::warn!(
                    "Object at byte {} unreadable via xref ({}), rebuilding table",
                    offset,
                    reason
                );
                let mut rebuilt = reconstruct(data)?;
                for (k, v) in &table.trailer {
                    rebuilt.trailer.entry(k.clone()).or_insert_with(|| v.clone());
                }
                Self::from_table(data, version, &rebuilt, password)?
            },
            Err(e) => return Err(e),
        };
        Ok(doc)
    }

    fn from_table(
        data: &[u8],
        version: String,
        table: &CrossRefTable,
        password: Option<&[u8]>,
    ) -> PdfResult<Self> {
        let resolve_length = |r: ObjectRef| -> Option<usize> {
            match table.entries.get(&r.id) {
                Some(XrefEntry::InUse { offset, .. }) => parse_object_at(data, *offset, &|_| None)
                    .ok()
                    .and_then(|(_, o)| o.as_integer())
                    .and_then(|n| usize::try_from(n).ok()),
                _ => None,
            }
        };

        let mut trailer = table.trailer.clone();
        let encrypt_ref = trailer.get("Encrypt").and_then(Object::as_reference);
        let handler = match trailer.get("Encrypt") {
            None => None,
            Some(enc) => {
                let Some(password) = password else {
                    return Err(PdfError::Encrypted);
                };
                let dict = match enc {
                    Object::Reference(r) => match table.entries.get(&r.id) {
                        Some(XrefEntry::InUse { offset, .. }) => {
                            parse_object_at(data, *offset, &resolve_length)?.1
                        },
                        _ => return Err(PdfError::ObjectNotFound(r.id, r.gen)),
                    },
                    direct => direct.clone(),
                };
                let file_id = trailer
                    .get("ID")
                    .and_then(Object::as_array)
                    .and_then(|ids| ids.first())
                    .and_then(Object::as_string)
                    .unwrap_or(&[])
                    .to_vec();
                Some(SecurityHandler::open(dict.expect_dict()?, &file_id, password)?)
            },
        };

        let mut objects = BTreeMap::new();
        for (&id, entry) in &table.entries {
            let XrefEntry::InUse { offset, .. } = *entry else {
                continue;
            };
            let (r, obj) = parse_object_at(data, offset, &resolve_length)?;
            if r.id != id {
                return Err(PdfError::Parse {
                    offset,
                    reason: format!("xref says object {} but found {}", id, r.id),
                });
            }
            if Some(r) == encrypt_ref {
                continue;
            }
            let obj = match &handler {
                Some(h) => h.decrypt_object(r, obj),
                None => obj,
            };
            objects.insert(id, (r.gen, obj));
        }

        // Expand object streams: compressed entries first, then (for rebuilt
        // tables) any object stream the scan found.
        let mut expanded: HashSet<u32> = HashSet::new();
        let mut stream_ids: Vec<u32> = table
            .entries
            .values()
            .filter_map(|e| match e {
                XrefEntry::Compressed { stream, .. } => Some(*stream),
                _ => None,
            })
            .collect();
        if table.reconstructed {
            stream_ids.extend(
                objects
                    .iter()
                    .filter(|(_, (_, o))| o.dict_type() == Some("ObjStm"))
                    .map(|(&id, _)| id),
            );
        }
        for stream_id in stream_ids {
            if !expanded.insert(stream_id) {
                continue;
            }
            let Some((_, stream)) = objects.get(&stream_id) else {
                log::warn!("Object stream {} is missing", stream_id);
                continue;
            };
            for (id, obj) in expand_object_stream(stream)? {
                let wanted = match table.entries.get(&id) {
                    Some(XrefEntry::Compressed { stream, .. }) => *stream == stream_id,
                    Some(_) => false,
                    None => table.reconstructed,
                };
                if wanted && !objects.contains_key(&id) {
                    objects.insert(id, (0, obj));
                }
            }
        }

        objects.retain(|_, (_, o)| !matches!(o.dict_type(), Some("ObjStm") | Some("XRef")));
        trailer.remove("Encrypt");

        let mut doc = PdfDocument {
            version,
            objects,
            trailer,
        };
        if doc.trailer.get("Root").and_then(Object::as_reference).is_none() {
            let catalog = doc
                .objects
                .iter()
                .find(|(_, (_, o))| o.dict_type() == Some("Catalog"))
                .map(|(&id, (gen, _))| ObjectRef::new(id, *gen))
                .ok_or_else(|| PdfError::InvalidPdf("no document catalog".to_string()))?;
            doc.trailer.insert("Root".to_string(), Object::Reference(catalog));
        }
        log::debug!(
            "Loaded PDF {} with {} objects",
            doc.version,
            doc.objects.len()
        );
        Ok(doc)
    }

    /// Header version, e.g. `"1.7"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Trailer dictionary (without chain or encryption keys).
    pub fn trailer(&self) -> &Dictionary {
        &self.trailer
    }

    /// Iterate objects in object-number order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjectRef, &Object)> {
        self.objects
            .iter()
            .map(|(&id, (gen, obj))| (ObjectRef::new(id, *gen), obj))
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Look up an object by reference.
    pub fn get(&self, r: ObjectRef) -> Option<&Object> {
        self.objects.get(&r.id).map(|(_, o)| o)
    }

    /// Follow references until a direct object. Dangling references
    /// resolve to `null`.
    pub fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        let mut current = obj;
        for _ in 0..MAX_DEPTH {
            match current {
                Object::Reference(r) => match self.get(*r) {
                    Some(next) => current = next,
                    None => return &NULL,
                },
                direct => return direct,
            }
        }
        &NULL
    }

    /// Add a new object and return its reference.
    pub fn add_object(&mut self, obj: Object) -> ObjectRef {
        let id = self.objects.keys().next_back().copied().unwrap_or(0) + 1;
        self.objects.insert(id, (0, obj));
        ObjectRef::new(id, 0)
    }

    /// Replace the object at `r`.
    pub fn set_object(&mut self, r: ObjectRef, obj: Object) {
        self.objects.insert(r.id, (r.gen, obj));
    }

    /// The document catalog.
    pub fn catalog(&self) -> PdfResult<&Dictionary> {
        let root = self
            .trailer
            .get("Root")
            .ok_or_else(|| PdfError::InvalidPdf("trailer has no /Root".to_string()))?;
        self.resolve(root).expect_dict()
    }

    /// Leaf page references in document order.
    pub fn pages(&self) -> PdfResult<Vec<ObjectRef>> {
        let pages_root = self
            .catalog()?
            .get("Pages")
            .and_then(Object::as_reference)
            .ok_or_else(|| PdfError::InvalidPdf("catalog has no /Pages".to_string()))?;
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_pages(pages_root, &mut out, &mut visited, 0);
        if out.is_empty() {
            return Err(PdfError::InvalidPdf("document has no pages".to_string()));
        }
        Ok(out)
    }

    fn collect_pages(
        &self,
        node: ObjectRef,
        out: &mut Vec<ObjectRef>,
        visited: &mut HashSet<ObjectRef>,
        depth: usize,
    ) {
        if depth > MAX_DEPTH || !visited.insert(node) {
            log::warn!("Page tree cycle or excessive depth at {}", node);
            return;
        }
        let Some(dict) = self.get(node).and_then(Object::as_dict) else {
            log::warn!("Page tree node {} is not a dictionary", node);
            return;
        };
        let kids = dict.get("Kids").map(|k| self.resolve(k)).and_then(Object::as_array);
        match (dict.get("Type").and_then(Object::as_name), kids) {
            (Some("Page"), _) | (None, None) => out.push(node),
            (_, Some(kids)) => {
                for kid in kids {
                    match kid.as_reference() {
                        Some(r) => self.collect_pages(r, out, visited, depth + 1),
                        None => log::warn!("Direct page object in /Kids of {} ignored", node),
                    }
                }
            },
            (Some(_), None) => log::warn!("Pages node {} without /Kids", node),
        }
    }

    /// Look up a page attribute, walking `/Parent` for inheritable keys.
    ///
    /// PDF Spec: Section 7.7.3.4 - Inheritance of Page Attributes
    pub fn inherited_attribute(&self, page: ObjectRef, key: &str) -> Option<&Object> {
        let mut current = Some(page);
        for _ in 0..MAX_DEPTH {
            let dict = self.get(current?)?.as_dict()?;
            if let Some(value) = dict.get(key) {
                return Some(self.resolve(value));
            }
            current = dict.get("Parent").and_then(Object::as_reference);
        }
        None
    }

    /// Visible page area: `/CropBox` if present, else `/MediaBox`, else Letter.
    pub fn page_box(&self, page: ObjectRef) -> Rect {
        self.inherited_attribute(page, "CropBox")
            .and_then(Rect::from_object)
            .or_else(|| self.inherited_attribute(page, "MediaBox").and_then(Rect::from_object))
            .unwrap_or(Rect::LETTER)
    }

    /// Serialize the document with a classic cross-reference table.
    pub fn save(&self) -> PdfResult<Vec<u8>> {
        writer::write_document(self)
    }

    /// Open an encrypted file with `password` and re-emit it unencrypted.
    pub fn decrypt_to_bytes(data: &[u8], password: &[u8]) -> PdfResult<Vec<u8>> {
        Self::load_with_password(data, password)?.save()
    }
}

/// Parse all objects of an `/ObjStm`.
///
/// PDF Spec: Section 7.5.7 - Object Streams
fn expand_object_stream(stream: &Object) -> PdfResult<Vec<(u32, Object)>> {
    let Object::Stream { dict, data } = stream else {
        return Err(PdfError::InvalidObjectType {
            expected: "Stream",
            found: stream.type_name(),
        });
    };
    let decoded = decode_stream(dict, data)?;
    let count = dict.get("N").and_then(Object::as_integer).unwrap_or(0).max(0) as usize;
    let first = dict.get("First").and_then(Object::as_integer).unwrap_or(0).max(0) as usize;
    let header = decoded.get(..first.min(decoded.len())).unwrap_or(&[]);

    let mut pairs = Vec::with_capacity(count);
    let mut input = header;
    for _ in 0..count {
        let Ok((rest, Object::Integer(id))) = parse_object(input) else {
            break;
        };
        let Ok((rest, Object::Integer(off))) = parse_object(rest) else {
            break;
        };
        pairs.push((id, off));
        input = rest;
    }

    let mut out = Vec::with_capacity(pairs.len());
    for (id, off) in pairs {
        let (Ok(id), Ok(off)) = (u32::try_from(id), usize::try_from(off)) else {
            continue;
        };
        let Some(body) = decoded.get(first + off..) else {
            log::warn!("Object {} offset outside its object stream", id);
            continue;
        };
        match parse_object(body) {
            Ok((_, obj)) => out.push((id, obj)),
            Err(_) => log::warn!("Object {} in object stream is unreadable", id),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::decoders::flate_encode;

    pub(crate) fn simple_pdf() -> Vec<u8> {
        let objects = [
            "<< /Type /Catalog /Pages 2 0 R >>",
            "<< /Type /Pages /Kids [3 0 R] /Count 1 /MediaBox [0 0 300 400] >>",
            "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>",
            "<< /Length 8 >>\nstream\n0 0 m S \nendstream",
        ];
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let mut offsets = Vec::new();
        for (i, body) in objects.iter().enumerate() {
            offsets.push(pdf.len());
            pdf.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, body).as_bytes());
        }
        let xref = pdf.len();
        pdf.extend_from_slice(format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes());
        for off in offsets {
            pdf.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
        }
        pdf.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                objects.len() + 1,
                xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_load_simple() {
        let doc = PdfDocument::load(&simple_pdf()).unwrap();
        assert_eq!(doc.version(), "1.4");
        assert_eq!(doc.pages().unwrap(), vec![ObjectRef::new(3, 0)]);
    }

    #[test]
    fn test_inherited_media_box() {
        let doc = PdfDocument::load(&simple_pdf()).unwrap();
        let rect = doc.page_box(ObjectRef::new(3, 0));
        assert_eq!(rect.width(), 300.0);
        assert_eq!(rect.height(), 400.0);
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            PdfDocument::load(b"hello world"),
            Err(PdfError::InvalidHeader)
        ));
    }

    #[test]
    fn test_add_object_uses_next_id() {
        let mut doc = PdfDocument::load(&simple_pdf()).unwrap();
        let r = doc.add_object(Object::Null);
        assert_eq!(r, ObjectRef::new(5, 0));
    }

    #[test]
    fn test_object_stream_expansion() {
        let header = b"10 0 11 6 ";
        let body = b"(abc) << /K 1 >>";
        let mut raw = header.to_vec();
        raw.extend_from_slice(body);
        let mut dict = Dictionary::new();
        dict.insert("Type".to_string(), Object::name("ObjStm"));
        dict.insert("N".to_string(), Object::Integer(2));
        dict.insert("First".to_string(), Object::Integer(header.len() as i64));
        dict.insert("Filter".to_string(), Object::name("FlateDecode"));
        let stream = Object::Stream {
            dict,
            data: bytes::Bytes::from(flate_encode(&raw).unwrap()),
        };
        let objs = expand_object_stream(&stream).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0], (10, Object::String(b"abc".to_vec())));
        assert_eq!(objs[1].0, 11);
    }

    #[test]
    fn test_round_trip_through_writer() {
        let doc = PdfDocument::load(&simple_pdf()).unwrap();
        let bytes = doc.save().unwrap();
        let again = PdfDocument::load(&bytes).unwrap();
        assert_eq!(again.pages().unwrap().len(), 1);
        assert_eq!(again.object_count(), doc.object_count());
    }
}
