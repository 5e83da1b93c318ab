//! PDF serialization.
//!
//! Objects are written with sorted dictionary keys so the same document
//! always produces the same bytes. Files are emitted whole with a classic
//! cross-reference table; encryption, object streams and xref streams are
//! never produced.
//!
//! PDF Spec: Section 7.5 - File Structure

mod content;

pub use content::{text_width, winansi_encode, ContentBuilder};

use super::document::PdfDocument;
use super::error::PdfResult;
use super::lexer::is_regular;
use super::object::Object;

/// Format a real number compactly (no exponent, trailing zeros trimmed).
pub fn format_real(r: f64) -> String {
    if !r.is_finite() {
        return "0".to_string();
    }
    if r.fract() == 0.0 && r.abs() < 1e15 {
        return format!("{}", r as i64);
    }
    let s = format!("{:.4}", r);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for c in name.chars() {
        let code = u32::from(c);
        if code <= 0xFF {
            let b = code as u8;
            if (0x21..=0x7E).contains(&b) && is_regular(b) && b != b'#' {
                out.push(b);
            } else {
                out.extend_from_slice(format!("#{:02X}", b).as_bytes());
            }
        } else {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.extend_from_slice(format!("#{:02X}", b).as_bytes());
            }
        }
    }
}

fn write_string(out: &mut Vec<u8>, s: &[u8]) {
    let printable = s
        .iter()
        .all(|&b| (0x20..=0x7E).contains(&b) || matches!(b, b'\n' | b'\r' | b'\t'));
    if !printable {
        out.push(b'<');
        out.extend_from_slice(hex::encode_upper(s).as_bytes());
        out.push(b'>');
        return;
    }
    out.push(b'(');
    for &b in s {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            },
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}

/// Append the serialized form of `obj` to `out`.
pub fn write_object(out: &mut Vec<u8>, obj: &Object) {
    match obj {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(b) => out.extend_from_slice(if *b { b"true" } else { b"false" }),
        Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
        Object::Real(r) => out.extend_from_slice(format_real(*r).as_bytes()),
        Object::String(s) => write_string(out, s),
        Object::Name(n) => write_name(out, n),
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        },
        Object::Dictionary(dict) => {
            let mut keys: Vec<&String> = dict.keys().collect();
            keys.sort();
            out.extend_from_slice(b"<<");
            for key in keys {
                out.push(b' ');
                write_name(out, key);
                out.push(b' ');
                write_object(out, &dict[key]);
            }
            out.extend_from_slice(b" >>");
        },
        Object::Stream { dict, data } => {
            let mut dict = dict.clone();
            dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
            write_object(out, &Object::Dictionary(dict));
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(data);
            out.extend_from_slice(b"\nendstream");
        },
        Object::Reference(r) => out.extend_from_slice(format!("{} {} R", r.id, r.gen).as_bytes()),
    }
}

/// Serialize a whole document with a fresh classic xref table.
///
/// PDF Spec: Section 7.5.4 - Cross-Reference Table
pub fn write_document(doc: &PdfDocument) -> PdfResult<Vec<u8>> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("%PDF-{}\n", doc.version()).as_bytes());
    // Binary marker so transfer tools treat the file as binary.
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(doc.object_count());
    for (r, obj) in doc.objects() {
        offsets.push((r.id, r.gen, out.len()));
        out.extend_from_slice(format!("{} {} obj\n", r.id, r.gen).as_bytes());
        write_object(&mut out, obj);
        out.extend_from_slice(b"\nendobj\n");
    }

    let size = offsets.last().map(|(id, _, _)| *id + 1).unwrap_or(1);
    let mut slots: Vec<Option<(u16, usize)>> = vec![None; size as usize];
    for (id, gen, offset) in offsets {
        slots[id as usize] = Some((gen, offset));
    }
    // Free entries form a linked list headed by object 0.
    let free: Vec<usize> = (1..slots.len()).filter(|&i| slots[i].is_none()).collect();

    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
    let head = free.first().copied().unwrap_or(0);
    out.extend_from_slice(format!("{:010} 65535 f \n", head).as_bytes());
    let mut free_iter = free.iter().skip(1);
    for slot in slots.iter().skip(1) {
        match slot {
            Some((gen, offset)) => {
                out.extend_from_slice(format!("{:010} {:05} n \n", offset, gen).as_bytes())
            },
            None => {
                let next = free_iter.next().copied().unwrap_or(0);
                out.extend_from_slice(format!("{:010} 00001 f \n", next).as_bytes());
            },
        }
    }

    let mut trailer = super::object::Dictionary::new();
    trailer.insert("Size".to_string(), Object::Integer(i64::from(size)));
    for key in ["Root", "Info", "ID"] {
        if let Some(v) = doc.trailer().get(key) {
            trailer.insert(key.to_string(), v.clone());
        }
    }
    out.extend_from_slice(b"trailer\n");
    write_object(&mut out, &Object::Dictionary(trailer));
    out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::object::Dictionary;
    use crate::pdf::parser::parse_object;

    fn serialize(obj: &Object) -> String {
        let mut out = Vec::new();
        write_object(&mut out, obj);
        String::from_utf8_lossy(&out).to_string()
    }

    #[test]
    fn test_format_real() {
        assert_eq!(format_real(12.0), "12");
        assert_eq!(format_real(0.5), "0.5");
        assert_eq!(format_real(1.23456789), "1.2346");
        assert_eq!(format_real(f64::NAN), "0");
    }

    #[test]
    fn test_name_escaping() {
        assert_eq!(serialize(&Object::name("A B#")), "/A#20B#23");
    }

    #[test]
    fn test_string_escaping() {
        assert_eq!(serialize(&Object::String(b"a(b)\\".to_vec())), "(a\\(b\\)\\\\)");
        assert_eq!(serialize(&Object::String(vec![0, 255])), "<00FF>");
    }

    #[test]
    fn test_dictionary_is_sorted_and_reparses() {
        let mut dict = Dictionary::new();
        dict.insert("Zed".to_string(), Object::Integer(1));
        dict.insert("Alpha".to_string(), Object::Array(vec![Object::Real(1.5), Object::Null]));
        let text = serialize(&Object::Dictionary(dict.clone()));
        assert!(text.find("/Alpha").unwrap() < text.find("/Zed").unwrap());
        let (_, parsed) = parse_object(text.as_bytes()).unwrap();
        assert_eq!(parsed, Object::Dictionary(dict));
    }
}
