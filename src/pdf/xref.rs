//! Cross-reference loading.
//!
//! Follows the `startxref` chain through classic tables, cross-reference
//! streams, hybrid `/XRefStm` sections and `/Prev` links. Newer sections win
//! over older ones. When the chain is unusable the table is rebuilt by
//! scanning the file for `N G obj` headers.
//!
//! PDF Spec: Section 7.5.4 - Cross-Reference Table, Section 7.5.8 -
//! Cross-Reference Streams

use super::decoders::decode_stream;
use super::error::{PdfError, PdfResult};
use super::lexer::{keyword_tag, token, unsigned, Token};
use super::object::{Dictionary, Object};
use super::parser::{parse_object, parse_object_at, rfind_bytes};
use std::collections::{BTreeMap, HashSet};

/// Where an object lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    /// Free slot
    Free,
    /// Uncompressed object at a byte offset
    InUse {
        /// Byte offset of `N G obj`
        offset: usize,
        /// Generation number
        gen: u16,
    },
    /// Object stored inside an object stream
    Compressed {
        /// Object number of the containing `/ObjStm`
        stream: u32,
        /// Index within the object stream
        index: usize,
    },
}

/// Merged cross-reference data for the whole file.
#[derive(Debug, Clone, Default)]
pub struct CrossRefTable {
    /// Entries by object number
    pub entries: BTreeMap<u32, XrefEntry>,
    /// Trailer dictionary (newest section first, older keys fill gaps)
    pub trailer: Dictionary,
    /// True when the table was rebuilt by scanning
    pub reconstructed: bool,
}

impl CrossRefTable {
    fn merge_entry(&mut self, id: u32, entry: XrefEntry) {
        self.entries.entry(id).or_insert(entry);
    }

    fn merge_trailer(&mut self, trailer: &Dictionary) {
        for (k, v) in trailer {
            self.trailer.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Locate the byte offset recorded after the last `startxref`.
pub fn find_startxref(data: &[u8]) -> PdfResult<usize> {
    let pos = rfind_bytes(data, b"startxref")
        .ok_or_else(|| PdfError::InvalidXref("startxref not found".to_string()))?;
    let (_, offset) = unsigned(&data[pos + b"startxref".len()..])
        .map_err(|_| PdfError::InvalidXref("startxref offset is not a number".to_string()))?;
    let offset = offset as usize;
    if offset >= data.len() {
        return Err(PdfError::InvalidXref(format!(
            "startxref offset {} beyond end of file",
            offset
        )));
    }
    Ok(offset)
}

/// Load the cross-reference data of `data`, rebuilding it if necessary.
pub fn load_xref(data: &[u8]) -> PdfResult<CrossRefTable> {
    match load_chain(data) {
        Ok(table) if table.trailer.contains_key("Root") && !table.entries.is_empty() => Ok(table),
        Ok(_) => {
            log::warn!("Cross-reference chain has no usable trailer, reconstructing");
            reconstruct(data)
        },
        Err(e) => {
            log::warn!("Cross-reference chain unreadable ({}), reconstructing", e);
            reconstruct(data)
        },
    }
}

fn load_chain(data: &[u8]) -> PdfResult<CrossRefTable> {
    let mut table = CrossRefTable::default();
    let mut visited = HashSet::new();
    let mut next = Some(find_startxref(data)?);

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            log::warn!("Cross-reference /Prev loop at offset {}", offset);
            break;
        }
        let section = data.get(offset..).ok_or_else(|| {
            PdfError::InvalidXref(format!("section offset {} beyond end of file", offset))
        })?;

        let trailer = if keyword_tag(b"xref")(section).is_ok() {
            let trailer = parse_table_section(section, offset, &mut table)?;
            if let Some(stm) = trailer.get("XRefStm").and_then(Object::as_integer) {
                if stm >= 0 && visited.insert(stm as usize) {
                    parse_stream_section(data, stm as usize, &mut table)?;
                }
            }
            trailer
        } else {
            parse_stream_section(data, offset, &mut table)?
        };

        table.merge_trailer(&trailer);
        next = trailer
            .get("Prev")
            .and_then(Object::as_integer)
            .filter(|&p| p >= 0)
            .map(|p| p as usize);
    }

    // Chain-only keys must not leak into the merged trailer.
    for key in ["Prev", "XRefStm", "Type", "W", "Index", "Filter", "DecodeParms", "Length"] {
        table.trailer.remove(key);
    }
    Ok(table)
}

/// Parse `xref` subsections up to and including the `trailer` dictionary.
fn parse_table_section(
    section: &[u8],
    offset: usize,
    table: &mut CrossRefTable,
) -> PdfResult<Dictionary> {
    let bad = |reason: &str| PdfError::Parse {
        offset,
        reason: reason.to_string(),
    };
    let (mut input, _) = keyword_tag(b"xref")(section).map_err(|_| bad("missing xref keyword"))?;

    loop {
        if let Ok((rest, _)) = keyword_tag(b"trailer")(input) {
            let (_, trailer) = parse_object(rest).map_err(|_| bad("unreadable trailer"))?;
            return match trailer {
                Object::Dictionary(d) => Ok(d),
                _ => Err(bad("trailer is not a dictionary")),
            };
        }
        let (rest, start) = unsigned(input).map_err(|_| bad("bad subsection header"))?;
        let (rest, count) = unsigned(rest).map_err(|_| bad("bad subsection header"))?;
        input = rest;
        for i in 0..count {
            let (rest, field1) = unsigned(input).map_err(|_| bad("bad xref entry"))?;
            let (rest, field2) = unsigned(rest).map_err(|_| bad("bad xref entry"))?;
            let (rest, kind) = token(rest).map_err(|_| bad("bad xref entry"))?;
            input = rest;
            let id = (start + i) as u32;
            let entry = match kind {
                Token::Keyword(b"n") => XrefEntry::InUse {
                    offset: field1 as usize,
                    gen: field2.min(u64::from(u16::MAX)) as u16,
                },
                Token::Keyword(b"f") => XrefEntry::Free,
                _ => return Err(bad("xref entry type must be n or f")),
            };
            // Object 0 is always the head of the free list.
            if id == 0 {
                continue;
            }
            table.merge_entry(id, entry);
        }
    }
}

fn read_field(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Parse a cross-reference stream at `offset`, returning its dictionary.
fn parse_stream_section(
    data: &[u8],
    offset: usize,
    table: &mut CrossRefTable,
) -> PdfResult<Dictionary> {
    let (_, obj) = parse_object_at(data, offset, &|_| None)?;
    let Object::Stream { dict, data: raw } = obj else {
        return Err(PdfError::InvalidXref(format!(
            "object at {} is neither an xref table nor an xref stream",
            offset
        )));
    };
    if dict.get("Type").and_then(Object::as_name) != Some("XRef") {
        return Err(PdfError::InvalidXref(format!(
            "stream at {} is not /Type /XRef",
            offset
        )));
    }

    let widths: Vec<usize> = dict
        .get("W")
        .and_then(Object::as_array)
        .map(|w| {
            w.iter()
                .map(|x| x.as_integer().unwrap_or(0).max(0) as usize)
                .collect()
        })
        .unwrap_or_default();
    if widths.len() != 3 || widths.iter().any(|&w| w > 8) {
        return Err(PdfError::InvalidXref("xref stream /W must hold three widths".to_string()));
    }
    let size = dict.get("Size").and_then(Object::as_integer).unwrap_or(0).max(0);
    let index: Vec<i64> = match dict.get("Index").and_then(Object::as_array) {
        Some(items) => items.iter().filter_map(Object::as_integer).collect(),
        None => vec![0, size],
    };

    let decoded = decode_stream(&dict, &raw)?;
    let row = widths.iter().sum::<usize>();
    if row == 0 {
        return Err(PdfError::InvalidXref("xref stream row width is zero".to_string()));
    }
    let mut rows = decoded.chunks_exact(row);

    for pair in index.chunks(2) {
        let (start, count) = match pair {
            [s, c] if *s >= 0 && *c >= 0 => (*s as u32, *c as u32),
            _ => break,
        };
        for i in 0..count {
            let Some(entry) = rows.next() else {
                log::warn!("xref stream shorter than its /Index declares");
                return Ok(dict);
            };
            let (f1, rest) = entry.split_at(widths[0]);
            let (f2, f3) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { read_field(f1) };
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse {
                    offset: read_field(f2) as usize,
                    gen: read_field(f3).min(u64::from(u16::MAX)) as u16,
                },
                2 => XrefEntry::Compressed {
                    stream: read_field(f2) as u32,
                    index: read_field(f3) as usize,
                },
                // Unknown types are treated as references to the null object.
                _ => XrefEntry::Free,
            };
            let id = start + i;
            if id != 0 {
                table.merge_entry(id, entry);
            }
        }
    }
    Ok(dict)
}

/// Rebuild cross-reference data by scanning for object headers.
pub fn reconstruct(data: &[u8]) -> PdfResult<CrossRefTable> {
    let mut table = CrossRefTable {
        reconstructed: true,
        ..Default::default()
    };

    let mut line_start = 0usize;
    while line_start < data.len() {
        let line = &data[line_start..];
        if let Some((id, gen)) = object_header(line) {
            let lead = line.iter().take_while(|&&b| b == b' ' || b == b'\t').count();
            // Later definitions override earlier ones (incremental updates).
            table.entries.insert(
                id,
                XrefEntry::InUse {
                    offset: line_start + lead,
                    gen,
                },
            );
        }
        match line.iter().position(|&b| b == b'\n' || b == b'\r') {
            Some(eol) => line_start += eol + 1,
            None => break,
        }
    }

    let mut search_end = data.len();
    while let Some(pos) = rfind_bytes(&data[..search_end], b"trailer") {
        if let Ok((_, Object::Dictionary(trailer))) = parse_object(&data[pos + b"trailer".len()..]) {
            table.merge_trailer(&trailer);
            if table.trailer.contains_key("Root") {
                break;
            }
        }
        search_end = pos;
    }
    for key in ["Prev", "XRefStm"] {
        table.trailer.remove(key);
    }

    if table.entries.is_empty() {
        return Err(PdfError::InvalidXref("no objects found while reconstructing".to_string()));
    }
    log::info!("Reconstructed cross-reference table with {} objects", table.entries.len());
    Ok(table)
}

fn object_header(line: &[u8]) -> Option<(u32, u16)> {
    let trimmed = &line[line.iter().take_while(|&&b| b == b' ' || b == b'\t').count()..];
    if !trimmed.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let (rest, id) = unsigned(trimmed).ok()?;
    let (rest, gen) = unsigned(rest).ok()?;
    keyword_tag(b"obj")(rest).ok()?;
    Some((u32::try_from(id).ok()?, u16::try_from(gen).ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classic_file() -> Vec<u8> {
        let mut pdf = b"%PDF-1.4\n".to_vec();
        let o1 = pdf.len();
        pdf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let xref = pdf.len();
        pdf.extend_from_slice(
            format!(
                "xref\n0 2\n0000000000 65535 f \n{:010} 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                o1, xref
            )
            .as_bytes(),
        );
        pdf
    }

    #[test]
    fn test_classic_table() {
        let pdf = classic_file();
        let table = load_xref(&pdf).unwrap();
        assert!(!table.reconstructed);
        assert_eq!(table.entries.get(&1), Some(&XrefEntry::InUse { offset: 9, gen: 0 }));
        assert!(table.trailer.contains_key("Root"));
    }

    #[test]
    fn test_broken_startxref_reconstructs() {
        let mut pdf = classic_file();
        let pos = rfind_bytes(&pdf, b"startxref").unwrap();
        pdf.truncate(pos);
        pdf.extend_from_slice(b"startxref\n999999\n%%EOF\n");
        let table = load_xref(&pdf).unwrap();
        assert!(table.reconstructed);
        assert_eq!(table.entries.get(&1), Some(&XrefEntry::InUse { offset: 9, gen: 0 }));
        assert!(table.trailer.contains_key("Root"));
    }

    #[test]
    fn test_object_header_detection() {
        assert_eq!(object_header(b"12 0 obj <<"), Some((12, 0)));
        assert_eq!(object_header(b"  7 3 obj"), Some((7, 3)));
        assert_eq!(object_header(b"endobj"), None);
        assert_eq!(object_header(b"1 0 R"), None);
    }
}
