//! PDF object parser.
//!
//! Builds [`Object`] values from the token stream, including indirect
//! object definitions and their stream payloads.
//!
//! PDF Spec: Section 7.3 - Objects, Section 7.3.10 - Indirect Objects

use super::error::{PdfError, PdfResult};
use super::lexer::{fail, is_whitespace, keyword_tag, token, unsigned, Token};
use super::object::{Dictionary, Object, ObjectRef};
use bytes::Bytes;
use nom::{error::ErrorKind, IResult};

/// Parse a single direct object (which may be an indirect reference).
pub fn parse_object(input: &[u8]) -> IResult<&[u8], Object> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Integer(i) => {
            if let Ok((after, r)) = reference_tail(rest, i) {
                return Ok((after, Object::Reference(r)));
            }
            Ok((rest, Object::Integer(i)))
        },
        Token::Real(r) => Ok((rest, Object::Real(r))),
        Token::Str(s) => Ok((rest, Object::String(s))),
        Token::Name(n) => Ok((rest, Object::Name(n))),
        Token::Keyword(b"true") => Ok((rest, Object::Boolean(true))),
        Token::Keyword(b"false") => Ok((rest, Object::Boolean(false))),
        Token::Keyword(b"null") => Ok((rest, Object::Null)),
        Token::ArrayOpen => array_body(rest),
        Token::DictOpen => dict_body(rest),
        _ => fail(input, ErrorKind::Alt),
    }
}

fn reference_tail(input: &[u8], id: i64) -> IResult<&[u8], ObjectRef> {
    if !(0..=i64::from(u32::MAX)).contains(&id) {
        return fail(input, ErrorKind::Verify);
    }
    let (rest, gen) = unsigned(input)?;
    let (rest, _) = keyword_tag(b"R")(rest)?;
    Ok((rest, ObjectRef::new(id as u32, gen.min(u64::from(u16::MAX)) as u16)))
}

fn array_body(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut items = Vec::new();
    loop {
        let (rest, tok) = token(input)?;
        if tok == Token::ArrayClose {
            return Ok((rest, Object::Array(items)));
        }
        let (rest, item) = parse_object(input)?;
        items.push(item);
        input = rest;
    }
}

fn dict_body(mut input: &[u8]) -> IResult<&[u8], Object> {
    let mut dict = Dictionary::new();
    loop {
        let (rest, tok) = token(input)?;
        match tok {
            Token::DictClose => return Ok((rest, Object::Dictionary(dict))),
            Token::Name(key) => {
                let (rest, val) = parse_object(rest)?;
                dict.insert(key, val);
                input = rest;
            },
            _ => return fail(input, ErrorKind::Verify),
        }
    }
}

/// Parse `id gen obj ... endobj`, including a stream payload if present.
///
/// `resolve_length` is consulted when `/Length` is an indirect reference.
/// When the declared length does not line up with `endstream`, the payload
/// is recovered by scanning for the keyword instead.
pub fn parse_indirect_object<'a>(
    input: &'a [u8],
    resolve_length: &dyn Fn(ObjectRef) -> Option<usize>,
) -> IResult<&'a [u8], (ObjectRef, Object)> {
    let (rest, id) = unsigned(input)?;
    let (rest, gen) = unsigned(rest)?;
    let (rest, _) = keyword_tag(b"obj")(rest)?;
    let (rest, obj) = parse_object(rest)?;
    let (rest, obj) = match obj {
        Object::Dictionary(dict) => stream_tail(rest, dict, resolve_length)?,
        other => (rest, other),
    };
    let rest = match keyword_tag(b"endobj")(rest) {
        Ok((after, _)) => after,
        Err(_) => {
            log::debug!("Object {} {} missing endobj", id, gen);
            rest
        },
    };
    let r = ObjectRef::new(
        id.min(u64::from(u32::MAX)) as u32,
        gen.min(u64::from(u16::MAX)) as u16,
    );
    Ok((rest, (r, obj)))
}

fn stream_tail<'a>(
    input: &'a [u8],
    dict: Dictionary,
    resolve_length: &dyn Fn(ObjectRef) -> Option<usize>,
) -> IResult<&'a [u8], Object> {
    let trimmed = skip_whitespace(input);
    let Some(after_kw) = trimmed.strip_prefix(b"stream".as_slice()) else {
        return Ok((input, Object::Dictionary(dict)));
    };
    let body = if let Some(b) = after_kw.strip_prefix(b"\r\n".as_slice()) {
        b
    } else if let Some(b) = after_kw.strip_prefix(b"\n".as_slice()) {
        b
    } else if let Some(b) = after_kw.strip_prefix(b"\r".as_slice()) {
        b
    } else {
        after_kw
    };

    let declared = match dict.get("Length") {
        Some(Object::Integer(n)) if *n >= 0 => Some(*n as usize),
        Some(Object::Reference(r)) => resolve_length(*r),
        _ => None,
    };
    let length = declared
        .filter(|&n| n <= body.len() && skip_whitespace(&body[n..]).starts_with(b"endstream"))
        .or_else(|| {
            log::debug!("Stream /Length unusable, scanning for endstream");
            find_endstream(body)
        });
    let Some(length) = length else {
        return fail(input, ErrorKind::Eof);
    };

    let data = Bytes::copy_from_slice(&body[..length]);
    let after = skip_whitespace(&body[length..]);
    let rest = after.strip_prefix(b"endstream".as_slice()).unwrap_or(after);
    Ok((rest, Object::Stream { dict, data }))
}

fn skip_whitespace(input: &[u8]) -> &[u8] {
    let n = input.iter().take_while(|&&b| is_whitespace(b)).count();
    &input[n..]
}

/// Position of `endstream`, with the end-of-line marker before it removed.
fn find_endstream(body: &[u8]) -> Option<usize> {
    let pos = find_bytes(body, b"endstream")?;
    let mut end = pos;
    if end > 0 && body[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && body[end - 1] == b'\r' {
        end -= 1;
    }
    Some(end)
}

/// First occurrence of `needle` in `haystack`.
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Last occurrence of `needle` in `haystack`.
pub fn rfind_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Parse the indirect object starting at `offset` in `data`.
pub fn parse_object_at(
    data: &[u8],
    offset: usize,
    resolve_length: &dyn Fn(ObjectRef) -> Option<usize>,
) -> PdfResult<(ObjectRef, Object)> {
    let slice = data.get(offset..).ok_or_else(|| PdfError::Parse {
        offset,
        reason: "offset beyond end of file".to_string(),
    })?;
    parse_indirect_object(slice, resolve_length)
        .map(|(_, parsed)| parsed)
        .map_err(|e| PdfError::Parse {
            offset,
            reason: format!("{:?}", e.map_input(|i: &[u8]| i.len())),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lengths(_: ObjectRef) -> Option<usize> {
        None
    }

    #[test]
    fn test_reference_vs_integers() {
        let (_, obj) = parse_object(b"[1 0 R 2 3]").unwrap();
        assert_eq!(
            obj,
            Object::Array(vec![
                Object::Reference(ObjectRef::new(1, 0)),
                Object::Integer(2),
                Object::Integer(3),
            ])
        );
    }

    #[test]
    fn test_nested_dictionary() {
        let (_, obj) = parse_object(b"<< /Type /Page /Box [0 0 612 792] /R << /F true >> >>").unwrap();
        let dict = obj.as_dict().unwrap();
        assert_eq!(dict.get("Type").and_then(Object::as_name), Some("Page"));
        let inner = dict.get("R").and_then(Object::as_dict).unwrap();
        assert_eq!(inner.get("F"), Some(&Object::Boolean(true)));
    }

    #[test]
    fn test_stream_with_exact_length() {
        let src = b"4 0 obj\n<< /Length 5 >>\nstream\nhello\nendstream\nendobj\n";
        let (_, (r, obj)) = parse_indirect_object(src, &no_lengths).unwrap();
        assert_eq!(r, ObjectRef::new(4, 0));
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"hello"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_with_wrong_length_is_recovered() {
        let src = b"4 0 obj << /Length 99 >> stream\r\nabc\r\nendstream endobj";
        let (_, (_, obj)) = parse_indirect_object(src, &no_lengths).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"abc"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_with_indirect_length() {
        let src = b"4 0 obj << /Length 9 0 R >> stream\nab\nendstream endobj";
        let resolve = |r: ObjectRef| if r.id == 9 { Some(2) } else { None };
        let (_, (_, obj)) = parse_indirect_object(src, &resolve).unwrap();
        match obj {
            Object::Stream { data, .. } => assert_eq!(&data[..], b"ab"),
            other => panic!("expected stream, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_object_at_reports_offset() {
        let err = parse_object_at(b"garbage", 0, &no_lengths).unwrap_err();
        assert!(matches!(err, PdfError::Parse { offset: 0, .. }));
    }
}
