//! PDF tokenizer.
//!
//! Splits PDF bytes into tokens: numbers, strings (escapes already decoded),
//! names (`#xx` escapes already decoded), bare keywords and the four
//! container delimiters. Whitespace and `%` comments are skipped before
//! every token.
//!
//! PDF Spec: Section 7.2 - Lexical Conventions

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till, take_while, take_while1},
    character::complete::{char, digit0, digit1, one_of},
    combinator::{opt, recognize, value},
    error::{Error as NomError, ErrorKind},
    multi::many0_count,
    sequence::{pair, preceded, tuple},
    IResult,
};

/// A lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token<'a> {
    /// Integer number
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal or hex string, decoded to raw bytes
    Str(Vec<u8>),
    /// Name without the leading slash
    Name(String),
    /// Bare keyword such as `obj`, `R`, `true`, `trailer`
    Keyword(&'a [u8]),
    /// `[`
    ArrayOpen,
    /// `]`
    ArrayClose,
    /// `<<`
    DictOpen,
    /// `>>`
    DictClose,
}

/// PDF Spec: Table 1 - White-space characters
pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n' | b'\x0c' | b'\0')
}

/// PDF Spec: Table 2 - Delimiter characters
pub fn is_delimiter(b: u8) -> bool {
    matches!(
        b,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// Any byte that is neither whitespace nor a delimiter.
pub fn is_regular(b: u8) -> bool {
    !is_whitespace(b) && !is_delimiter(b)
}

/// Skip whitespace and comments.
pub fn ws(input: &[u8]) -> IResult<&[u8], ()> {
    value(
        (),
        many0_count(alt((
            value((), take_while1(is_whitespace)),
            value(
                (),
                preceded(char('%'), take_till(|b| b == b'\r' || b == b'\n')),
            ),
        ))),
    )(input)
}

pub(crate) fn fail<T>(input: &[u8], kind: ErrorKind) -> IResult<&[u8], T> {
    Err(nom::Err::Error(NomError::new(input, kind)))
}

fn number(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, text) = recognize(pair(
        opt(one_of("+-")),
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
    ))(input)?;

    let text = std::str::from_utf8(text).unwrap_or("0");
    if text.contains('.') {
        Ok((rest, Token::Real(text.parse().unwrap_or(0.0))))
    } else {
        match text.parse::<i64>() {
            Ok(i) => Ok((rest, Token::Integer(i))),
            // Out of range integers degrade to reals rather than failing the file
            Err(_) => Ok((rest, Token::Real(text.parse().unwrap_or(0.0)))),
        }
    }
}

fn literal_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (mut rest, _) = char('(')(input)?;
    let mut out = Vec::new();
    let mut depth = 1usize;

    loop {
        let Some((&b, tail)) = rest.split_first() else {
            return fail(input, ErrorKind::Eof);
        };
        rest = tail;
        match b {
            b'\\' => {
                let Some((&esc, tail)) = rest.split_first() else {
                    return fail(input, ErrorKind::Eof);
                };
                rest = tail;
                match esc {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0c),
                    b'0'..=b'7' => {
                        let mut code = u32::from(esc - b'0');
                        for _ in 0..2 {
                            match rest.first() {
                                Some(&d @ b'0'..=b'7') => {
                                    code = code * 8 + u32::from(d - b'0');
                                    rest = &rest[1..];
                                },
                                _ => break,
                            }
                        }
                        out.push((code & 0xff) as u8);
                    },
                    // Line continuation
                    b'\r' => {
                        if rest.first() == Some(&b'\n') {
                            rest = &rest[1..];
                        }
                    },
                    b'\n' => {},
                    other => out.push(other),
                }
            },
            b'(' => {
                depth += 1;
                out.push(b);
            },
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((rest, Token::Str(out)));
                }
                out.push(b);
            },
            _ => out.push(b),
        }
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode hex digits, ignoring whitespace. A trailing odd digit is
/// completed with zero.
pub fn decode_hex_digits(raw: &[u8]) -> Vec<u8> {
    let nibbles: Vec<u8> = raw.iter().filter_map(|&b| hex_value(b)).collect();
    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

fn hex_string(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, (_, body, _)) = tuple((char('<'), take_till(|b| b == b'>'), char('>')))(input)?;
    Ok((rest, Token::Str(decode_hex_digits(body))))
}

fn name(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, raw) = preceded(char('/'), take_while(is_regular))(input)?;
    let mut decoded = String::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'#' && i + 2 < raw.len() {
            if let (Some(hi), Some(lo)) = (hex_value(raw[i + 1]), hex_value(raw[i + 2])) {
                decoded.push(char::from((hi << 4) | lo));
                i += 3;
                continue;
            }
        }
        // Names are byte strings; map each byte to the same code point so
        // the writer can reproduce them exactly.
        decoded.push(char::from(raw[i]));
        i += 1;
    }
    Ok((rest, Token::Name(decoded)))
}

fn keyword(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (rest, word) = take_while1(is_regular)(input)?;
    Ok((rest, Token::Keyword(word)))
}

/// Read the next token, skipping leading whitespace and comments.
pub fn token(input: &[u8]) -> IResult<&[u8], Token<'_>> {
    let (input, _) = ws(input)?;
    alt((
        value(Token::DictOpen, tag("<<")),
        value(Token::DictClose, tag(">>")),
        value(Token::ArrayOpen, char('[')),
        value(Token::ArrayClose, char(']')),
        hex_string,
        literal_string,
        name,
        number,
        keyword,
    ))(input)
}

/// Match a specific keyword token.
pub fn keyword_tag<'a>(word: &'static [u8]) -> impl Fn(&'a [u8]) -> IResult<&'a [u8], ()> {
    move |input: &'a [u8]| {
        let (rest, tok) = token(input)?;
        match tok {
            Token::Keyword(k) if k == word => Ok((rest, ())),
            _ => fail(input, ErrorKind::Tag),
        }
    }
}

/// Match an unsigned integer token.
pub fn unsigned(input: &[u8]) -> IResult<&[u8], u64> {
    let (rest, tok) = token(input)?;
    match tok {
        Token::Integer(i) if i >= 0 => Ok((rest, i as u64)),
        _ => fail(input, ErrorKind::Digit),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_tokens(mut input: &[u8]) -> Vec<Token<'_>> {
        let mut out = Vec::new();
        while let Ok((rest, tok)) = token(input) {
            out.push(tok);
            input = rest;
        }
        out
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            all_tokens(b"42 -7 3.5 .25 +4."),
            vec![
                Token::Integer(42),
                Token::Integer(-7),
                Token::Real(3.5),
                Token::Real(0.25),
                Token::Real(4.0),
            ]
        );
    }

    #[test]
    fn test_literal_string_escapes() {
        let toks = all_tokens(b"(a\\(b\\)c\\n\\101 (nested) \\\nx)");
        assert_eq!(toks, vec![Token::Str(b"a(b)c\nA (nested) x".to_vec())]);
    }

    #[test]
    fn test_hex_string_odd_digits() {
        assert_eq!(all_tokens(b"<48 65 6>"), vec![Token::Str(vec![0x48, 0x65, 0x60])]);
    }

    #[test]
    fn test_name_escapes() {
        assert_eq!(
            all_tokens(b"/A#20B /Type"),
            vec![Token::Name("A B".to_string()), Token::Name("Type".to_string())]
        );
    }

    #[test]
    fn test_comments_and_delimiters() {
        let toks = all_tokens(b"% comment\n<< /K [1 R] >>");
        assert_eq!(
            toks,
            vec![
                Token::DictOpen,
                Token::Name("K".to_string()),
                Token::ArrayOpen,
                Token::Integer(1),
                Token::Keyword(b"R"),
                Token::ArrayClose,
                Token::DictClose,
            ]
        );
    }
}
