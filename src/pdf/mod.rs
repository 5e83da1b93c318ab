//! Minimal PDF core used by the watermarker.
//!
//! Reads classic and compressed cross-reference sections, object streams and
//! standard-security-handler encryption, and writes whole documents back out
//! with a classic xref table. Page content is never interpreted: it is
//! carried through byte for byte and new drawing is appended in separate
//! content streams.
//!
//! # Modules
//!
//! - [`lexer`] / [`parser`]: nom-based tokenizer and object parser
//! - [`xref`]: cross-reference chain loading and reconstruction
//! - [`decoders`]: FlateDecode with predictors
//! - [`encryption`]: standard security handler (RC4, AES-128, AES-256)
//! - [`document`]: in-memory document and page tree
//! - [`writer`]: serializer and content stream builder

pub mod decoders;
pub mod document;
pub mod encryption;
pub mod error;
pub mod lexer;
pub mod object;
pub mod parser;
pub mod writer;
pub mod xref;

pub use document::{PdfDocument, Rect};
pub use error::{PdfError, PdfResult};
pub use object::{Dictionary, Object, ObjectRef};
