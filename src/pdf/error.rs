//! Error types for the PDF core.
//!
//! These errors never leave the watermarking layer uncategorized: the
//! [`crate::watermark`] boundary maps them onto [`crate::Error`].

/// Result type alias for PDF core operations.
pub type PdfResult<T> = std::result::Result<T, PdfError>;

/// Error types that can occur while reading or rewriting a PDF.
#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    /// Invalid PDF header (expected '%PDF-')
    #[error("Invalid PDF header: expected '%PDF-'")]
    InvalidHeader,

    /// Parse error at specific byte offset
    #[error("Failed to parse object at byte {offset}: {reason}")]
    Parse {
        /// Byte offset where the error occurred
        offset: usize,
        /// Reason for parse failure
        reason: String,
    },

    /// Cross-reference data is missing or unusable and could not be rebuilt
    #[error("Invalid cross-reference table: {0}")]
    InvalidXref(String),

    /// Referenced object not found in the cross-reference table
    #[error("Object not found: {0} {1} R")]
    ObjectNotFound(u32, u16),

    /// Object has the wrong type
    #[error("Invalid object type: expected {expected}, found {found}")]
    InvalidObjectType {
        /// Expected object type
        expected: &'static str,
        /// Actual object type found
        found: &'static str,
    },

    /// Structurally invalid document (missing catalog, empty page tree, ...)
    #[error("Invalid PDF: {0}")]
    InvalidPdf(String),

    /// Stream decoding error
    #[error("Stream decoding error: {0}")]
    Decode(String),

    /// Unsupported stream filter
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// The document is encrypted and has not been decrypted
    #[error("Document is encrypted")]
    Encrypted,

    /// The blank user password does not open the document
    #[error("Document requires a password")]
    PasswordRequired,

    /// Unsupported security handler or encryption parameters
    #[error("Unsupported encryption: {0}")]
    UnsupportedEncryption(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
