//! JSON carried by signature block QR codes.
//!
//! ```json
//! {
//!   "document": {"title": "...", "filename": "...", "hash": "<sha256>", "signed_at": "<rfc3339>"},
//!   "signers": [{"name": "...", "email": "...", "signed_at": "<rfc3339>", "certificate_serial": "<hex>"}],
//!   "verification": {"verified_by": "...", "verification_timestamp": "<rfc3339>", "verification_method": "..."}
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Complete QR payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrPayload {
    /// The signed document
    pub document: PayloadDocument,
    /// Signers to date, in signing order
    pub signers: Vec<PayloadSigner>,
    /// Who vouches for the signatures
    pub verification: PayloadVerification,
}

/// `document` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadDocument {
    /// Document title
    pub title: String,
    /// File name as uploaded
    pub filename: String,
    /// SHA-256 of the original upload
    pub hash: String,
    /// When this block's signature was applied
    pub signed_at: DateTime<Utc>,
}

/// One entry of the `signers` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadSigner {
    /// Display name
    pub name: String,
    /// E-mail address
    pub email: String,
    /// Signing time
    pub signed_at: DateTime<Utc>,
    /// Serial of the signing certificate, hex
    pub certificate_serial: String,
}

/// `verification` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadVerification {
    /// Issuing authority label
    pub verified_by: String,
    /// When the block was produced
    pub verification_timestamp: DateTime<Utc>,
    /// Method label
    pub verification_method: String,
}

impl QrPayload {
    /// Compact JSON form embedded in the QR code.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_names() {
        let now = Utc::now();
        let payload = QrPayload {
            document: PayloadDocument {
                title: "Lease".to_string(),
                filename: "lease.pdf".to_string(),
                hash: "ab".repeat(32),
                signed_at: now,
            },
            signers: vec![PayloadSigner {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                signed_at: now,
                certificate_serial: "1a2b3c4d".to_string(),
            }],
            verification: PayloadVerification {
                verified_by: "Signflow PKI".to_string(),
                verification_timestamp: now,
                verification_method: "RSA-SHA256 digital signature".to_string(),
            },
        };
        let value: serde_json::Value = serde_json::from_str(&payload.to_json().unwrap()).unwrap();
        assert_eq!(value["document"]["filename"], "lease.pdf");
        assert_eq!(value["signers"][0]["certificate_serial"], "1a2b3c4d");
        assert_eq!(value["verification"]["verified_by"], "Signflow PKI");
        assert!(value["document"]["signed_at"].as_str().unwrap().contains('T'));
    }
}
