//! SHA-256 helpers. Every hash in the engine is lowercase hex of SHA-256.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// True when `s` looks like a SHA-256 hex digest.
pub fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Decode a hex SHA-256 digest into its 32 raw bytes.
pub fn decode_sha256_hex(s: &str) -> Result<[u8; 32]> {
    if !is_sha256_hex(s) {
        return Err(Error::InvalidRequest(format!(
            "expected a 64 character hex SHA-256 digest, got {} characters",
            s.len()
        )));
    }
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out)
        .map_err(|e| Error::InvalidRequest(format!("invalid digest hex: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_decode_rejects_short() {
        assert!(decode_sha256_hex("abcd").is_err());
    }

    #[test]
    fn test_decode_round_trip() {
        let hex = sha256_hex(b"document");
        let raw = decode_sha256_hex(&hex).unwrap();
        assert_eq!(hex::encode(raw), hex);
    }
}
