//! PDF standard security handler (decryption only).
//!
//! Opening a protected document means authenticating a password against the
//! `/Encrypt` dictionary and then decrypting every string and stream with a
//! per-object key. The watermarker only ever tries the blank password, which
//! opens documents that carry permissions restrictions but no open password.
//!
//! Supported:
//! - RC4 40-bit and 128-bit (V1/V2, R2/R3)
//! - Crypt filters with V2 (RC4), AESV2 (AES-128) and AESV3 (AES-256) (V4/V5)
//! - AES-256 with revisions 5 and 6
//!
//! PDF Spec: Section 7.6 - Encryption

mod keys;
mod rc4;

use super::error::{PdfError, PdfResult};
use super::object::{Dictionary, Object, ObjectRef};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, KeyIvInit};
use bytes::Bytes;
use keys::{LegacyParams, ModernParams};
use md5::{Digest, Md5};

pub use rc4::rc4;

/// Cipher applied to a class of objects (strings or streams).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    /// Identity crypt filter: data is stored in the clear
    Identity,
    /// RC4 with a per-object key
    Rc4,
    /// AES-128-CBC with a per-object key
    Aes128,
    /// AES-256-CBC with the file key
    Aes256,
}

/// Authenticated decryption context for one document.
#[derive(Debug, Clone)]
pub struct SecurityHandler {
    file_key: Vec<u8>,
    strings: CryptMethod,
    streams: CryptMethod,
    encrypt_metadata: bool,
}

fn bytes_of<'a>(dict: &'a Dictionary, key: &str) -> &'a [u8] {
    dict.get(key).and_then(Object::as_string).unwrap_or(&[])
}

fn crypt_filter_method(dict: &Dictionary, filter_key: &str) -> PdfResult<(CryptMethod, Option<usize>)> {
    let name = dict.get(filter_key).and_then(Object::as_name).unwrap_or("Identity");
    if name == "Identity" {
        return Ok((CryptMethod::Identity, None));
    }
    let filter = dict
        .get("CF")
        .and_then(Object::as_dict)
        .and_then(|cf| cf.get(name))
        .and_then(Object::as_dict)
        .ok_or_else(|| PdfError::UnsupportedEncryption(format!("crypt filter {} not defined", name)))?;
    let length = filter
        .get("Length")
        .and_then(Object::as_integer)
        .map(|l| if l > 32 { (l / 8) as usize } else { l as usize });
    let method = match filter.get("CFM").and_then(Object::as_name).unwrap_or("None") {
        "None" => CryptMethod::Identity,
        "V2" => CryptMethod::Rc4,
        "AESV2" => CryptMethod::Aes128,
        "AESV3" => CryptMethod::Aes256,
        other => {
            return Err(PdfError::UnsupportedEncryption(format!(
                "crypt filter method {}",
                other
            )))
        },
    };
    Ok((method, length))
}

impl SecurityHandler {
    /// Authenticate `password` (as user, then as owner) against an
    /// `/Encrypt` dictionary.
    ///
    /// Returns [`PdfError::PasswordRequired`] when the password opens
    /// neither role.
    pub fn open(encrypt: &Dictionary, file_id: &[u8], password: &[u8]) -> PdfResult<Self> {
        let filter = encrypt.get("Filter").and_then(Object::as_name).unwrap_or("");
        if filter != "Standard" {
            return Err(PdfError::UnsupportedEncryption(format!(
                "security handler /{}",
                filter
            )));
        }
        let version = encrypt.get("V").and_then(Object::as_integer).unwrap_or(0);
        let revision = encrypt.get("R").and_then(Object::as_integer).unwrap_or(2);
        let encrypt_metadata = encrypt
            .get("EncryptMetadata")
            .and_then(Object::as_bool)
            .unwrap_or(true);

        let (strings, streams, cf_length) = match version {
            1 => (CryptMethod::Rc4, CryptMethod::Rc4, Some(5)),
            2 | 3 => (CryptMethod::Rc4, CryptMethod::Rc4, None),
            4 | 5 => {
                let (strings, s_len) = crypt_filter_method(encrypt, "StrF")?;
                let (streams, t_len) = crypt_filter_method(encrypt, "StmF")?;
                (strings, streams, s_len.or(t_len))
            },
            other => {
                return Err(PdfError::UnsupportedEncryption(format!("/V {}", other)));
            },
        };

        let file_key = if revision >= 5 {
            let params = ModernParams {
                revision,
                owner: bytes_of(encrypt, "O"),
                user: bytes_of(encrypt, "U"),
                owner_key: bytes_of(encrypt, "OE"),
                user_key: bytes_of(encrypt, "UE"),
            };
            keys::modern_file_key(password, &params).ok_or(PdfError::PasswordRequired)?
        } else {
            let key_len = match version {
                1 => 5,
                4 => cf_length.unwrap_or(16),
                _ => encrypt
                    .get("Length")
                    .and_then(Object::as_integer)
                    .map(|bits| (bits / 8) as usize)
                    .unwrap_or(5),
            }
            .clamp(5, 16);
            let params = LegacyParams {
                revision,
                key_len,
                owner: bytes_of(encrypt, "O"),
                user: bytes_of(encrypt, "U"),
                permissions: encrypt.get("P").and_then(Object::as_integer).unwrap_or(0) as i32,
                file_id,
                encrypt_metadata,
            };
            keys::legacy_authenticate_user(password, &params)
                .or_else(|| keys::legacy_authenticate_owner(password, &params))
                .ok_or(PdfError::PasswordRequired)?
        };

        log::debug!(
            "Authenticated standard security handler V{} R{} (strings {:?}, streams {:?})",
            version,
            revision,
            strings,
            streams
        );
        Ok(Self {
            file_key,
            strings,
            streams,
            encrypt_metadata,
        })
    }

    /// Per-object key: Algorithm 1 for RC4/AES-128, the file key for AES-256.
    fn object_key(&self, r: ObjectRef, method: CryptMethod) -> Vec<u8> {
        if method == CryptMethod::Aes256 {
            return self.file_key.clone();
        }
        let mut hasher = Md5::new();
        hasher.update(&self.file_key);
        hasher.update(&r.id.to_le_bytes()[..3]);
        hasher.update(r.gen.to_le_bytes());
        if method == CryptMethod::Aes128 {
            hasher.update(b"sAlT");
        }
        let hash = hasher.finalize();
        hash[..(self.file_key.len() + 5).min(16)].to_vec()
    }

    fn decrypt_bytes(&self, r: ObjectRef, method: CryptMethod, data: &[u8]) -> Vec<u8> {
        match method {
            CryptMethod::Identity => data.to_vec(),
            CryptMethod::Rc4 => rc4(&self.object_key(r, method), data),
            CryptMethod::Aes128 | CryptMethod::Aes256 => {
                let key = self.object_key(r, method);
                aes_cbc_decrypt(&key, data).unwrap_or_else(|| {
                    log::warn!("AES decryption failed for object {}, keeping raw bytes", r);
                    data.to_vec()
                })
            },
        }
    }

    /// Decrypt all strings and stream payloads inside the object `r`.
    pub fn decrypt_object(&self, r: ObjectRef, obj: Object) -> Object {
        match obj {
            Object::String(s) => Object::String(self.decrypt_bytes(r, self.strings, &s)),
            Object::Array(items) => {
                Object::Array(items.into_iter().map(|o| self.decrypt_object(r, o)).collect())
            },
            Object::Dictionary(dict) => Object::Dictionary(self.decrypt_dict(r, dict)),
            Object::Stream { dict, data } => {
                let is_xref = dict.get("Type").and_then(Object::as_name) == Some("XRef");
                let clear_metadata = !self.encrypt_metadata
                    && dict.get("Type").and_then(Object::as_name) == Some("Metadata");
                let names_identity = matches!(
                    dict.get("Filter"),
                    Some(Object::Name(n)) if n == "Crypt"
                );
                let data = if is_xref || clear_metadata || names_identity {
                    data
                } else {
                    Bytes::from(self.decrypt_bytes(r, self.streams, &data))
                };
                Object::Stream {
                    dict: self.decrypt_dict(r, dict),
                    data,
                }
            },
            other => other,
        }
    }

    fn decrypt_dict(&self, r: ObjectRef, dict: Dictionary) -> Dictionary {
        dict.into_iter()
            .map(|(k, v)| (k, self.decrypt_object(r, v)))
            .collect()
    }
}

type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-CBC with the IV in the first 16 bytes and PKCS#7 padding.
fn aes_cbc_decrypt(key: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < 16 {
        return Some(Vec::new());
    }
    let (iv, body) = data.split_at(16);
    if body.len() % 16 != 0 {
        return None;
    }
    let mut buf = body.to_vec();
    let plain = match key.len() {
        16 => Aes128CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .ok()?
            .to_vec(),
        32 => Aes256CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_mut::<NoPadding>(&mut buf)
            .ok()?
            .to_vec(),
        _ => return None,
    };
    let pad = plain.last().copied().map(usize::from).unwrap_or(0);
    if (1..=16).contains(&pad)
        && pad <= plain.len()
        && plain[plain.len() - pad..].iter().all(|&b| usize::from(b) == pad)
    {
        Some(plain[..plain.len() - pad].to_vec())
    } else {
        Some(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_public_key_handler() {
        let mut dict = Dictionary::new();
        dict.insert("Filter".to_string(), Object::name("Adobe.PubSec"));
        assert!(matches!(
            SecurityHandler::open(&dict, b"", b""),
            Err(PdfError::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn test_object_key_length_rc4_40() {
        let handler = SecurityHandler {
            file_key: vec![1, 2, 3, 4, 5],
            strings: CryptMethod::Rc4,
            streams: CryptMethod::Rc4,
            encrypt_metadata: true,
        };
        assert_eq!(handler.object_key(ObjectRef::new(4, 0), CryptMethod::Rc4).len(), 10);
    }

    #[test]
    fn test_identity_leaves_strings() {
        let handler = SecurityHandler {
            file_key: vec![0; 16],
            strings: CryptMethod::Identity,
            streams: CryptMethod::Identity,
            encrypt_metadata: true,
        };
        let obj = handler.decrypt_object(ObjectRef::new(1, 0), Object::String(b"plain".to_vec()));
        assert_eq!(obj, Object::String(b"plain".to_vec()));
    }

    #[test]
    fn test_rc4_string_decrypts_with_object_key() {
        let handler = SecurityHandler {
            file_key: vec![9; 5],
            strings: CryptMethod::Rc4,
            streams: CryptMethod::Rc4,
            encrypt_metadata: true,
        };
        let r = ObjectRef::new(7, 0);
        let key = handler.object_key(r, CryptMethod::Rc4);
        let cipher = rc4(&key, b"Hello");
        let obj = handler.decrypt_object(r, Object::String(cipher));
        assert_eq!(obj, Object::String(b"Hello".to_vec()));
    }
}
