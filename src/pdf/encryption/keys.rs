//! Standard security handler key derivation and password checks.
//!
//! PDF Spec: Section 7.6.4.3 - Algorithms 2, 4, 5 and 7 (R2-R4)
//! ISO 32000-2: Algorithms 2.A and 2.B (R5/R6)

use super::rc4::rc4;
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use md5::{Digest, Md5};
use sha2::{Sha256, Sha384, Sha512};

/// Password padding string.
///
/// PDF Spec: Algorithm 2, step (a)
pub const PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// Parameters of a revision 2-4 handler.
#[derive(Debug, Clone)]
pub struct LegacyParams<'a> {
    /// /R
    pub revision: i64,
    /// Key length in bytes
    pub key_len: usize,
    /// /O
    pub owner: &'a [u8],
    /// /U
    pub user: &'a [u8],
    /// /P
    pub permissions: i32,
    /// First element of the trailer /ID
    pub file_id: &'a [u8],
    /// /EncryptMetadata
    pub encrypt_metadata: bool,
}

/// Pad or truncate a password to 32 bytes.
pub fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = PADDING;
    let n = password.len().min(32);
    padded[..n].copy_from_slice(&password[..n]);
    if n < 32 {
        padded[n..].copy_from_slice(&PADDING[..32 - n]);
    }
    padded
}

/// Algorithm 2: file key from a user password.
pub fn legacy_file_key(password: &[u8], p: &LegacyParams<'_>) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(p.owner);
    hasher.update(p.permissions.to_le_bytes());
    hasher.update(p.file_id);
    if p.revision >= 4 && !p.encrypt_metadata {
        hasher.update([0xFF; 4]);
    }
    let mut hash = hasher.finalize().to_vec();
    let n = p.key_len.min(16);
    if p.revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash[..n]).to_vec();
        }
    }
    hash.truncate(n);
    hash
}

/// Algorithms 4/5: expected /U value for a file key.
fn legacy_user_hash(key: &[u8], p: &LegacyParams<'_>) -> Vec<u8> {
    if p.revision == 2 {
        return rc4(key, &PADDING);
    }
    let mut hasher = Md5::new();
    hasher.update(PADDING);
    hasher.update(p.file_id);
    let mut hash = rc4(key, &hasher.finalize());
    for i in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|b| b ^ i).collect();
        hash = rc4(&round_key, &hash);
    }
    hash
}

/// Algorithm 6: authenticate a user password, returning the file key.
pub fn legacy_authenticate_user(password: &[u8], p: &LegacyParams<'_>) -> Option<Vec<u8>> {
    let key = legacy_file_key(password, p);
    let expected = legacy_user_hash(&key, p);
    let compare = if p.revision == 2 { 32 } else { 16 };
    if p.user.len() >= compare && expected.len() >= compare && p.user[..compare] == expected[..compare] {
        Some(key)
    } else {
        None
    }
}

/// Algorithm 7: authenticate an owner password by recovering the user
/// password from /O.
pub fn legacy_authenticate_owner(password: &[u8], p: &LegacyParams<'_>) -> Option<Vec<u8>> {
    let n = p.key_len.min(16);
    let mut hash = Md5::digest(pad_password(password)).to_vec();
    if p.revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    let rc4_key = &hash[..n];
    let mut user_password = p.owner.to_vec();
    if p.revision == 2 {
        user_password = rc4(rc4_key, &user_password);
    } else {
        for i in (0..=19u8).rev() {
            let round_key: Vec<u8> = rc4_key.iter().map(|b| b ^ i).collect();
            user_password = rc4(&round_key, &user_password);
        }
    }
    legacy_authenticate_user(&user_password, p)
}

/// Algorithm 2.B: the iterated hash of revision 6.
/// Revision 5 uses a single SHA-256.
pub fn hash_r6(password: &[u8], salt: &[u8], user_key: &[u8], revision: i64) -> Vec<u8> {
    let mut sha = Sha256::new();
    sha.update(password);
    sha.update(salt);
    sha.update(user_key);
    let mut k = sha.finalize().to_vec();
    if revision < 6 {
        return k;
    }

    let mut round = 0u32;
    loop {
        let mut k1 = Vec::with_capacity(64 * (password.len() + k.len() + user_key.len()));
        for _ in 0..64 {
            k1.extend_from_slice(password);
            k1.extend_from_slice(&k);
            k1.extend_from_slice(user_key);
        }
        let Some(e) = aes128_cbc_encrypt_raw(&k[..16], &k[16..32], &k1) else {
            return k;
        };
        let modulo = e[..16].iter().map(|&b| u32::from(b)).sum::<u32>() % 3;
        k = match modulo {
            0 => Sha256::digest(&e).to_vec(),
            1 => Sha384::digest(&e).to_vec(),
            _ => Sha512::digest(&e).to_vec(),
        };
        round += 1;
        let last = e.last().copied().map(u32::from).unwrap_or(0);
        if round >= 64 && last + 32 <= round {
            break;
        }
    }
    k.truncate(32);
    k
}

/// Parameters of a revision 5/6 handler.
#[derive(Debug, Clone)]
pub struct ModernParams<'a> {
    /// /R
    pub revision: i64,
    /// /O (48 bytes)
    pub owner: &'a [u8],
    /// /U (48 bytes)
    pub user: &'a [u8],
    /// /OE (32 bytes)
    pub owner_key: &'a [u8],
    /// /UE (32 bytes)
    pub user_key: &'a [u8],
}

/// Algorithm 2.A for the user and owner passwords. Returns the 32-byte file key.
pub fn modern_file_key(password: &[u8], p: &ModernParams<'_>) -> Option<Vec<u8>> {
    if p.user.len() < 48 || p.owner.len() < 48 || p.user_key.len() < 32 || p.owner_key.len() < 32 {
        return None;
    }
    let password = &password[..password.len().min(127)];

    let user_check = hash_r6(password, &p.user[32..40], &[], p.revision);
    if user_check[..32] == p.user[..32] {
        let intermediate = hash_r6(password, &p.user[40..48], &[], p.revision);
        return aes256_cbc_decrypt_raw(&intermediate, &[0u8; 16], &p.user_key[..32]);
    }

    let owner_check = hash_r6(password, &p.owner[32..40], &p.user[..48], p.revision);
    if owner_check[..32] == p.owner[..32] {
        let intermediate = hash_r6(password, &p.owner[40..48], &p.user[..48], p.revision);
        return aes256_cbc_decrypt_raw(&intermediate, &[0u8; 16], &p.owner_key[..32]);
    }
    None
}

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

fn aes128_cbc_encrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut buf = data.to_vec();
    let len = buf.len();
    let cipher = Aes128CbcEnc::new_from_slices(key, iv).ok()?;
    cipher
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .ok()
        .map(<[u8]>::to_vec)
}

fn aes256_cbc_decrypt_raw(key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    let mut buf = data.to_vec();
    let cipher = Aes256CbcDec::new_from_slices(key, iv).ok()?;
    cipher
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .ok()
        .map(<[u8]>::to_vec)
}
