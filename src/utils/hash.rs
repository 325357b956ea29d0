// src/utils/hash.rs

//! Body digests and fingerprints.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::{AppError, Result};

/// Supported body hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashKind {
    Md5,
    Sha1,
    Sha256,
    Sha512,
    Mmh3,
    Simhash,
}

impl HashKind {
    pub fn name(&self) -> &'static str {
        match self {
            HashKind::Md5 => "md5",
            HashKind::Sha1 => "sha1",
            HashKind::Sha256 => "sha256",
            HashKind::Sha512 => "sha512",
            HashKind::Mmh3 => "mmh3",
            HashKind::Simhash => "simhash",
        }
    }

    pub fn parse(name: &str) -> Option<HashKind> {
        match name.trim().to_ascii_lowercase().as_str() {
            "md5" => Some(HashKind::Md5),
            "sha1" => Some(HashKind::Sha1),
            "sha256" => Some(HashKind::Sha256),
            "sha512" => Some(HashKind::Sha512),
            "mmh3" => Some(HashKind::Mmh3),
            "simhash" => Some(HashKind::Simhash),
            _ => None,
        }
    }

    /// Parse a comma separated algorithm list, keeping the first occurrence
    /// of each.
    pub fn parse_list(spec: &str) -> Result<Vec<HashKind>> {
        let mut kinds = Vec::new();
        for name in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let kind = HashKind::parse(name)
                .ok_or_else(|| AppError::config(format!("unknown hash algorithm '{name}'")))?;
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
        Ok(kinds)
    }

    /// Hash the body, rendered the way it is reported.
    pub fn digest(&self, body: &[u8]) -> String {
        match self {
            HashKind::Md5 => hex::encode(Md5::digest(body)),
            HashKind::Sha1 => hex::encode(Sha1::digest(body)),
            HashKind::Sha256 => hex::encode(Sha256::digest(body)),
            HashKind::Sha512 => hex::encode(Sha512::digest(body)),
            HashKind::Mmh3 => (murmur3_32(body, 0) as i32).to_string(),
            HashKind::Simhash => simhash(&String::from_utf8_lossy(body)).to_string(),
        }
    }
}

/// Shodan-style favicon fingerprint: mmh3 over base64 wrapped at 76 columns,
/// each line newline-terminated.
pub fn favicon_hash(icon: &[u8]) -> String {
    let encoded = BASE64.encode(icon);
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for chunk in encoded.as_bytes().chunks(76) {
        // base64 output is ASCII
        wrapped.push_str(&String::from_utf8_lossy(chunk));
        wrapped.push('\n');
    }
    (murmur3_32(wrapped.as_bytes(), 0) as i32).to_string()
}

/// MurmurHash3, x86 32-bit variant.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mix = |k: u32| k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

    let mut h = seed;
    let mut blocks = data.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= mix(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)));
        h ^= mix(k);
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// 64-bit simhash over lowercase whitespace-separated tokens.
pub fn simhash(text: &str) -> u64 {
    let mut weights = [0i64; 64];
    let mut any = false;

    for token in text.split_whitespace() {
        any = true;
        let feature = fnv1a_64(token.to_lowercase().as_bytes());
        for (bit, weight) in weights.iter_mut().enumerate() {
            if feature & (1 << bit) != 0 {
                *weight += 1;
            } else {
                *weight -= 1;
            }
        }
    }

    if !any {
        return 0;
    }
    weights
        .iter()
        .enumerate()
        .filter(|(_, w)| **w > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_known_values() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"", 1), 0x514e_28b7);
        assert_eq!(murmur3_32(b"hello", 0), 613_153_351);
    }

    #[test]
    fn test_digests_are_hex() {
        assert_eq!(
            HashKind::Md5.digest(b"abc"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
        assert_eq!(
            HashKind::Sha1.digest(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
        assert_eq!(HashKind::Sha256.digest(b"abc").len(), 64);
        assert_eq!(HashKind::Sha512.digest(b"abc").len(), 128);
    }

    #[test]
    fn test_parse_list() {
        let kinds = HashKind::parse_list("md5, SHA256,md5").unwrap();
        assert_eq!(kinds, vec![HashKind::Md5, HashKind::Sha256]);
        assert!(HashKind::parse_list("crc32").is_err());
        assert!(HashKind::parse_list("").unwrap().is_empty());
    }

    #[test]
    fn test_simhash_similarity() {
        assert_eq!(simhash(""), 0);
        assert_eq!(simhash("Hello World"), simhash("hello   world"));
        // a single token's fingerprint is its feature hash
        assert_eq!(simhash("token"), fnv1a_64(b"token"));
        assert_eq!(simhash("a a a b"), fnv1a_64(b"a"));
    }

    #[test]
    fn test_favicon_hash_wraps_base64() {
        let icon = vec![0u8; 100];
        let encoded = BASE64.encode(&icon);
        let wrapped = format!("{}\n{}\n", &encoded[..76], &encoded[76..]);
        assert_eq!(
            favicon_hash(&icon),
            (murmur3_32(wrapped.as_bytes(), 0) as i32).to_string()
        );
    }
}
