//! Named hash algorithms used for content digests and bitrot checksums.
//!
//! Digests are never persisted raw; every consumer stores the lowercase hex
//! form. HighwayHash-256 is the default algorithm and always runs keyed: a
//! caller passing no key gets the fixed default key.

use highway::{HighwayHash, HighwayHasher, Key};
use md5::{Digest as _, Md5};
use sha2::Sha256;

use crate::error::{Error, Result};

/// Algorithm name of keyed HighwayHash-256.
pub const HIGHWAY_HASH_256: &str = "HighwayHash256";

/// Algorithm name of SHA-256.
pub const SHA_256: &str = "SHA256";

/// Algorithm name of MD5.
pub const MD5: &str = "MD5";

const DEFAULT_HIGHWAY_KEY: [u8; 32] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32,
];

fn highway_key(key: &[u8; 32]) -> Key {
    Key([
        u64::from_le_bytes(key[0..8].try_into().unwrap()),
        u64::from_le_bytes(key[8..16].try_into().unwrap()),
        u64::from_le_bytes(key[16..24].try_into().unwrap()),
        u64::from_le_bytes(key[24..32].try_into().unwrap()),
    ])
}

/// Streaming hasher over one of the named algorithms.
pub enum Hasher {
    Highway { inner: HighwayHasher, key: [u8; 32] },
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    /// Creates a hasher by algorithm name. Unknown names fail with
    /// [`Error::UnknownAlgorithm`].
    pub fn new(name: &str, key: Option<&[u8]>) -> Result<Hasher> {
        match name {
            HIGHWAY_HASH_256 => Hasher::highway256(key),
            SHA_256 => Ok(Hasher::Sha256(Sha256::new())),
            MD5 => Ok(Hasher::Md5(Md5::new())),
            _ => Err(Error::UnknownAlgorithm),
        }
    }

    /// Keyed HighwayHash-256. `None` selects the default key; an explicit
    /// key must be exactly 32 bytes.
    pub fn highway256(key: Option<&[u8]>) -> Result<Hasher> {
        let key: [u8; 32] = match key {
            None => DEFAULT_HIGHWAY_KEY,
            Some(key) => key.try_into().map_err(|_| Error::InvalidHashKey)?,
        };

        Ok(Hasher::Highway { inner: HighwayHasher::new(highway_key(&key)), key })
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Highway { inner, .. } => inner.append(data),
            Hasher::Sha256(inner) => inner.update(data),
            Hasher::Md5(inner) => inner.update(data),
        }
    }

    /// Digest of everything written so far. Does not consume the hasher, so
    /// more data may be appended afterwards.
    pub fn sum(&self) -> Vec<u8> {
        match self {
            Hasher::Highway { inner, .. } => {
                let words = inner.clone().finalize256();
                let mut out = Vec::with_capacity(32);
                for word in words {
                    out.extend_from_slice(&word.to_le_bytes());
                }
                out
            }
            Hasher::Sha256(inner) => inner.clone().finalize().to_vec(),
            Hasher::Md5(inner) => inner.clone().finalize().to_vec(),
        }
    }

    /// Same as [`sum`](Hasher::sum) but lowercase hex encoded.
    pub fn hex_sum(&self) -> String {
        hex::encode(self.sum())
    }

    /// Discards all written data, keeping the key.
    pub fn reset(&mut self) {
        match self {
            Hasher::Highway { inner, key } => *inner = HighwayHasher::new(highway_key(key)),
            Hasher::Sha256(inner) => *inner = Sha256::new(),
            Hasher::Md5(inner) => *inner = Md5::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Hasher::Highway { .. } => HIGHWAY_HASH_256,
            Hasher::Sha256(_) => SHA_256,
            Hasher::Md5(_) => MD5,
        }
    }

    /// Hex encoded key, empty for keyless algorithms.
    pub fn hash_key(&self) -> String {
        match self {
            Hasher::Highway { key, .. } => hex::encode(key),
            Hasher::Sha256(_) | Hasher::Md5(_) => String::new(),
        }
    }

    /// Length in characters of the hex digest.
    pub fn hash_length(&self) -> u64 {
        match self {
            Hasher::Highway { .. } => 64,
            Hasher::Sha256(_) => 64,
            Hasher::Md5(_) => 32,
        }
    }
}
