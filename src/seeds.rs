//! Map seeds
//!
//! A seed is whatever string the caller supplies. Everything random about a map
//! is derived from it, so the same seed always produces the same image.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Longest escaped stem used as-is; longer seeds are stored under a digest
pub const MAX_STEM_LEN: usize = 200;

/// Marks digest stems. `~` is always escaped, so no escaped stem starts with it.
const DIGEST_STEM_PREFIX: &str = "~b3-";

/// Caller-supplied seed string.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MapSeed(String);

impl MapSeed {
    pub fn new(seed: impl Into<String>) -> Self {
        Self(seed.into())
    }

    /// A fresh random seed: 32 random bytes rendered as 64 lowercase hex digits.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric noise seed: the sum of the seed's Unicode code points.
    ///
    /// Wraps on overflow, which only matters for seeds of several megabytes.
    pub fn noise_seed(&self) -> u32 {
        self.0
            .chars()
            .fold(0u32, |acc, ch| acc.wrapping_add(ch as u32))
    }

    /// File stem used by the disk cache.
    ///
    /// Bytes outside `[A-Za-z0-9_-]` become `%XX`, so the mapping is injective and
    /// a stem can never contain a path separator or `..`. An escaped stem longer
    /// than [`MAX_STEM_LEN`] is replaced by `~b3-` and the blake3 hex digest of
    /// the seed, which keeps every stem under the file name limit.
    pub fn file_stem(&self) -> String {
        let mut stem = String::with_capacity(self.0.len().min(MAX_STEM_LEN));
        for byte in self.0.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
                stem.push(byte as char);
            } else {
                stem.push_str(&format!("%{:02X}", byte));
            }
            if stem.len() > MAX_STEM_LEN {
                return self.digest_stem();
            }
        }
        stem
    }

    fn digest_stem(&self) -> String {
        format!("{}{}", DIGEST_STEM_PREFIX, blake3::hash(self.0.as_bytes()).to_hex())
    }
}

impl fmt::Display for MapSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MapSeed {
    fn from(seed: &str) -> Self {
        Self::new(seed)
    }
}

impl From<String> for MapSeed {
    fn from(seed: String) -> Self {
        Self(seed)
    }
}
