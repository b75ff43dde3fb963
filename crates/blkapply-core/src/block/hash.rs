//! SHA-256 digests over block contents.
//!
//! Every source block set is verified against an expected digest before it
//! is consumed, and stash entries are keyed by the digest of their content.

use sha2::{Digest, Sha256};

use crate::constants::SHA256_HEX_LEN;
use crate::error::{Error, Result};

/// Compute the SHA-256 digest of a buffer as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Verify a buffer against an expected hex digest (case-insensitive).
///
/// Returns `Error::Verify` on mismatch or a malformed digest string.
pub fn verify_sha256(data: &[u8], expected_hex: &str) -> Result<()> {
    let actual = sha256_hex(data);
    if expected_hex.len() != SHA256_HEX_LEN || !is_hex(expected_hex) {
        return Err(Error::Verify {
            expected: expected_hex.to_string(),
            actual,
        });
    }
    if actual.eq_ignore_ascii_case(expected_hex) {
        Ok(())
    } else {
        Err(Error::Verify {
            expected: expected_hex.to_lowercase(),
            actual,
        })
    }
}

/// True if a buffer's digest matches the expected hex digest.
pub fn matches_sha256(data: &[u8], expected_hex: &str) -> bool {
    verify_sha256(data, expected_hex).is_ok()
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Incremental SHA-256 hasher for data that arrives in chunks.
#[derive(Debug, Default)]
pub struct StreamingHasher {
    inner: Sha256,
    total: u64,
}

impl StreamingHasher {
    /// Create a new streaming hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of data.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.total += data.len() as u64;
    }

    /// Total bytes hashed so far.
    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    /// Finalize and return the digest as lowercase hex.
    pub fn finish_hex(self) -> String {
        hex::encode(self.inner.finalize())
    }
}
