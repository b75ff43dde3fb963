//! Block ranges and content digests.
//!
//! This module provides:
//! - Block range parsing and device I/O across range sets
//! - SHA-256 digests used for source verification and stash keys

pub mod hash;
pub mod set;

pub use hash::{matches_sha256, sha256_hex, verify_sha256, StreamingHasher};
pub use set::{BlockPair, BlockSet};
