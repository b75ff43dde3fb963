//! Hash-keyed stash store.
//!
//! Commands that overwrite blocks whose original content is still needed
//! persist that content here first. Entries are keyed by the content's
//! SHA-256 hex digest, which makes stash lookups idempotent across retries:
//! the same hash always names the same file. Each entry is raw block bytes
//! with no header.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::block::StreamingHasher;
use crate::constants::SHA256_HEX_LEN;
use crate::error::{Error, Result};

const WRITE_CHUNK: usize = 64 * 1024;

/// Scratch store for preserved block contents.
#[derive(Debug)]
pub struct Store {
    base: PathBuf,
}

impl Store {
    /// Create a store rooted at `base`. The directory is not touched until
    /// [`Store::create_new_space`] runs.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Root directory of the store.
    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Ensure the stash directory exists.
    ///
    /// With `recreate` set, prior contents are cleared first; a fresh
    /// (non-retry) apply attempt must not see stale entries.
    pub fn create_new_space(&self, recreate: bool) -> Result<()> {
        if recreate && self.base.exists() {
            self.do_free_space()?;
        }
        fs::create_dir_all(&self.base)?;
        Ok(())
    }

    /// Remove every stash entry under the store root.
    pub fn do_free_space(&self) -> Result<()> {
        if !self.base.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.base)? {
            let path = entry?.path();
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(())
    }

    fn entry_path(&self, hash: &str) -> Result<PathBuf> {
        // The key is a digest, never a path; reject anything else.
        if hash.len() != SHA256_HEX_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::Stash {
                message: format!("bad stash key {:?}", hash),
            });
        }
        Ok(self.base.join(hash.to_lowercase()))
    }

    /// True if an entry for `hash` exists.
    pub fn contains(&self, hash: &str) -> bool {
        self.entry_path(hash).map(|p| p.exists()).unwrap_or(false)
    }

    /// Persist `data` under `hash`, fsyncing before returning.
    ///
    /// The content is digested while it streams to disk; a key that does
    /// not match the content's digest is rejected and the partial entry
    /// removed, keeping the hash-keyed invariant intact.
    pub fn write(&self, hash: &str, data: &[u8]) -> Result<()> {
        let path = self.entry_path(hash)?;
        let mut hasher = StreamingHasher::new();
        let mut file = File::create(&path)?;
        for chunk in data.chunks(WRITE_CHUNK) {
            hasher.update(chunk);
            file.write_all(chunk)?;
        }
        let actual = hasher.finish_hex();
        if !actual.eq_ignore_ascii_case(hash) {
            let _ = fs::remove_file(&path);
            return Err(Error::Stash {
                message: format!("entry digest {} does not match key {}", actual, hash),
            });
        }
        file.sync_all()?;
        debug!(hash, bytes = data.len(), "stash entry written");
        Ok(())
    }

    /// Read the entry for `hash`.
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.entry_path(hash)?;
        fs::read(&path).map_err(|e| Error::Stash {
            message: format!("missing stash entry {}: {}", hash, e),
        })
    }

    /// Release the entry for `hash`. A missing entry is not an error; FREE
    /// may replay after a retry already consumed it.
    pub fn free(&self, hash: &str) -> Result<()> {
        let path = self.entry_path(hash)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(hash, "stash entry freed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(hash, "freeing stash entry that does not exist");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::sha256_hex;
    use tempfile::TempDir;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("stash"));
        store.create_new_space(false).unwrap();
        (dir, store)
    }

    #[test]
    fn write_read_free_cycle() {
        let (_dir, store) = store();
        let data = b"block contents".to_vec();
        let hash = sha256_hex(&data);

        assert!(!store.contains(&hash));
        store.write(&hash, &data).unwrap();
        assert!(store.contains(&hash));
        assert_eq!(store.read(&hash).unwrap(), data);

        store.free(&hash).unwrap();
        assert!(!store.contains(&hash));
        // Freeing again must not fail.
        store.free(&hash).unwrap();
    }

    #[test]
    fn read_missing_entry_fails() {
        let (_dir, store) = store();
        let hash = sha256_hex(b"never stored");
        assert!(matches!(store.read(&hash), Err(Error::Stash { .. })));
    }

    #[test]
    fn write_rejects_mismatched_key() {
        let (_dir, store) = store();
        let wrong_key = sha256_hex(b"other content");
        assert!(matches!(
            store.write(&wrong_key, b"actual content"),
            Err(Error::Stash { .. })
        ));
        // No partial entry is left behind.
        assert!(!store.contains(&wrong_key));
    }

    #[test]
    fn rejects_non_digest_keys() {
        let (_dir, store) = store();
        assert!(store.write("../evil", b"data").is_err());
        assert!(store.write("abcd", b"data").is_err());
    }

    #[test]
    fn recreate_clears_prior_entries() {
        let (_dir, store) = store();
        let hash = sha256_hex(b"stale");
        store.write(&hash, b"stale").unwrap();

        store.create_new_space(true).unwrap();
        assert!(!store.contains(&hash));
    }

    #[test]
    fn free_space_on_missing_dir_is_ok() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("never-created"));
        store.do_free_space().unwrap();
    }
}
