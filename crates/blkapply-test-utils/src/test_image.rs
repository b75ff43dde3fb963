//! Temp-file block image for testing without real devices.
//!
//! A `TestImage` is an ordinary file in a private temp directory, sized to a
//! whole number of blocks. Tests hand its [`File`] to the code under test
//! and inspect the result through [`contents`](TestImage::contents) and
//! [`block_range`](TestImage::block_range). The temp directory doubles as
//! scratch space for stash stores and retry markers, and is removed on drop.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use tempfile::TempDir;

/// A block image backed by a temp file.
pub struct TestImage {
    dir: TempDir,
    file: File,
    block_size: usize,
}

impl TestImage {
    /// Create an image of `blocks` blocks, every byte set to `byte`.
    pub fn filled(blocks: usize, block_size: usize, byte: u8) -> Self {
        Self::from_bytes(vec![byte; blocks * block_size], block_size)
    }

    /// Create an image of `blocks` blocks with a deterministic non-zero
    /// pattern; every block's contents differ from every other block's.
    pub fn patterned(blocks: usize, block_size: usize) -> Self {
        let data: Vec<u8> = (0..blocks * block_size)
            .map(|i| (i % 251 + 1) as u8)
            .collect();
        Self::from_bytes(data, block_size)
    }

    fn from_bytes(data: Vec<u8>, block_size: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("image.bin");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.write_all(&data).unwrap();
        file.sync_all().unwrap();
        Self {
            dir,
            file,
            block_size,
        }
    }

    /// The open read/write handle to the image.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// The temp directory holding the image, usable as scratch space.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Read the whole image back.
    pub fn contents(&self) -> Vec<u8> {
        std::fs::read(self.dir.path().join("image.bin")).unwrap()
    }

    /// Read blocks `start..end` back.
    pub fn block_range(&self, start: usize, end: usize) -> Vec<u8> {
        let data = self.contents();
        data[start * self.block_size..end * self.block_size].to_vec()
    }
}
