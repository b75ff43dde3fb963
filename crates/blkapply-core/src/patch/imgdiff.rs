//! Image diff (pkgdiff) patch application.
//!
//! Wire format: `PKGDIFF2` magic, u32 chunk count, then one typed header
//! per chunk. Bsdiff payloads live after the headers and are addressed by
//! absolute offsets recorded in each header.
//!
//! Chunk types:
//! - Normal: `(old_start, old_len, patch_offset)` as raw little-endian i64;
//!   a bsdiff over the raw source bytes.
//! - Raw: u32 length plus literal new bytes inline in the header stream.
//! - Deflate: the Normal fields plus the uncompressed source/target lengths
//!   and the recorded deflate parameters (level, method, window bits, mem
//!   level, strategy); the source range is inflated, patched with bsdiff,
//!   and re-deflated with the recorded level.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::warn;

use super::bsdiff;
use crate::constants::{CHUNK_DEFLATE, CHUNK_NORMAL, CHUNK_RAW, IMGDIFF_MAGIC};
use crate::error::{Error, Result};

/// zlib's Z_DEFLATED; the only compression method a Deflate chunk may carry.
const METHOD_DEFLATED: i32 = 8;

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&e| e <= self.data.len());
        let Some(end) = end else {
            return Err(Error::Patch {
                message: format!("imgdiff header truncated at {}", self.pos),
            });
        };
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
    }
}

fn old_slice(old: &[u8], start: i64, len: i64) -> Result<&[u8]> {
    if start < 0 || len < 0 {
        return Err(Error::Patch {
            message: format!("negative source window {}+{}", start, len),
        });
    }
    old.get(start as usize..(start as usize).saturating_add(len as usize))
        .ok_or_else(|| Error::Patch {
            message: format!("source window {}+{} out of bounds", start, len),
        })
}

fn patch_tail(patch: &[u8], offset: i64) -> Result<&[u8]> {
    if offset < 0 || offset as usize > patch.len() {
        return Err(Error::Patch {
            message: format!("patch offset {} out of bounds", offset),
        });
    }
    Ok(&patch[offset as usize..])
}

/// Apply an image diff patch to `old`, returning the reconstructed data.
pub fn apply(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    if patch.len() < IMGDIFF_MAGIC.len() || &patch[..8] != IMGDIFF_MAGIC {
        return Err(Error::Patch {
            message: "bad imgdiff magic".into(),
        });
    }
    let mut header = Cursor::new(patch);
    header.pos = IMGDIFF_MAGIC.len();
    let chunk_count = header.read_u32()?;

    let mut out = Vec::new();
    for index in 0..chunk_count {
        let chunk_type = header.read_u32()?;
        match chunk_type {
            CHUNK_NORMAL => {
                let old_start = header.read_i64()?;
                let old_len = header.read_i64()?;
                let patch_offset = header.read_i64()?;
                let source = old_slice(old, old_start, old_len)?;
                let new = bsdiff::apply(source, patch_tail(patch, patch_offset)?)?;
                out.extend_from_slice(&new);
            }
            CHUNK_RAW => {
                let len = header.read_u32()? as usize;
                out.extend_from_slice(header.take(len)?);
            }
            CHUNK_DEFLATE => {
                let old_start = header.read_i64()?;
                let old_len = header.read_i64()?;
                let patch_offset = header.read_i64()?;
                let src_original_len = header.read_i64()?;
                let dest_original_len = header.read_i64()?;
                let level = header.read_i32()?;
                let method = header.read_i32()?;
                let window_bits = header.read_i32()?;
                let mem_level = header.read_i32()?;
                let strategy = header.read_i32()?;

                if method != METHOD_DEFLATED {
                    return Err(Error::Patch {
                        message: format!("unsupported deflate method {}", method),
                    });
                }
                // Only level is honored on recompression; the other recorded
                // parameters match zlib defaults in practice.
                if window_bits != -15 || mem_level != 8 || strategy != 0 {
                    warn!(
                        index,
                        window_bits, mem_level, strategy, "nonstandard deflate parameters"
                    );
                }

                let packed = old_slice(old, old_start, old_len)?;
                let mut source = Vec::new();
                DeflateDecoder::new(packed)
                    .read_to_end(&mut source)
                    .map_err(|e| Error::Patch {
                        message: format!("inflate of source chunk failed: {}", e),
                    })?;
                if source.len() as i64 != src_original_len {
                    return Err(Error::Patch {
                        message: format!(
                            "inflated source is {} bytes, header said {}",
                            source.len(),
                            src_original_len
                        ),
                    });
                }

                let new = bsdiff::apply(&source, patch_tail(patch, patch_offset)?)?;
                if new.len() as i64 != dest_original_len {
                    return Err(Error::Patch {
                        message: format!(
                            "patched chunk is {} bytes, header said {}",
                            new.len(),
                            dest_original_len
                        ),
                    });
                }

                let level = level.clamp(0, 9) as u32;
                let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
                encoder.write_all(&new).map_err(Error::Io)?;
                let packed_new = encoder.finish().map_err(Error::Io)?;
                out.extend_from_slice(&packed_new);
            }
            other => {
                return Err(Error::Patch {
                    message: format!("unsupported imgdiff chunk type {}", other),
                });
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deflate(data: &[u8], level: u32) -> Vec<u8> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::new(level));
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    // Minimal single-entry bsdiff patch, mirroring the bsdiff tests.
    fn make_bsdiff(old: &[u8], new: &[u8]) -> Vec<u8> {
        use bzip2::write::BzEncoder;

        fn write_off(value: i64, out: &mut Vec<u8>) {
            let mut y = value.unsigned_abs();
            let mut bytes = [0u8; 8];
            for b in bytes.iter_mut() {
                *b = (y % 256) as u8;
                y /= 256;
            }
            if value < 0 {
                bytes[7] |= 0x80;
            }
            out.extend_from_slice(&bytes);
        }

        fn bz(data: &[u8]) -> Vec<u8> {
            let mut enc = BzEncoder::new(Vec::new(), bzip2::Compression::fast());
            enc.write_all(data).unwrap();
            enc.finish().unwrap()
        }

        let add_len = old.len().min(new.len());
        let mut ctrl = Vec::new();
        write_off(add_len as i64, &mut ctrl);
        write_off((new.len() - add_len) as i64, &mut ctrl);
        write_off(0, &mut ctrl);

        let diff: Vec<u8> = (0..add_len).map(|i| new[i].wrapping_sub(old[i])).collect();
        let (ctrl_z, diff_z, extra_z) = (bz(&ctrl), bz(&diff), bz(&new[add_len..]));

        let mut patch = Vec::new();
        patch.extend_from_slice(crate::constants::BSDIFF_MAGIC);
        write_off(ctrl_z.len() as i64, &mut patch);
        write_off(diff_z.len() as i64, &mut patch);
        write_off(new.len() as i64, &mut patch);
        patch.extend_from_slice(&ctrl_z);
        patch.extend_from_slice(&diff_z);
        patch.extend_from_slice(&extra_z);
        patch
    }

    #[test]
    fn raw_chunks_copy_literal_data() {
        let mut patch = Vec::new();
        patch.extend_from_slice(IMGDIFF_MAGIC);
        patch.extend_from_slice(&1u32.to_le_bytes());
        patch.extend_from_slice(&CHUNK_RAW.to_le_bytes());
        patch.extend_from_slice(&5u32.to_le_bytes());
        patch.extend_from_slice(b"hello");

        assert_eq!(apply(b"ignored", &patch).unwrap(), b"hello");
    }

    #[test]
    fn normal_chunk_patches_raw_window() {
        let old = b"0000AAAA1111".to_vec();
        let new_part = b"BBBB".to_vec();
        let blob = make_bsdiff(b"AAAA", &new_part);

        let mut patch = Vec::new();
        patch.extend_from_slice(IMGDIFF_MAGIC);
        patch.extend_from_slice(&1u32.to_le_bytes());
        patch.extend_from_slice(&CHUNK_NORMAL.to_le_bytes());
        let header_end = patch.len() + 8 * 3;
        patch.extend_from_slice(&4i64.to_le_bytes()); // old_start
        patch.extend_from_slice(&4i64.to_le_bytes()); // old_len
        patch.extend_from_slice(&(header_end as i64).to_le_bytes());
        patch.extend_from_slice(&blob);

        assert_eq!(apply(&old, &patch).unwrap(), new_part);
    }

    #[test]
    fn deflate_chunk_round_trips() {
        let src_orig = b"the quick brown fox jumps over the lazy dog".to_vec();
        let dst_orig = b"the quick brown cat naps under the lazy dog".to_vec();
        let level = 6u32;
        let packed_src = deflate(&src_orig, level);
        let blob = make_bsdiff(&src_orig, &dst_orig);

        let mut patch = Vec::new();
        patch.extend_from_slice(IMGDIFF_MAGIC);
        patch.extend_from_slice(&1u32.to_le_bytes());
        patch.extend_from_slice(&CHUNK_DEFLATE.to_le_bytes());
        let header_end = patch.len() + 8 * 5 + 4 * 5;
        patch.extend_from_slice(&0i64.to_le_bytes()); // old_start
        patch.extend_from_slice(&(packed_src.len() as i64).to_le_bytes());
        patch.extend_from_slice(&(header_end as i64).to_le_bytes());
        patch.extend_from_slice(&(src_orig.len() as i64).to_le_bytes());
        patch.extend_from_slice(&(dst_orig.len() as i64).to_le_bytes());
        patch.extend_from_slice(&(level as i32).to_le_bytes());
        patch.extend_from_slice(&METHOD_DEFLATED.to_le_bytes());
        patch.extend_from_slice(&(-15i32).to_le_bytes());
        patch.extend_from_slice(&8i32.to_le_bytes());
        patch.extend_from_slice(&0i32.to_le_bytes());
        patch.extend_from_slice(&blob);

        let out = apply(&packed_src, &patch).unwrap();
        assert_eq!(out, deflate(&dst_orig, level));

        // The output must inflate back to the patched original.
        let mut unpacked = Vec::new();
        DeflateDecoder::new(&out[..])
            .read_to_end(&mut unpacked)
            .unwrap();
        assert_eq!(unpacked, dst_orig);
    }

    #[test]
    fn rejects_unknown_chunk_type() {
        let mut patch = Vec::new();
        patch.extend_from_slice(IMGDIFF_MAGIC);
        patch.extend_from_slice(&1u32.to_le_bytes());
        patch.extend_from_slice(&99u32.to_le_bytes());
        assert!(matches!(apply(b"", &patch), Err(Error::Patch { .. })));
    }

    #[test]
    fn rejects_bad_magic_and_truncation() {
        assert!(apply(b"", b"NOTMAGIC").is_err());

        let mut patch = Vec::new();
        patch.extend_from_slice(IMGDIFF_MAGIC);
        patch.extend_from_slice(&2u32.to_le_bytes());
        patch.extend_from_slice(&CHUNK_RAW.to_le_bytes());
        patch.extend_from_slice(&100u32.to_le_bytes()); // longer than the data
        assert!(apply(b"", &patch).is_err());
    }
}
