//! Block diff (bsdiff) patch application.
//!
//! Wire format: `BSDIFF40` magic, then three 64-bit sign-magnitude
//! little-endian lengths (control bytes, diff bytes, new size), then three
//! bzip2 streams holding control triples, diff bytes, and extra bytes.
//! Control triples are `(add_len, copy_len, seek)`: add `add_len` diff bytes
//! to the old data at the current position, copy `copy_len` literal extra
//! bytes, then advance the old position by `seek` (which may be negative).

use std::io::Read;

use bzip2::read::BzDecoder;

use crate::constants::BSDIFF_MAGIC;
use crate::error::{Error, Result};

const HEADER_LEN: usize = 8 + 8 * 3;
const CTRL_ENTRY_LEN: usize = 8 * 3;

/// Decode a 64-bit sign-magnitude little-endian value.
fn read_off(bytes: &[u8]) -> i64 {
    let mut y = (bytes[7] & 0x7f) as i64;
    for i in (0..7).rev() {
        y = y.wrapping_mul(256).wrapping_add(bytes[i] as i64);
    }
    if bytes[7] & 0x80 != 0 {
        -y
    } else {
        y
    }
}

fn decompress(data: &[u8], what: &'static str) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    BzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Patch {
            message: format!("bad {} stream: {}", what, e),
        })?;
    Ok(out)
}

fn slice<'a>(patch: &'a [u8], start: usize, len: usize, what: &'static str) -> Result<&'a [u8]> {
    patch
        .get(start..start.checked_add(len).unwrap_or(usize::MAX))
        .ok_or_else(|| Error::Patch {
            message: format!("{} out of bounds: {}+{}", what, start, len),
        })
}

/// Apply a bsdiff patch to `old`, returning the reconstructed new data.
pub fn apply(old: &[u8], patch: &[u8]) -> Result<Vec<u8>> {
    if patch.len() < HEADER_LEN || &patch[..8] != BSDIFF_MAGIC {
        return Err(Error::Patch {
            message: "bad bsdiff magic".into(),
        });
    }
    let ctrl_len = read_off(&patch[8..16]);
    let diff_len = read_off(&patch[16..24]);
    let new_size = read_off(&patch[24..32]);
    if ctrl_len < 0 || diff_len < 0 || new_size < 0 {
        return Err(Error::Patch {
            message: format!(
                "negative bsdiff header field: {} {} {}",
                ctrl_len, diff_len, new_size
            ),
        });
    }
    let (ctrl_len, diff_len, new_size) = (ctrl_len as usize, diff_len as usize, new_size as usize);

    let ctrl = decompress(slice(patch, HEADER_LEN, ctrl_len, "control")?, "control")?;
    let diff_start = HEADER_LEN + ctrl_len;
    let diff = decompress(slice(patch, diff_start, diff_len, "diff")?, "diff")?;
    let extra_start = diff_start + diff_len;
    let extra = decompress(&patch[extra_start..], "extra")?;

    if ctrl.len() % CTRL_ENTRY_LEN != 0 {
        return Err(Error::Patch {
            message: format!("control stream length {} not a triple", ctrl.len()),
        });
    }

    let mut new = vec![0u8; new_size];
    let mut new_pos = 0usize;
    let mut old_pos = 0i64;
    let mut diff_pos = 0usize;
    let mut extra_pos = 0usize;

    for entry in ctrl.chunks_exact(CTRL_ENTRY_LEN) {
        let add_len = read_off(&entry[0..8]);
        let copy_len = read_off(&entry[8..16]);
        let seek = read_off(&entry[16..24]);
        if add_len < 0 || copy_len < 0 {
            return Err(Error::Patch {
                message: "negative control entry".into(),
            });
        }
        let (add_len, copy_len) = (add_len as usize, copy_len as usize);

        if new_pos + add_len > new_size || diff_pos + add_len > diff.len() {
            return Err(Error::Patch {
                message: "diff data overruns new size".into(),
            });
        }
        for i in 0..add_len {
            let mut byte = diff[diff_pos + i];
            let old_idx = old_pos + i as i64;
            if old_idx >= 0 && (old_idx as usize) < old.len() {
                byte = byte.wrapping_add(old[old_idx as usize]);
            }
            new[new_pos + i] = byte;
        }
        new_pos += add_len;
        diff_pos += add_len;
        old_pos += add_len as i64;

        if new_pos + copy_len > new_size || extra_pos + copy_len > extra.len() {
            return Err(Error::Patch {
                message: "extra data overruns new size".into(),
            });
        }
        new[new_pos..new_pos + copy_len].copy_from_slice(&extra[extra_pos..extra_pos + copy_len]);
        new_pos += copy_len;
        extra_pos += copy_len;

        old_pos += seek;
    }

    if new_pos != new_size {
        return Err(Error::Patch {
            message: format!("patch produced {} bytes, header said {}", new_pos, new_size),
        });
    }
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    use bzip2::write::BzEncoder;
    use bzip2::Compression;

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
        let mut enc = BzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    /// Build a single-entry patch: add `add` over old, then append `extra`.
    fn make_patch(old: &[u8], new: &[u8], add_len: usize) -> Vec<u8> {
        let mut ctrl = Vec::new();
        write_off(add_len as i64, &mut ctrl);
        write_off((new.len() - add_len) as i64, &mut ctrl);
        write_off(0, &mut ctrl);

        let diff: Vec<u8> = (0..add_len)
            .map(|i| new[i].wrapping_sub(if i < old.len() { old[i] } else { 0 }))
            .collect();
        let extra = &new[add_len..];

        let ctrl_z = bz(&ctrl);
        let diff_z = bz(&diff);
        let extra_z = bz(extra);

        let mut patch = Vec::new();
        patch.extend_from_slice(BSDIFF_MAGIC);
        write_off(ctrl_z.len() as i64, &mut patch);
        write_off(diff_z.len() as i64, &mut patch);
        write_off(new.len() as i64, &mut patch);
        patch.extend_from_slice(&ctrl_z);
        patch.extend_from_slice(&diff_z);
        patch.extend_from_slice(&extra_z);
        patch
    }

    #[test]
    fn offsets_round_trip() {
        for v in [0i64, 1, 255, 256, -1, -300, 1 << 40, -(1 << 40)] {
            let mut buf = Vec::new();
            write_off(v, &mut buf);
            assert_eq!(read_off(&buf), v, "value {}", v);
        }
    }

    #[test]
    fn applies_identity_patch() {
        let old = b"the quick brown fox";
        let patch = make_patch(old, old, old.len());
        assert_eq!(apply(old, &patch).unwrap(), old);
    }

    #[test]
    fn applies_mutation_and_extension() {
        let old = b"aaaabbbbcccc".to_vec();
        let new = b"aaaaBBBBccccEXTRA".to_vec();
        let patch = make_patch(&old, &new, old.len());
        assert_eq!(apply(&old, &patch).unwrap(), new);
    }

    #[test]
    fn applies_to_empty_old() {
        let new = b"fresh content".to_vec();
        let patch = make_patch(b"", &new, 0);
        assert_eq!(apply(b"", &patch).unwrap(), new);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut patch = make_patch(b"x", b"y", 1);
        patch[0] = b'X';
        assert!(matches!(apply(b"x", &patch), Err(Error::Patch { .. })));
    }

    #[test]
    fn rejects_truncated_patch() {
        let patch = make_patch(b"old data here", b"new data here", 13);
        for cut in [4, HEADER_LEN - 1, HEADER_LEN + 2] {
            assert!(apply(b"old data here", &patch[..cut]).is_err());
        }
    }
}
