//! Minimal patch construction for tests.
//!
//! These builders emit the smallest well-formed patches the apply code
//! accepts: a single-entry bsdiff, and one-chunk image diffs. They are not
//! diff generators; the caller supplies both sides and the builders encode
//! the trivial "add everything, append the rest" transform.

use std::io::Write;

use bzip2::write::BzEncoder;

use blkapply_core::constants::{BSDIFF_MAGIC, CHUNK_NORMAL, CHUNK_RAW, IMGDIFF_MAGIC};

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

/// Build a bsdiff patch that turns `old` into `new`.
///
/// Uses one control triple: diff over the common prefix, then the remainder
/// of `new` as extra bytes.
pub fn make_bsdiff(old: &[u8], new: &[u8]) -> Vec<u8> {
    let add_len = old.len().min(new.len());
    let mut ctrl = Vec::new();
    write_off(add_len as i64, &mut ctrl);
    write_off((new.len() - add_len) as i64, &mut ctrl);
    write_off(0, &mut ctrl);

    let diff: Vec<u8> = (0..add_len).map(|i| new[i].wrapping_sub(old[i])).collect();
    let (ctrl_z, diff_z, extra_z) = (bz(&ctrl), bz(&diff), bz(&new[add_len..]));

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

/// Build an image diff with a single Normal chunk covering all of `old`.
pub fn make_imgdiff_normal(old: &[u8], new: &[u8]) -> Vec<u8> {
    let blob = make_bsdiff(old, new);

    let mut patch = Vec::new();
    patch.extend_from_slice(IMGDIFF_MAGIC);
    patch.extend_from_slice(&1u32.to_le_bytes());
    patch.extend_from_slice(&CHUNK_NORMAL.to_le_bytes());
    let header_end = patch.len() + 8 * 3;
    patch.extend_from_slice(&0i64.to_le_bytes());
    patch.extend_from_slice(&(old.len() as i64).to_le_bytes());
    patch.extend_from_slice(&(header_end as i64).to_le_bytes());
    patch.extend_from_slice(&blob);
    patch
}

/// Build an image diff with a single Raw chunk holding `new` verbatim.
pub fn make_imgdiff_raw(new: &[u8]) -> Vec<u8> {
    let mut patch = Vec::new();
    patch.extend_from_slice(IMGDIFF_MAGIC);
    patch.extend_from_slice(&1u32.to_le_bytes());
    patch.extend_from_slice(&CHUNK_RAW.to_le_bytes());
    patch.extend_from_slice(&(new.len() as u32).to_le_bytes());
    patch.extend_from_slice(new);
    patch
}
