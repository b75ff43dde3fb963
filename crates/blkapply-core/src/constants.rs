//! Engine and format constants for blkapply.

// =============================================================================
// Block Layout Constants
// =============================================================================

/// Size of one device block in bytes.
pub const BLOCK_SIZE: usize = 4096;

/// Number of header lines at the top of a transfer list:
/// version, total blocks, max entries, max blocks.
pub const TRANSFER_HEADER_LINES: usize = 4;

/// Length of a SHA-256 digest rendered as hex.
pub const SHA256_HEX_LEN: usize = 64;

// =============================================================================
// Environment Message Topics
// =============================================================================

/// Progress report topic; payload is a stringified fraction in [0, 1].
pub const TOPIC_SET_PROGRESS: &str = "set_progress";

/// Transient-failure topic; payload is the failing command line.
pub const TOPIC_RETRY_UPDATE: &str = "retry_update";

// =============================================================================
// Retry Marker Constants
// =============================================================================

/// Owner uid applied to the retry marker file.
pub const RETRY_FILE_UID: u32 = 1000;

/// Owner gid applied to the retry marker file.
pub const RETRY_FILE_GID: u32 = 1000;

// =============================================================================
// Patch Format Constants
// =============================================================================

/// Magic prefix of a block diff (bsdiff) patch.
pub const BSDIFF_MAGIC: &[u8; 8] = b"BSDIFF40";

/// Magic prefix of an image diff (pkgdiff) patch.
pub const IMGDIFF_MAGIC: &[u8; 8] = b"PKGDIFF2";

/// Image diff chunk holding a plain bsdiff over raw bytes.
pub const CHUNK_NORMAL: u32 = 0;

/// Image diff chunk holding a bsdiff over inflated deflate streams.
pub const CHUNK_DEFLATE: u32 = 2;

/// Image diff chunk holding literal new data.
pub const CHUNK_RAW: u32 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_is_page_aligned() {
        assert_eq!(BLOCK_SIZE % 512, 0);
        assert!(BLOCK_SIZE.is_power_of_two());
    }

    #[test]
    fn patch_magics_are_eight_bytes() {
        assert_eq!(BSDIFF_MAGIC.len(), 8);
        assert_eq!(IMGDIFF_MAGIC.len(), 8);
    }

    #[test]
    fn chunk_types_are_distinct() {
        assert_ne!(CHUNK_NORMAL, CHUNK_DEFLATE);
        assert_ne!(CHUNK_DEFLATE, CHUNK_RAW);
        assert_ne!(CHUNK_NORMAL, CHUNK_RAW);
    }
}
