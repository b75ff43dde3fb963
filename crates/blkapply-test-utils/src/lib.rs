//! blkapply-test-utils: Test infrastructure for blkapply.
//!
//! Provides:
//! - TestImage: Temp-file block image for testing without real devices
//! - RecordingEnv: Env implementation that records posted messages
//! - Patch builders: Minimal bsdiff and image-diff patch construction

mod patch_builders;
mod recording_env;
mod test_image;

pub use patch_builders::{make_bsdiff, make_imgdiff_normal, make_imgdiff_raw};
pub use recording_env::RecordingEnv;
pub use test_image::TestImage;
