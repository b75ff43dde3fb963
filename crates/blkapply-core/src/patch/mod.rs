//! Binary patch application.
//!
//! Two patch formats transform old block content into new block content
//! without shipping the full image: plain block diffs (bsdiff) and
//! structured image diffs (pkgdiff) that understand deflate streams.

pub mod bsdiff;
pub mod imgdiff;
