//! Apply-run statistics.

use serde::{Deserialize, Serialize};

/// Counters collected over one apply run.
///
/// Returned by the engine on success and usable for logging or reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStats {
    /// Commands executed to completion.
    pub commands_run: u64,
    /// Commands skipped by the retry logic or as unparseable lines.
    pub commands_skipped: u64,
    /// Payload blocks written to the target device.
    pub blocks_written: u64,
    /// Commands that found their expected post-state already in place.
    pub already_applied: u64,
    /// Stash entries persisted.
    pub stash_writes: u64,
    /// Stash entries released.
    pub stash_frees: u64,
}

impl ApplyStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }
}
