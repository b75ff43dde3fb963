//! blkapply-core: Block-level update apply engine.
//!
//! This crate provides:
//! - Block range sets and block-granular device I/O
//! - Transfer-list parsing and per-command executors
//! - bsdiff and image-diff patch application
//! - Stash storage keyed by content hash
//! - The transfer orchestrator with crash-safe retry
//! - Logging and apply statistics

pub mod block;
pub mod constants;
pub mod env;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod patch;
pub mod store;
pub mod transfer;

pub use block::{BlockPair, BlockSet};
pub use env::Env;
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat};
pub use metrics::ApplyStats;
pub use store::Store;
pub use transfer::{Command, CommandKind, EngineConfig, EngineState, TransferEngine};
