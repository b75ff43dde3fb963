//! The transfer orchestrator.
//!
//! [`TransferEngine`] replays a transfer list against an open target device:
//! it parses the four-line header, iterates command lines, dispatches each
//! to its executor, tracks cumulative progress, and persists a retry marker
//! after every completed non-NEW command. On a retry run it reloads the
//! marker and skips everything up to and including the marked command. NEW
//! commands are the exception: they always execute, because their payload
//! comes from a sequential stream and is not hash-checkable against
//! pre-existing content.
//!
//! The engine is an explicit, caller-owned value with a
//! `create → run → drop` lifecycle; there is no process-wide state.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::constants::{
    RETRY_FILE_GID, RETRY_FILE_UID, TOPIC_RETRY_UPDATE, TOPIC_SET_PROGRESS, TRANSFER_HEADER_LINES,
};
use crate::env::Env;
use crate::error::{Error, Result};
use crate::metrics::ApplyStats;
use crate::store::Store;
use crate::transfer::command::{Command, CommandKind};
use crate::transfer::exec::{execute, CommandOutcome, ExecContext};
use crate::transfer::new_data::NewDataSource;

/// Apply lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, nothing parsed yet.
    Idle,
    /// Header consumed and validated.
    HeaderParsed,
    /// Executing command lines.
    Running,
    /// Every command completed.
    Completed,
    /// A command failed unrecoverably.
    Failed,
    /// A transient fault; restart the apply to resume from the marker.
    NeedsRetry,
}

/// Header tokens from the top of the transfer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferHeader {
    /// Transfer-list format version.
    pub version: u64,
    /// Total payload blocks the list writes; progress denominator.
    pub total_blocks: u64,
    /// Maximum simultaneously held stash entries.
    pub max_entries: u64,
    /// Maximum blocks held in the stash at once.
    pub max_blocks: u64,
}

/// Engine construction parameters.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Stash directory root.
    pub store_base: PathBuf,
    /// Retry marker file path.
    pub retry_file: PathBuf,
    /// Device block size in bytes.
    pub block_size: usize,
}

/// Orchestrator for one apply attempt.
pub struct TransferEngine<'e> {
    config: EngineConfig,
    env: &'e dyn Env,
    store: Store,
    state: EngineState,
    written: u64,
    init_block: Option<u64>,
    stats: ApplyStats,
}

impl<'e> TransferEngine<'e> {
    /// Create an engine.
    ///
    /// On a fresh (non-retry) attempt the stash directory is cleared; a
    /// retry attempt keeps prior stash entries so interrupted commands can
    /// resume from them.
    pub fn new(config: EngineConfig, env: &'e dyn Env) -> Result<Self> {
        let store = Store::new(&config.store_base);
        store.create_new_space(!env.is_retry())?;
        Ok(Self {
            config,
            env,
            store,
            state: EngineState::Idle,
            written: 0,
            init_block: None,
            stats: ApplyStats::new(),
        })
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Replay the transfer list against `target`.
    ///
    /// `new_data` backs NEW commands; `patch` backs the diff commands.
    /// Returns the run's statistics on success. Any command failure aborts
    /// the loop immediately with [`Error::CommandFailed`] or
    /// [`Error::NeedRetry`].
    pub fn run<R: Read>(
        &mut self,
        target: &File,
        lines: &[String],
        mut new_data: Option<&mut NewDataSource<R>>,
        patch: &[u8],
    ) -> Result<ApplyStats> {
        let header = Self::parse_header(lines)?;
        self.state = EngineState::HeaderParsed;
        info!(
            version = header.version,
            total_blocks = header.total_blocks,
            max_entries = header.max_entries,
            max_blocks = header.max_blocks,
            "transfer header parsed"
        );

        let mut retry_cmd = if self.env.is_retry() {
            self.reload_for_retry()
        } else {
            String::new()
        };
        if !retry_cmd.is_empty() {
            info!(marker = retry_cmd.as_str(), "resuming after retry marker");
        }

        self.state = EngineState::Running;
        for line in &lines[TRANSFER_HEADER_LINES..] {
            let cmd = match Command::parse(line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    warn!(line = line.as_str(), error = %e, "skipping unparseable line");
                    self.stats.commands_skipped += 1;
                    continue;
                }
            };
            if cmd.kind() == CommandKind::Last {
                continue;
            }

            // Retry skip rule: everything up to and including the marked
            // command already completed in the interrupted attempt. NEW is
            // the exception; it always executes so the new-data stream
            // position stays consistent.
            if !retry_cmd.is_empty() && self.env.is_retry() {
                if *line == retry_cmd {
                    debug!(line = line.as_str(), "retry marker reached");
                    retry_cmd.clear();
                    self.stats.commands_skipped += 1;
                    continue;
                }
                if cmd.kind() != CommandKind::New {
                    self.stats.commands_skipped += 1;
                    continue;
                }
            }

            if self.init_block.is_none() && cmd.kind().writes_payload() {
                self.init_block = Some(self.written);
            }

            let outcome = {
                let mut ctx = ExecContext {
                    target,
                    store: &self.store,
                    new_data: new_data.as_mut().map(|s| &mut **s),
                    patch,
                    block_size: self.config.block_size,
                    stats: &mut self.stats,
                };
                execute(&cmd, &mut ctx)
            };
            self.check_result(outcome, line, cmd.kind())?;
            self.stats.commands_run += 1;

            if cmd.kind().writes_payload() {
                let blocks = cmd.target().map(|t| t.total_blocks()).unwrap_or(0);
                self.written += blocks;
                self.stats.blocks_written += blocks;
            }
            self.post_progress(cmd.kind(), &header);
        }

        self.state = EngineState::Completed;
        info!(
            commands = self.stats.commands_run,
            blocks = self.stats.blocks_written,
            "transfer list applied"
        );
        Ok(self.stats.clone())
    }

    fn parse_header(lines: &[String]) -> Result<TransferHeader> {
        if lines.len() < TRANSFER_HEADER_LINES {
            return Err(Error::TransferList {
                message: format!(
                    "header needs {} lines, got {}",
                    TRANSFER_HEADER_LINES,
                    lines.len()
                ),
            });
        }
        let mut fields = [0u64; TRANSFER_HEADER_LINES];
        for (i, field) in fields.iter_mut().enumerate() {
            *field = lines[i].trim().parse().map_err(|_| Error::TransferList {
                message: format!("bad header token {:?}", lines[i]),
            })?;
        }
        Ok(TransferHeader {
            version: fields[0],
            total_blocks: fields[1],
            max_entries: fields[2],
            max_blocks: fields[3],
        })
    }

    fn check_result(&mut self, outcome: CommandOutcome, line: &str, kind: CommandKind) -> Result<()> {
        match outcome {
            CommandOutcome::Success => {
                // NEW is never registered: it must re-execute on retry.
                if kind != CommandKind::New {
                    self.register_for_retry(line)?;
                }
                Ok(())
            }
            CommandOutcome::NeedRetry => {
                self.state = EngineState::NeedsRetry;
                self.env.post_message(TOPIC_RETRY_UPDATE, line);
                Err(Error::NeedRetry { line: line.into() })
            }
            CommandOutcome::Failed => {
                self.state = EngineState::Failed;
                Err(Error::CommandFailed { line: line.into() })
            }
        }
    }

    fn post_progress(&self, kind: CommandKind, header: &TransferHeader) {
        if !Self::needs_progress(kind) || header.total_blocks == 0 {
            return;
        }
        let base = self.init_block.unwrap_or(0);
        let fraction = (self.written - base) as f64 / header.total_blocks as f64;
        self.env
            .post_message(TOPIC_SET_PROGRESS, &format!("{:.6}", fraction));
    }

    /// Verbs that advance user-visible progress. MOVE, STASH and FREE are
    /// housekeeping and post nothing.
    pub fn needs_progress(kind: CommandKind) -> bool {
        matches!(
            kind,
            CommandKind::New | CommandKind::Imgdiff | CommandKind::Bsdiff | CommandKind::Zero
        )
    }

    /// Persist `line` as the retry marker, fsyncing before returning.
    ///
    /// The fsync is the crash-safety boundary: a crash before it re-runs
    /// this command on retry, a crash after it resumes past it.
    pub fn register_for_retry(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.config.retry_file)?;
        if let Err(e) = std::os::unix::fs::fchown(&file, Some(RETRY_FILE_UID), Some(RETRY_FILE_GID))
        {
            // Unprivileged runs cannot chown; the marker still works.
            debug!(error = %e, "retry marker chown failed");
        }
        file.write_all(line.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Load the pending retry marker.
    ///
    /// A missing or unreadable file means "no prior retry state" and yields
    /// an empty marker, not an error.
    pub fn reload_for_retry(&self) -> String {
        match std::fs::read_to_string(&self.config.retry_file) {
            Ok(marker) => marker,
            Err(e) => {
                debug!(error = %e, "no retry marker to reload");
                String::new()
            }
        }
    }

    /// Drop all stash entries; called by the pipeline after a fully
    /// successful apply.
    pub fn free_stash_space(&self) -> Result<()> {
        self.store.do_free_space()
    }
}
