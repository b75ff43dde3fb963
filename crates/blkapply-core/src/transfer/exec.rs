//! Per-verb command execution.
//!
//! A closed dispatch over [`CommandKind`]; each verb's semantics live in a
//! small function against the [`BlockSet`] abstraction. Failures are
//! classified here: transient I/O faults become [`CommandOutcome::NeedRetry`]
//! (the caller restarts the whole apply later), everything else becomes
//! [`CommandOutcome::Failed`].

use std::fs::File;
use std::io::Read;

use tracing::{debug, error, info, warn};

use crate::block::{matches_sha256, verify_sha256, BlockPair, BlockSet};
use crate::error::{Error, Result};
use crate::metrics::ApplyStats;
use crate::patch;
use crate::store::Store;
use crate::transfer::command::{Command, CommandKind};
use crate::transfer::new_data::NewDataSource;

/// Result of executing one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Command completed; the apply moves on.
    Success,
    /// Transient fault; the whole apply should be restarted later.
    NeedRetry,
    /// Unrecoverable failure; the apply is broken.
    Failed,
}

/// Shared resources a command executes against.
pub struct ExecContext<'a, R> {
    /// Open descriptor of the target block device or image.
    pub target: &'a File,
    /// Stash store for preserved block contents.
    pub store: &'a Store,
    /// Sequential source of NEW-command payload, if the package carries one.
    pub new_data: Option<&'a mut NewDataSource<R>>,
    /// The whole patch stream; diff commands address windows into it.
    pub patch: &'a [u8],
    /// Device block size in bytes.
    pub block_size: usize,
    /// Counters updated as commands run.
    pub stats: &'a mut ApplyStats,
}

/// Execute one command, classifying any error into an outcome.
pub fn execute<R: Read>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> CommandOutcome {
    let result = match cmd.kind() {
        CommandKind::New => run_new(cmd, ctx),
        CommandKind::Zero => run_zero(cmd, ctx),
        CommandKind::Move => run_move(cmd, ctx),
        CommandKind::Bsdiff | CommandKind::Imgdiff => run_diff(cmd, ctx),
        CommandKind::Stash => run_stash(cmd, ctx),
        CommandKind::Free => run_free(cmd, ctx),
        // The sentinel is filtered out before dispatch.
        CommandKind::Last => Ok(()),
    };
    match result {
        Ok(()) => CommandOutcome::Success,
        Err(e) if e.is_transient() => {
            warn!(line = cmd.line(), error = %e, "transient fault, apply must be retried");
            CommandOutcome::NeedRetry
        }
        Err(e) => {
            error!(line = cmd.line(), error = %e, "command failed");
            CommandOutcome::Failed
        }
    }
}

fn target_set(cmd: &Command) -> Result<&BlockSet> {
    cmd.target().ok_or_else(|| Error::Command {
        message: format!("{:?} without target range", cmd.kind()),
    })
}

fn source_set(cmd: &Command) -> Result<&BlockSet> {
    cmd.source().ok_or_else(|| Error::Command {
        message: format!("{:?} without source range", cmd.kind()),
    })
}

fn read_set<R>(set: &BlockSet, ctx: &ExecContext<'_, R>) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; set.total_size(ctx.block_size)];
    set.read_from(ctx.target, &mut buf, ctx.block_size)?;
    Ok(buf)
}

fn run_new<R: Read>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> Result<()> {
    let tgt = target_set(cmd)?;
    let mut buf = vec![0u8; tgt.total_size(ctx.block_size)];
    let source = ctx.new_data.as_mut().ok_or_else(|| Error::NewData {
        message: "no new-data stream supplied".into(),
    })?;
    source.fill(&mut buf)?;
    verify_sha256(&buf, cmd.hash())?;
    tgt.write_to(ctx.target, &buf, ctx.block_size)?;
    debug!(blocks = tgt.total_blocks(), "new data written");
    Ok(())
}

fn run_zero<R>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> Result<()> {
    let tgt = target_set(cmd)?;
    tgt.zero_fill(ctx.target, ctx.block_size)?;
    debug!(blocks = tgt.total_blocks(), "blocks zeroed");
    Ok(())
}

fn run_move<R>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> Result<()> {
    let src = source_set(cmd)?;
    let tgt = target_set(cmd)?;
    if let Some(declared) = cmd.source_blocks() {
        if declared != src.total_blocks() {
            return Err(Error::Command {
                message: format!(
                    "move declares {} source blocks, range covers {}",
                    declared,
                    src.total_blocks()
                ),
            });
        }
    }
    if src.total_blocks() != tgt.total_blocks() {
        return Err(Error::Command {
            message: format!(
                "move size mismatch: {} source vs {} target blocks",
                src.total_blocks(),
                tgt.total_blocks()
            ),
        });
    }

    let buf = if src.overlaps(tgt) {
        // Target writes will clobber parts of the source region. Load the
        // covering span in one read, then gather the source blocks out of
        // it before anything is written back.
        let lo = src.pairs().iter().map(|p| p.start).min().unwrap_or(0);
        let hi = src.pairs().iter().map(|p| p.end).max().unwrap_or(lo);
        let span = BlockSet::from_pairs(vec![BlockPair { start: lo, end: hi }]);
        let mut span_buf = vec![0u8; span.total_size(ctx.block_size)];
        span.read_from(ctx.target, &mut span_buf, ctx.block_size)?;

        let relative = BlockSet::from_pairs(
            src.pairs()
                .iter()
                .map(|p| BlockPair {
                    start: p.start - lo,
                    end: p.end - lo,
                })
                .collect(),
        );
        let mut gathered = vec![0u8; src.total_size(ctx.block_size)];
        BlockSet::move_blocks(&span_buf, &relative, &mut gathered, ctx.block_size)?;
        gathered
    } else {
        read_set(src, ctx)?
    };

    if verify_sha256(&buf, cmd.hash()).is_err() {
        // Interrupted previous attempt: the data may already sit in the
        // target blocks.
        let current = read_set(tgt, ctx)?;
        if matches_sha256(&current, cmd.hash()) {
            info!(line = cmd.line(), "move already applied, skipping");
            ctx.stats.already_applied += 1;
            return Ok(());
        }
        return verify_sha256(&buf, cmd.hash());
    }

    tgt.write_to(ctx.target, &buf, ctx.block_size)?;
    debug!(blocks = tgt.total_blocks(), "blocks moved");
    Ok(())
}

fn run_diff<R>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> Result<()> {
    let src = source_set(cmd)?;
    let tgt = target_set(cmd)?;
    let (offset, len) = cmd.patch_window().ok_or_else(|| Error::Command {
        message: "diff command without patch window".into(),
    })?;
    let window = ctx
        .patch
        .get(offset as usize..(offset as usize).saturating_add(len as usize))
        .ok_or_else(|| Error::Patch {
            message: format!(
                "patch window {}+{} outside stream of {} bytes",
                offset,
                len,
                ctx.patch.len()
            ),
        })?;

    let src_buf = read_set(src, ctx)?;
    // Idempotence check for retry: the source range may already hold the
    // expected post-patch content.
    if matches_sha256(&src_buf, cmd.hash()) {
        info!(line = cmd.line(), "patch already applied, skipping");
        ctx.stats.already_applied += 1;
        return Ok(());
    }

    let out = match cmd.kind() {
        CommandKind::Bsdiff => patch::bsdiff::apply(&src_buf, window)?,
        CommandKind::Imgdiff => patch::imgdiff::apply(&src_buf, window)?,
        _ => unreachable!("run_diff dispatched for non-diff verb"),
    };
    verify_sha256(&out, cmd.hash())?;
    let expected = tgt.total_size(ctx.block_size);
    if out.len() != expected {
        return Err(Error::Patch {
            message: format!(
                "patched content is {} bytes, target set holds {}",
                out.len(),
                expected
            ),
        });
    }
    tgt.write_to(ctx.target, &out, ctx.block_size)?;
    debug!(blocks = tgt.total_blocks(), "patched blocks written");
    Ok(())
}

fn run_stash<R>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> Result<()> {
    let src = source_set(cmd)?;
    let buf = read_set(src, ctx)?;
    verify_sha256(&buf, cmd.hash())?;
    if ctx.store.contains(cmd.hash()) {
        debug!(hash = cmd.hash(), "stash entry already present");
        return Ok(());
    }
    ctx.store.write(cmd.hash(), &buf)?;
    ctx.stats.stash_writes += 1;
    Ok(())
}

fn run_free<R>(cmd: &Command, ctx: &mut ExecContext<'_, R>) -> Result<()> {
    ctx.store.free(cmd.hash())?;
    ctx.stats.stash_frees += 1;
    Ok(())
}
