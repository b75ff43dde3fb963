//! blkapply binary entry point.
//!
//! Opens the target, reads the transfer list and payload streams, runs the
//! engine, and reports progress on a terminal bar. Exit codes: 0 on success,
//! 2 on a transient failure worth retrying with `--retry`, 1 otherwise.

mod cli;
mod progress;

use std::fs::{File, OpenOptions};
use std::io::BufReader;

use clap::Parser;
use tracing::{error, info};

use blkapply_core::transfer::NewDataSource;
use blkapply_core::{ApplyStats, EngineConfig, Error, Result, TransferEngine};

use cli::Cli;
use progress::ProgressEnv;

fn main() {
    let cli = Cli::parse();

    let log_format = cli.log_format.into();
    if let Err(e) = blkapply_core::init_logging(cli.verbose, cli.log_file.as_deref(), log_format) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        target = %cli.target.display(),
        retry = cli.retry,
        "blkapply starting"
    );

    let env = ProgressEnv::new(cli.retry, !cli.no_progress);
    match run(&cli, &env) {
        Ok(stats) => {
            env.finish();
            if cli.stats {
                match serde_json::to_string_pretty(&stats) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!(error = %e, "failed to serialize statistics"),
                }
            }
            info!(
                commands = stats.commands_run,
                blocks = stats.blocks_written,
                "apply complete"
            );
        }
        Err(e) => {
            env.finish();
            error!(error = %e, "apply failed");
            eprintln!("blkapply: {}", e);
            let code = if e.is_transient() { 2 } else { 1 };
            std::process::exit(code);
        }
    }
}

fn run(cli: &Cli, env: &ProgressEnv) -> Result<ApplyStats> {
    let target = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cli.target)?;

    let list = std::fs::read_to_string(&cli.transfer_list)?;
    let lines: Vec<String> = list.lines().map(str::to_string).collect();

    let mut new_data = match &cli.new_data {
        Some(path) => Some(NewDataSource::new(BufReader::new(File::open(path)?))),
        None => None,
    };
    let patch = match &cli.patch {
        Some(path) => std::fs::read(path)?,
        None => Vec::new(),
    };

    let config = EngineConfig {
        store_base: cli.stash_dir.clone(),
        retry_file: cli.retry_file.clone(),
        block_size: cli.block_size,
    };
    let mut engine = TransferEngine::new(config, env)?;
    let stats = engine.run(&target, &lines, new_data.as_mut(), &patch)?;
    target.sync_all()?;

    // A completed apply owes nothing to a future retry.
    engine.free_stash_space()?;
    if let Err(e) = std::fs::remove_file(&cli.retry_file) {
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(Error::Io(e));
        }
    }

    Ok(stats)
}
