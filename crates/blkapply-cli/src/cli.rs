//! CLI argument parsing for blkapply.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for blkapply_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => blkapply_core::LogFormat::Text,
            CliLogFormat::Json => blkapply_core::LogFormat::Json,
        }
    }
}

/// blkapply - apply a block transfer list to a device or image.
#[derive(Debug, Parser)]
#[command(
    name = "blkapply",
    version,
    about = "blkapply - apply a block transfer list to a device or image"
)]
pub struct Cli {
    /// Target block device or image file (opened read-write)
    #[arg(value_name = "TARGET")]
    pub target: PathBuf,

    /// Transfer list file
    #[arg(value_name = "TRANSFER_LIST")]
    pub transfer_list: PathBuf,

    /// New-data stream backing NEW commands
    #[arg(long = "new-data", value_name = "FILE")]
    pub new_data: Option<PathBuf>,

    /// Patch stream backing BSDIFF/IMGDIFF commands
    #[arg(long = "patch", value_name = "FILE")]
    pub patch: Option<PathBuf>,

    /// Stash directory (created if missing)
    #[arg(long = "stash-dir", default_value = "blkapply.stash", value_name = "DIR")]
    pub stash_dir: PathBuf,

    /// Retry marker file
    #[arg(
        long = "retry-file",
        default_value = "blkapply.retry",
        value_name = "PATH"
    )]
    pub retry_file: PathBuf,

    /// Resume an interrupted apply from the retry marker
    #[arg(long = "retry")]
    pub retry: bool,

    /// Device block size in bytes
    #[arg(long = "block-size", default_value_t = blkapply_core::constants::BLOCK_SIZE)]
    pub block_size: usize,

    /// Print apply statistics as JSON on success
    #[arg(long = "stats")]
    pub stats: bool,

    /// Disable the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_minimal_invocation() {
        let cli = Cli::parse_from(["blkapply", "/dev/block/vendor", "transfer.list"]);
        assert_eq!(cli.target, PathBuf::from("/dev/block/vendor"));
        assert_eq!(cli.block_size, blkapply_core::constants::BLOCK_SIZE);
        assert!(!cli.retry);
    }

    #[test]
    fn parses_full_invocation() {
        let cli = Cli::parse_from([
            "blkapply",
            "image.bin",
            "transfer.list",
            "--new-data",
            "new.dat",
            "--patch",
            "patch.dat",
            "--retry",
            "--block-size",
            "512",
            "-vvv",
            "--log-format",
            "json",
        ]);
        assert!(cli.retry);
        assert_eq!(cli.block_size, 512);
        assert_eq!(cli.verbose, 3);
        assert_eq!(cli.log_format, CliLogFormat::Json);
    }
}
