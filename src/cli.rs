use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use dirmon::output::EventFormat;

/// Watch a directory tree and print normalized change events.
///
/// dirmon runs the platform's native file-system notification stream on a dedicated
/// thread and prints every change as created/deleted/modified/renamed/unknown.
#[derive(Parser, Debug)]
#[command(
    name = "dirmon",
    version,
    about,
    long_about = None,
    propagate_version = true,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format for events.
#[derive(Clone, Debug, ValueEnum, Default)]
pub enum OutputFormat {
    /// One human-readable line per event (default).
    #[default]
    Compact,
    /// One JSON object per line, for programmatic consumption.
    Json,
}

impl From<OutputFormat> for EventFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Compact => EventFormat::Compact,
            OutputFormat::Json => EventFormat::Json,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Monitor a directory recursively until Ctrl-C (or `--duration` elapses).
    Watch {
        /// Directory to monitor.
        path: PathBuf,

        /// Configuration file (defaults to ./dirmon.toml when present).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the coalescing latency, in milliseconds.
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration: Option<u64>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Compact)]
        format: OutputFormat,
    },
}
