use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;

/// The scheduler command surface.
///
/// Applications own their `main` and model registry; this parser is meant to
/// be embedded (`Cli::parse()` then [`crate::run_main`]).
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the scheduling loop over the registered models.
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// How many tasks to run at once.
    #[arg(long, short = 'c')]
    pub concurrency: Option<usize>,

    /// A file rewritten on every watchdog tick so a supervisor can watch its
    /// mtime.
    #[arg(long)]
    pub liveness_file: Option<PathBuf>,

    /// How many seconds to run for before exiting (0 = indefinitely).
    #[arg(long, short = 'r', default_value_t = 0)]
    pub run_for: u64,

    /// Model labels that should not be processed.
    #[arg(long = "exclude", short = 'x')]
    pub exclude: Vec<String>,

    /// Optional TOML file overriding the default runner settings.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Models to run; all registered models when empty.
    pub model_labels: Vec<String>,
}
