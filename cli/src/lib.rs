//! Embeddable command-line front end for the scheduler.
//!
//! The application owns its `main` and its model registry; this crate turns
//! parsed flags plus a registry into a running scheduler and an exit code:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> anyhow::Result<ExitCode> {
//!     let mut registry = ModelRegistry::new();
//!     registry.register(Arc::new(posts_engine));
//!     ratchet_cli::run_main(Cli::parse(), registry).await
//! }
//! ```
//!
//! Exit codes: 0 on normal shutdown, 130 on interrupt. A watchdog timeout
//! exits the process with status 2 directly from the watchdog thread.

mod cli;
mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ratchet_runner::ModelRegistry;
use ratchet_runner::Runner;
use ratchet_runner::RunnerConfig;
use tracing::info;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

pub use cli::Cli;
pub use cli::Command;
pub use cli::RunArgs;
pub use config::ConfigFile;

pub async fn run_main(cli: Cli, registry: ModelRegistry) -> anyhow::Result<ExitCode> {
    match cli.command {
        Command::Run(args) => run_command(args, registry).await,
    }
}

async fn run_command(args: RunArgs, registry: ModelRegistry) -> anyhow::Result<ExitCode> {
    init_logging();

    let mut config = RunnerConfig::default();
    if let Some(path) = &args.config {
        ConfigFile::load(path)?.apply(&mut config);
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if args.liveness_file.is_some() {
        config.liveness_file = args.liveness_file.clone();
    }

    let models = registry.resolve(&args.model_labels, &args.exclude)?;
    info!(
        "running for models: {}",
        models
            .iter()
            .map(|model| model.label())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let mut runner = Runner::new(config, models);
    let shutdown = runner.shutdown_token();
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                interrupted.store(true, Ordering::Relaxed);
                shutdown.cancel();
            }
        });
    }

    let run_for = (args.run_for > 0).then(|| Duration::from_secs(args.run_for));
    runner.run(run_for).await;

    if interrupted.load(Ordering::Relaxed) {
        warn!("interrupt received");
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}
