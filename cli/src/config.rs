use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use ratchet_runner::RunnerConfig;
use serde::Deserialize;

/// Optional TOML overrides for [`RunnerConfig`].
///
/// Every field is optional; anything absent keeps its default. Durations are
/// spelled out in the unit their default is naturally expressed in.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub concurrency: Option<usize>,
    pub concurrency_per_model: Option<usize>,
    pub task_deadline_secs: Option<u64>,
    pub watchdog_interval_secs: Option<u64>,
    pub delete_interval_secs: Option<u64>,
    pub min_loop_delay_ms: Option<u64>,
    pub max_loop_delay_ms: Option<u64>,
    pub liveness_file: Option<PathBuf>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn apply(&self, config: &mut RunnerConfig) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(per_model) = self.concurrency_per_model {
            config.concurrency_per_model = per_model;
        }
        if let Some(secs) = self.task_deadline_secs {
            config.task_deadline = Duration::from_secs(secs);
        }
        if let Some(secs) = self.watchdog_interval_secs {
            config.watchdog_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.delete_interval_secs {
            config.delete_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = self.min_loop_delay_ms {
            config.min_loop_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_loop_delay_ms {
            config.max_loop_delay = Duration::from_millis(ms);
        }
        if let Some(path) = &self.liveness_file {
            config.liveness_file = Some(path.clone());
        }
    }
}
