use std::path::PathBuf;
use std::time::Duration;

/// Tunables for a [`crate::Runner`]. All injectable; the defaults are sized
/// for a modest deployment.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Size of the worker pool.
    pub concurrency: usize,

    /// Max tasks dispatched per model per scheduling tick, so one busy model
    /// cannot monopolize the pool within a tick.
    pub concurrency_per_model: usize,

    /// Wall-clock budget per task. Also the lock period used when claiming
    /// rows, so a claimed row's visibility timeout is twice this.
    pub task_deadline: Duration,

    /// Scheduling-loop heartbeat period; the watchdog allows twice this
    /// between heartbeats before killing the process.
    pub watchdog_interval: Duration,

    /// Cadence of deletion sweeps.
    pub delete_interval: Duration,

    /// Floor for the scheduling-loop sleep.
    pub min_loop_delay: Duration,

    /// Ceiling for the exponential backoff applied while idle.
    pub max_loop_delay: Duration,

    /// When set, rewritten with the current epoch seconds on every watchdog
    /// tick so an external supervisor can watch its mtime.
    pub liveness_file: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            concurrency_per_model: 5,
            task_deadline: Duration::from_secs(15),
            watchdog_interval: Duration::from_secs(60),
            delete_interval: Duration::from_secs(30),
            min_loop_delay: Duration::from_millis(500),
            max_loop_delay: Duration::from_secs(5),
            liveness_file: None,
        }
    }
}
