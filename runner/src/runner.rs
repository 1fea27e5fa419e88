use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use ratchet_engine::ModelQueue;
use ratchet_engine::TransitionJob;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::LoopingTimer;
use crate::RunnerConfig;
use crate::watchdog::Watchdog;

/// Runs tasks on models that are looking for state changes.
///
/// Designed to run either indefinitely or for a limited time:
/// `run(Some(Duration::ZERO))` performs a single scheduling pass and drains,
/// which is the shape tests and cron-style invocations want.
pub struct Runner {
    config: RunnerConfig,
    models: Vec<Arc<dyn ModelQueue>>,
    slots: Vec<Option<RunningTask>>,
    handled: Arc<Mutex<HashMap<String, u64>>>,
    shutdown: CancellationToken,
}

struct RunningTask {
    handle: AbortOnDropHandle<()>,
    cancel: CancellationToken,
    deadline: Instant,
}

impl Runner {
    pub fn new(config: RunnerConfig, models: Vec<Arc<dyn ModelQueue>>) -> Self {
        let slots = (0..config.concurrency).map(|_| None).collect();
        Self {
            config,
            models,
            slots,
            handled: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel this to request a graceful shutdown from outside the loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// How many tasks were run to completion per model label.
    pub async fn handled(&self) -> HashMap<String, u64> {
        self.handled.lock().await.clone()
    }

    /// The scheduling loop.
    pub async fn run(&mut self, run_for: Option<Duration>) {
        let started = Instant::now();
        let mut loop_delay = self.config.min_loop_delay;
        let mut watchdog_timer = LoopingTimer::new(self.config.watchdog_interval);
        let mut deletion_timer = LoopingTimer::new(self.config.delete_interval);
        let watchdog = Watchdog::arm(self.config.watchdog_interval);

        info!("running main task loop");
        loop {
            if watchdog_timer.check() {
                watchdog.beat();
                if let Some(path) = &self.config.liveness_file
                    && let Err(err) = write_liveness(path)
                {
                    warn!("failed to write liveness file {}: {err}", path.display());
                }
            }

            // Reclaim slots from overdue and completed tasks before counting
            // idle capacity.
            self.check_worker_deadlines();
            self.reap_finished();

            if deletion_timer.check() {
                self.add_deletion_tasks();
            }

            self.add_transition_tasks().await;

            if let Some(limit) = run_for
                && started.elapsed() > limit
            {
                break;
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            // Prevent busylooping, but back the delay off when idle. Limited
            // runs shorter than the backoff ceiling always poll at the floor.
            if self.busy_workers() > 0
                || run_for.is_some_and(|limit| limit < self.config.max_loop_delay)
            {
                loop_delay = self.config.min_loop_delay;
            } else {
                loop_delay = loop_delay.mul_f64(1.5).min(self.config.max_loop_delay);
            }
            tokio::select! {
                () = tokio::time::sleep(loop_delay) => {}
                () = self.shutdown.cancelled() => break,
            }
        }

        // Give in-flight tasks up to one task deadline to finish, enforcing
        // deadlines throughout, then drop whatever is left.
        info!("waiting for tasks to complete");
        for _ in 0..self.config.task_deadline.as_secs().max(1) {
            self.reap_finished();
            if self.busy_workers() == 0 {
                break;
            }
            self.check_worker_deadlines();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.abort_all();
        watchdog.disarm();
        info!("complete");
    }

    fn idle_workers(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_none()).count()
    }

    fn busy_workers(&self) -> usize {
        self.slots.len() - self.idle_workers()
    }

    /// Claim ready rows from each model in turn, capped per model, until the
    /// pool's idle capacity is used up. The model list is then rotated by
    /// one so no model can starve the others across ticks.
    async fn add_transition_tasks(&mut self) {
        let mut space_remaining = self.idle_workers();
        let models = self.models.clone();
        for model in models {
            if space_remaining == 0 {
                break;
            }
            let batch = space_remaining.min(self.config.concurrency_per_model);
            match model.claim_ready(batch, self.config.task_deadline).await {
                Ok(jobs) => {
                    for job in jobs {
                        self.spawn_transition(model.label().to_string(), job);
                        space_remaining -= 1;
                    }
                }
                Err(err) => {
                    error!("{}: failed to claim ready rows: {err}", model.label());
                }
            }
        }
        if self.models.len() > 1 {
            self.models.rotate_left(1);
        }
    }

    /// One deletion sweep task per model that has deletion states.
    fn add_deletion_tasks(&mut self) {
        let models = self.models.clone();
        for model in models {
            if model.has_deletion_states() && self.idle_workers() > 0 {
                self.spawn_delete(model);
            }
        }
    }

    fn spawn_transition(&mut self, label: String, job: TransitionJob) {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            error!("cannot assign task to any worker");
            return;
        };
        let cancel = CancellationToken::new();
        let watch = cancel.child_token();
        let handled = Arc::clone(&self.handled);
        let row = job.row().to_string();
        let deadline = Instant::now() + self.config.task_deadline;
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            tokio::select! {
                // Cancelled: abandon the row without touching it; the
                // visibility timeout from the claim retries it naturally.
                () = watch.cancelled() => {}
                result = job.run() => {
                    let elapsed = started.elapsed().as_secs_f64();
                    match result {
                        Ok(outcome) => {
                            match &outcome.new_state {
                                Some(next) => info!(
                                    "{label}: {row}: {} -> {next} ({elapsed:.2}s)",
                                    outcome.previous_state
                                ),
                                None => info!(
                                    "{label}: {row}: {} unchanged ({elapsed:.2}s)",
                                    outcome.previous_state
                                ),
                            }
                            *handled.lock().await.entry(label).or_insert(0) += 1;
                        }
                        Err(err) => error!("{label}: {row}: transition failed: {err}"),
                    }
                }
            }
        });
        *slot = Some(RunningTask {
            handle: AbortOnDropHandle::new(handle),
            cancel,
            deadline,
        });
    }

    fn spawn_delete(&mut self, model: Arc<dyn ModelQueue>) {
        let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
            return;
        };
        let cancel = CancellationToken::new();
        let watch = cancel.child_token();
        let handled = Arc::clone(&self.handled);
        let deadline = Instant::now() + self.config.task_deadline;
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = watch.cancelled() => {}
                () = run_delete_sweep(model, handled) => {}
            }
        });
        *slot = Some(RunningTask {
            handle: AbortOnDropHandle::new(handle),
            cancel,
            deadline,
        });
    }

    /// Cancel any task that has outlived its deadline and free its slot
    /// immediately; the pool recovers without waiting on the task.
    fn check_worker_deadlines(&mut self) {
        let now = Instant::now();
        for slot in &mut self.slots {
            let overdue = slot
                .as_ref()
                .is_some_and(|task| task.deadline < now && !task.handle.is_finished());
            if overdue && let Some(task) = slot.take() {
                warn!("task exceeded its deadline, cancelling");
                task.cancel.cancel();
                task.handle.abort();
            }
        }
    }

    fn reap_finished(&mut self) {
        for slot in &mut self.slots {
            if slot.as_ref().is_some_and(|task| task.handle.is_finished()) {
                *slot = None;
            }
        }
    }

    fn abort_all(&mut self) {
        for slot in &mut self.slots {
            if let Some(task) = slot.take() {
                task.cancel.cancel();
                task.handle.abort();
            }
        }
    }
}

/// Sweep until two consecutive passes agree the backlog has drained.
async fn run_delete_sweep(model: Arc<dyn ModelQueue>, handled: Arc<Mutex<HashMap<String, u64>>>) {
    let label = model.label().to_string();
    let mut total: u64 = 0;
    let mut last_total: Option<u64> = None;
    while last_total != Some(total) {
        last_total = Some(total);
        match model.delete_expired().await {
            Ok(deleted) => total += deleted,
            Err(err) => {
                error!("{label}: deletion sweep failed: {err}");
                break;
            }
        }
    }
    info!("{label}: deleted {total} stale rows");
    *handled.lock().await.entry(label).or_insert(0) += total;
}

fn write_liveness(path: &Path) -> io::Result<()> {
    let epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    std::fs::write(path, epoch.to_string())
}
