use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tracing::error;

/// Kills the process if the scheduling loop stops beating.
///
/// The monitor runs on a plain OS thread so it keeps firing even when the
/// async runtime is wedged, which is exactly the condition it exists to
/// detect. Process liveness is the contract: in-flight work is sacrificed
/// and the supervisor restarts us.
pub(crate) struct Watchdog {
    inner: Arc<Inner>,
}

struct Inner {
    started: Instant,
    interval: Duration,
    last_beat_ms: AtomicU64,
    disarmed: AtomicBool,
}

impl Watchdog {
    pub(crate) fn arm(interval: Duration) -> Self {
        let inner = Arc::new(Inner {
            started: Instant::now(),
            interval,
            last_beat_ms: AtomicU64::new(0),
            disarmed: AtomicBool::new(false),
        });
        let monitor = Arc::clone(&inner);
        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                monitor.run();
            })
            .ok();
        Self { inner }
    }

    /// Called from the scheduling loop once per watchdog interval.
    pub(crate) fn beat(&self) {
        let elapsed = self.inner.started.elapsed().as_millis() as u64;
        self.inner.last_beat_ms.store(elapsed, Ordering::Relaxed);
    }

    pub(crate) fn disarm(&self) {
        self.inner.disarmed.store(true, Ordering::Relaxed);
    }
}

impl Inner {
    fn run(&self) {
        let poll = self.interval.min(Duration::from_secs(1));
        loop {
            std::thread::sleep(poll);
            if self.disarmed.load(Ordering::Relaxed) {
                return;
            }
            let now = self.started.elapsed();
            let last_beat = Duration::from_millis(self.last_beat_ms.load(Ordering::Relaxed));
            if expired(last_beat, now, self.interval) {
                error!("watchdog timeout exceeded, exiting");
                std::process::exit(2);
            }
        }
    }
}

/// The loop gets twice its own interval of slack before we give up on it.
fn expired(last_beat: Duration, now: Duration, interval: Duration) -> bool {
    now.saturating_sub(last_beat) > interval * 2
}
