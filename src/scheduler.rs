use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

/// Longest uninterrupted sleep, so a stop request is noticed promptly
const STOP_POLL: Duration = Duration::from_secs(1);

/// Runs one job at a fixed cadence. A run that overruns its interval is
/// followed immediately by the next one; runs never overlap.
pub struct PeriodicTask<F> {
    name: String,
    interval: Duration,
    task: F,
    runs: u64,
    overruns: u64,
    worst_case: Duration,
}

impl<F: FnMut()> PeriodicTask<F> {
    pub fn new(name: impl Into<String>, interval: Duration, task: F) -> Self {
        Self {
            name: name.into(),
            interval,
            task,
            runs: 0,
            overruns: 0,
            worst_case: Duration::ZERO,
        }
    }

    /// Run the job once. Returns how long it took.
    pub fn tick(&mut self) -> Duration {
        let start = Instant::now();
        (self.task)();
        let elapsed = start.elapsed();

        self.runs += 1;
        if elapsed > self.interval {
            self.overruns += 1;
            warn!("[{}] run took {:?}, longer than its {:?} interval", self.name, elapsed, self.interval);
        }
        if elapsed > self.worst_case {
            self.worst_case = elapsed;
        }
        elapsed
    }

    /// Tick until `stop` is raised.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!("[{}] scheduled every {:?}", self.name, self.interval);
        while !stop.load(Ordering::Relaxed) {
            let elapsed = self.tick();
            let mut remaining = self.interval.saturating_sub(elapsed);
            while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
                let nap = remaining.min(STOP_POLL);
                std::thread::sleep(nap);
                remaining -= nap;
            }
        }
        debug!(
            "[{}] stopped after {} runs ({} overruns, worst {:?})",
            self.name, self.runs, self.overruns, self.worst_case
        );
    }

    pub fn runs(&self) -> u64 {
        self.runs
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

/// Start `task` on its own named thread.
pub fn spawn<F>(name: &str, interval: Duration, task: F, stop: Arc<AtomicBool>) -> std::io::Result<JoinHandle<()>>
where
    F: FnMut() + Send + 'static,
{
    let mut periodic = PeriodicTask::new(name, interval, task);
    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || periodic.run(&stop))
}
