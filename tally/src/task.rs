//! Fixed-delay background jobs.
//!
//! Peer polling, compaction and batch flushing all run as a [`PeriodicTask`]:
//! a named thread that waits an initial delay, runs the job, then waits one
//! interval between the end of a run and the start of the next.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Shutdown {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle to a background job running at a fixed delay.
///
/// Dropping the handle stops the job after its current cycle.
#[derive(Debug)]
pub struct PeriodicTask {
    name: String,
    shutdown: Arc<Shutdown>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawns `job` on a thread named `name`. The first run happens after
    /// `initial_delay` (zero runs it right away), later runs `interval` after
    /// the previous one finished.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn spawn<F>(
        name: impl Into<String>,
        initial_delay: Duration,
        interval: Duration,
        mut job: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        let shutdown = Arc::new(Shutdown::default());
        let signal = Arc::clone(&shutdown);

        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let mut delay = initial_delay;
            loop {
                {
                    let mut stopped = signal.stopped.lock();
                    if !*stopped && !delay.is_zero() {
                        signal.wake.wait_for(&mut stopped, delay);
                    }
                    if *stopped {
                        break;
                    }
                }
                job();
                delay = interval;
            }
        })?;

        tracing::debug!(task = %name, ?interval, "periodic task started");
        Ok(Self {
            name,
            shutdown,
            handle: Some(handle),
        })
    }

    /// The thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Prevents further cycles and waits for the thread. A cycle already in
    /// progress runs to completion.
    pub fn stop(&mut self) {
        *self.shutdown.stopped.lock() = true;
        self.shutdown.wake.notify_all();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!(task = %self.name, "periodic task panicked");
            }
            tracing::debug!(task = %self.name, "periodic task stopped");
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    #[test]
    fn test_runs_repeatedly() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let mut task = PeriodicTask::spawn(
            "test-repeat",
            Duration::ZERO,
            Duration::from_millis(10),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        task.stop();
        assert!(runs.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn test_stop_before_first_run() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let started = Instant::now();
        let hour = Duration::from_secs(3600);
        let task = PeriodicTask::spawn("test-stop", hour, hour, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert_eq!(task.name(), "test-stop");

        drop(task);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
