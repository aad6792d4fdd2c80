//! The interrupt rate limiter.
//!
//! A periodic timer toggles a phase flag; the main loop's poll routine
//! samples that flag and drives the host-visible PROCEED line from it when
//! the live handler warrants an interrupt. The flag is the only state
//! shared with the timer context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::debug;

/// Default toggle interval in milliseconds.
pub const DEFAULT_TIMER_RATE_MS: u16 = 100;

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic phase toggler for PROCEED rate limiting.
///
/// `start` replaces any running timer; `stop` is idempotent. The timer
/// runs iff a handler is live: the command processor stops it in Open's
/// prelude and starts it only after a successful Open.
pub struct InterruptTimer {
    phase: Arc<AtomicBool>,
    rate: Duration,
    worker: Option<Worker>,
}

impl InterruptTimer {
    pub fn new() -> Self {
        Self::with_rate(Duration::from_millis(u64::from(DEFAULT_TIMER_RATE_MS)))
    }

    pub fn with_rate(rate: Duration) -> Self {
        Self {
            phase: Arc::new(AtomicBool::new(false)),
            rate: rate.max(Duration::from_millis(1)),
            worker: None,
        }
    }

    /// The toggle interval currently configured.
    pub fn rate(&self) -> Duration {
        self.rate
    }

    /// Reconfigure the toggle interval. Takes effect on the next `start`.
    pub fn set_rate(&mut self, rate: Duration) {
        self.rate = rate.max(Duration::from_millis(1));
    }

    /// Current phase of the toggled flag.
    pub fn phase(&self) -> bool {
        self.phase.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the periodic toggle, replacing any running timer.
    pub fn start(&mut self) {
        self.stop();
        let phase = Arc::clone(&self.phase);
        let rate = self.rate;
        let (stop, ticks) = mpsc::channel();
        let handle = std::thread::spawn(move || loop {
            match ticks.recv_timeout(rate) {
                Err(RecvTimeoutError::Timeout) => {
                    phase.fetch_xor(true, Ordering::Relaxed);
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        debug!(rate_ms = rate.as_millis() as u64, "interrupt timer started");
        self.worker = Some(Worker { stop, handle });
    }

    /// Stop the timer if it is running.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop.send(());
            let _ = worker.handle.join();
            debug!("interrupt timer stopped");
        }
    }
}

impl Default for InterruptTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for InterruptTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let mut timer = InterruptTimer::new();
        timer.stop();
        timer.start();
        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
    }

    #[test]
    fn start_replaces_running_timer() {
        let mut timer = InterruptTimer::with_rate(Duration::from_millis(5));
        timer.start();
        timer.start();
        assert!(timer.is_running());
        timer.stop();
    }

    #[test]
    fn phase_toggles_while_running() {
        let mut timer = InterruptTimer::with_rate(Duration::from_millis(2));
        let initial = timer.phase();
        timer.start();
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while timer.phase() == initial && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        timer.stop();
        assert_ne!(timer.phase(), initial);
    }

    #[test]
    fn zero_rate_is_clamped() {
        let timer = InterruptTimer::with_rate(Duration::ZERO);
        assert!(timer.rate() >= Duration::from_millis(1));
    }
}
