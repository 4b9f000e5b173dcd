//! Throttled progress reporting for a batch of render tasks.
//!
//! Workers call [`ProgressReporter::tick`] once per finished task; the
//! reporter forwards at most one [`ProgressEvent::Progress`] per throttle
//! interval so thousands of fast tasks don't flood the terminal. The final
//! tick of a batch always emits. Warnings and phase transitions bypass the
//! throttle entirely.
//!
//! Events go over an mpsc sender consumed by a printer thread in `main`;
//! formatting lives in [`crate::output`], which keeps this module free of
//! I/O and makes event streams assertable in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::export::Phase;

/// Default minimum interval between progress emissions.
const THROTTLE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// The coordinator entered a new phase.
    Phase(Phase),
    /// `done` of `total` tasks finished.
    Progress { done: usize, total: usize },
    /// A non-fatal condition worth surfacing (restarts, dropped API pages).
    Warning(String),
}

pub struct ProgressReporter {
    events: Option<Sender<ProgressEvent>>,
    interval: Duration,
    total: AtomicUsize,
    done: AtomicUsize,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(events: Option<Sender<ProgressEvent>>) -> Self {
        Self::with_interval(events, THROTTLE_INTERVAL)
    }

    pub fn with_interval(events: Option<Sender<ProgressEvent>>, interval: Duration) -> Self {
        Self {
            events,
            interval,
            total: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
            last_emit: Mutex::new(None),
        }
    }

    /// Reset counters for a new batch of `total` tasks.
    pub fn start_batch(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
        self.done.store(0, Ordering::SeqCst);
        *self.last_emit.lock().unwrap() = None;
    }

    /// Record one finished task. Emits a progress event if the throttle
    /// interval has elapsed or the batch just completed.
    pub fn tick(&self) {
        let done = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        let total = self.total.load(Ordering::SeqCst);

        let mut last = self.last_emit.lock().unwrap();
        let due = match *last {
            None => true,
            Some(at) => at.elapsed() >= self.interval,
        };
        if due || done == total {
            *last = Some(Instant::now());
            self.send(ProgressEvent::Progress { done, total });
        }
    }

    pub fn phase(&self, phase: Phase) {
        self.send(ProgressEvent::Phase(phase));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.send(ProgressEvent::Warning(message.into()));
    }

    fn send(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            // Receiver gone means the printer shut down; progress is best
            // effort and never fails the run.
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn collect(rx: mpsc::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn first_tick_emits_immediately() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::with_interval(Some(tx), Duration::from_secs(60));
        reporter.start_batch(10);
        reporter.tick();

        assert_eq!(
            collect(rx),
            vec![ProgressEvent::Progress { done: 1, total: 10 }]
        );
    }

    #[test]
    fn intermediate_ticks_are_throttled() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::with_interval(Some(tx), Duration::from_secs(60));
        reporter.start_batch(10);
        for _ in 0..5 {
            reporter.tick();
        }

        // Only the first tick got through the 60s throttle window.
        assert_eq!(collect(rx).len(), 1);
    }

    #[test]
    fn final_tick_always_emits() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::with_interval(Some(tx), Duration::from_secs(60));
        reporter.start_batch(3);
        reporter.tick();
        reporter.tick();
        reporter.tick();

        let events = collect(rx);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Progress { done: 3, total: 3 })
        );
    }

    #[test]
    fn warnings_bypass_throttle() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::with_interval(Some(tx), Duration::from_secs(60));
        reporter.warn("a");
        reporter.warn("b");

        assert_eq!(collect(rx).len(), 2);
    }

    #[test]
    fn no_sender_is_silent() {
        let reporter = ProgressReporter::new(None);
        reporter.start_batch(1);
        reporter.tick();
        reporter.warn("ignored");
    }
}
