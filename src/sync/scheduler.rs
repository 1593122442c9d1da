use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

pub const DEFAULT_FAST_POLL: Duration = Duration::from_secs(5);
pub const DEFAULT_SLOW_POLL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollIntervals {
    /// Used while push is absent or unconfirmed.
    pub fast: Duration,
    /// Used once push is confirmed; polling is only a backstop then.
    pub slow: Duration,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            fast: DEFAULT_FAST_POLL,
            slow: DEFAULT_SLOW_POLL,
        }
    }
}

/// Chooses the poll interval for one synchronizer instance.
///
/// The push flag is sticky: once confirmed it never downgrades. If push
/// silently drops later, the slow poll still bounds how stale state can get.
#[derive(Debug)]
pub struct PollScheduler {
    intervals: PollIntervals,
    push_connected: AtomicBool,
}

impl PollScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            push_connected: AtomicBool::new(false),
        }
    }

    pub fn mark_push_connected(&self) {
        if !self.push_connected.swap(true, Ordering::SeqCst) {
            log::debug!(
                "Push confirmed; polling every {:?} from now on",
                self.intervals.slow
            );
        }
    }

    pub fn is_push_connected(&self) -> bool {
        self.push_connected.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        if self.is_push_connected() {
            self.intervals.slow
        } else {
            self.intervals.fast
        }
    }

    /// Starts the single persistent poll loop for this instance. The interval
    /// is re-read before every sleep, so a push confirmation takes effect on
    /// the next cycle.
    pub fn spawn<F, Fut>(self: &Arc<Self>, name: &'static str, tick: F) -> PollTask
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(scheduler.interval()).await;
                log::trace!("{name}: poll tick");
                tick().await;
            }
        });
        PollTask { name, handle }
    }
}

/// Handle to a running poll loop. Stopping (or dropping) aborts the loop.
#[derive(Debug)]
pub struct PollTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl PollTask {
    pub fn stop(&self) {
        if !self.handle.is_finished() {
            log::debug!("{}: poll loop stopped", self.name);
        }
        self.handle.abort();
    }
}

impl Drop for PollTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
