use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

/// Statistics shared by an entire `Scheduler`.
#[derive(Debug, Default)]
pub struct StatBlock {
    live: AtomicU64,
    ticks: AtomicU64,
    last_ns: AtomicU64,
    running: AtomicBool,
}

#[allow(missing_docs)]
impl StatBlock {
    #[inline]
    pub fn live_tasks(&self) -> u64 {
        self.live.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Returns the number of nanoseconds needed to tick every task in the last tick.
    #[inline]
    pub fn last_compute_cost_ns(&self) -> u64 {
        self.last_ns.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn add_task(&self) {
        self.live.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn remove_tasks(&self, n: u64) {
        self.live.fetch_sub(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn store_tick(&self, work: Duration) {
        self.last_ns.store(work.as_nanos() as u64, Ordering::Relaxed);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}
