//! A single clock for every playing session.
//!
//! One thread wakes every [`Config::period`] and ticks each live
//! [`ScheduledTask`] once, in the order they were added. Tasks are added and
//! removed through a channel, so the tick never waits on a caller's lock.

use std::{sync::Arc, time::Duration};

use flume::Sender;
use once_cell::sync::Lazy;
use tracing::warn;

mod config;
mod live;
mod stats;
mod task;

pub use config::*;
use live::*;
pub use stats::*;
pub use task::*;

/// The default shared scheduler instance, ticking every 20ms.
///
/// Users desiring a custom period should build their own [`Scheduler`] and
/// place it in [`crate::Config::scheduler`].
pub static DEFAULT_SCHEDULER: Lazy<Scheduler> = Lazy::new(Scheduler::default);

/// A reference to a shared thread which runs all live audio tasks.
#[derive(Clone, Debug)]
pub struct Scheduler {
    inner: Arc<InnerScheduler>,
}

/// Inner contents of a [`Scheduler`] instance.
///
/// This is an `Arc` around `Arc`'d contents so that we can make use of the
/// drop check on `Scheduler` to cleanup resources.
#[derive(Debug)]
struct InnerScheduler {
    tx: Sender<SchedulerMessage>,
    stats: Arc<StatBlock>,
}

impl Scheduler {
    /// Spawns a scheduler thread with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (tx, rx) = flume::unbounded();
        let stats = Arc::new(StatBlock::default());

        LiveCore::new(&config, rx, stats.clone()).spawn();

        Self {
            inner: Arc::new(InnerScheduler { tx, stats }),
        }
    }

    /// Adds a task to the set ticked by this scheduler, returning the handle
    /// needed to remove it.
    pub fn add(&self, task: Arc<dyn ScheduledTask>) -> TaskId {
        let id = TaskId::next();
        if self
            .inner
            .tx
            .send(SchedulerMessage::Add(id, task))
            .is_err()
        {
            warn!("Task {:?} added to a stopped scheduler.", id);
        }
        id
    }

    /// Removes a task, if it is still present. Takes effect before the next tick.
    pub fn remove(&self, id: TaskId) {
        _ = self.inner.tx.send(SchedulerMessage::Remove(id));
    }

    /// Drops every task and stops the scheduler thread.
    ///
    /// All later calls to [`add`] are ignored.
    ///
    /// [`add`]: Scheduler::add
    pub fn shutdown(&self) {
        _ = self.inner.tx.send(SchedulerMessage::Kill);
    }

    /// Returns whether the scheduler thread is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.stats.is_running()
    }

    /// Returns the number of tasks currently being ticked.
    #[must_use]
    pub fn live_tasks(&self) -> u64 {
        self.inner.stats.live_tasks()
    }

    /// Returns the number of ticks run since the scheduler started.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.inner.stats.ticks()
    }

    /// Returns the time spent ticking every task during the last tick.
    #[must_use]
    pub fn last_tick_cost(&self) -> Duration {
        Duration::from_nanos(self.inner.stats.last_compute_cost_ns())
    }
}

impl Drop for InnerScheduler {
    fn drop(&mut self) {
        _ = self.tx.send(SchedulerMessage::Kill);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler::new(Config::default())
    }
}

/// Control messages for a scheduler.
pub(crate) enum SchedulerMessage {
    /// Start ticking a task.
    Add(TaskId, Arc<dyn ScheduledTask>),
    /// Stop ticking a task.
    Remove(TaskId),
    /// Cleanup once all `Scheduler` handles are dropped, or on request.
    Kill,
}
