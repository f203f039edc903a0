use std::sync::atomic::{AtomicU64, Ordering};

/// Work run once per scheduler tick.
///
/// `tick` runs on the scheduler thread, so it must not block: a slow task
/// delays every other session's audio.
pub trait ScheduledTask: Send + Sync {
    /// Advances this task by one period.
    fn tick(&self);
}

/// Handle to a task placed on a [`Scheduler`].
///
/// [`Scheduler`]: super::Scheduler
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}
