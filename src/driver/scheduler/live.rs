use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use flume::{Receiver, TryRecvError};
use tracing::{debug, trace};

use super::*;

pub(crate) struct LiveCore {
    tasks: Vec<Arc<dyn ScheduledTask>>,
    ids: Vec<TaskId>,

    deadline: Instant,
    period: Duration,
    #[cfg(test)]
    tick_style: TickStyle,

    rx: Receiver<SchedulerMessage>,
    stats: Arc<StatBlock>,
}

impl LiveCore {
    pub(crate) fn new(config: &Config, rx: Receiver<SchedulerMessage>, stats: Arc<StatBlock>) -> Self {
        stats.set_running(true);

        Self {
            tasks: vec![],
            ids: vec![],

            deadline: Instant::now(),
            period: config.period,
            #[cfg(test)]
            tick_style: config.tick_style,

            rx,
            stats,
        }
    }

    fn run(&mut self) {
        trace!("Scheduler started.");
        while self.run_once() {}
        self.clear();
        self.stats.set_running(false);
        trace!("Scheduler finished.");
    }

    /// Runs one tick, returning `false` once the scheduler must exit.
    #[inline]
    pub(crate) fn run_once(&mut self) -> bool {
        if self.handle_scheduler_msgs().is_err() {
            self.clear();
            return false;
        }

        // Wait till the right time to tick: usually 20ms, in untimed tests immediately.
        self.march_deadline();

        let start_of_work = Instant::now();
        for task in &self.tasks {
            task.tick();
        }
        self.stats.store_tick(start_of_work.elapsed());

        true
    }

    #[cfg(test)]
    fn march_deadline(&mut self) {
        if self.tick_style == TickStyle::Timed {
            spin_sleep::sleep(self.deadline.saturating_duration_since(Instant::now()));
            self.deadline += self.period;
        }
    }

    #[cfg(not(test))]
    #[inline]
    fn march_deadline(&mut self) {
        spin_sleep::sleep(self.deadline.saturating_duration_since(Instant::now()));
        self.deadline += self.period;
    }

    #[inline]
    fn handle_scheduler_msgs(&mut self) -> Result<(), ()> {
        if self.tasks.is_empty() && self.rx.is_empty() && !self.is_untimed() {
            // Nothing to tick: park until there is, and restart the clock.
            let msg = self.rx.recv().map_err(|_| ())?;
            self.deadline = Instant::now();
            self.apply(msg)?;
        }

        loop {
            match self.rx.try_recv() {
                Ok(msg) => self.apply(msg)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Err(()),
            }
        }

        Ok(())
    }

    fn apply(&mut self, msg: SchedulerMessage) -> Result<(), ()> {
        match msg {
            SchedulerMessage::Add(id, task) => {
                trace!("Scheduling task {:?}.", id);
                self.tasks.push(task);
                self.ids.push(id);
                self.stats.add_task();
            },
            SchedulerMessage::Remove(id) =>
                if let Some(idx) = self.ids.iter().position(|v| *v == id) {
                    trace!("Unscheduling task {:?}.", id);
                    self.tasks.remove(idx);
                    self.ids.remove(idx);
                    self.stats.remove_tasks(1);
                },
            SchedulerMessage::Kill => {
                debug!("Scheduler asked to stop with {} live tasks.", self.tasks.len());
                return Err(());
            },
        }

        Ok(())
    }

    fn clear(&mut self) {
        self.stats.remove_tasks(self.tasks.len() as u64);
        self.tasks.clear();
        self.ids.clear();
    }

    #[cfg(test)]
    fn is_untimed(&self) -> bool {
        self.tick_style == TickStyle::Untimed
    }

    #[cfg(not(test))]
    #[inline]
    #[allow(clippy::unused_self)]
    fn is_untimed(&self) -> bool {
        false
    }

    pub(crate) fn spawn(mut self) {
        std::thread::spawn(move || {
            self.run();
        });
    }
}
