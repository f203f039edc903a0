use std::time::Duration;

use crate::constants::TIMESTEP_LENGTH;

/// Configuration for how a [`Scheduler`] ticks its tasks.
///
/// [`Scheduler`]: super::Scheduler
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
    /// Time between two ticks.
    ///
    /// Defaults to 20ms, the length of one audio frame.
    pub period: Duration,
    #[cfg(test)]
    pub(crate) tick_style: TickStyle,
}

impl Config {
    /// Sets this `Config`'s tick period.
    #[must_use]
    pub fn period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            period: TIMESTEP_LENGTH,
            #[cfg(test)]
            tick_style: TickStyle::Timed,
        }
    }
}

/// How a scheduler waits between ticks in tests.
#[cfg(test)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum TickStyle {
    /// Sleep until the next deadline.
    Timed,
    /// Run each tick as soon as `run_once` is called.
    Untimed,
}
