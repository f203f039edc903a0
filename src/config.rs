use crate::{
    constants::{DEFAULT_BITRATE, REJOIN_ATTEMPTS},
    driver::{Scheduler, DEFAULT_SCHEDULER},
};
use audiopus::Bitrate;
use derivative::Derivative;
use std::{ffi::OsString, time::Duration};

/// Configuration for players and queues.
#[derive(Clone, Derivative)]
#[derivative(Debug)]
#[non_exhaustive]
pub struct Config {
    /// How long a new stream may take to produce its first frame before the
    /// track is skipped.
    ///
    /// Defaults to 25 seconds.
    pub load_timeout: Duration,

    /// Number of times a player will ask its voice connection to rejoin after
    /// failing to send audio, before giving up on the session.
    ///
    /// Defaults to `2`.
    pub rejoin_attempts: u32,

    /// How long a player holds playback after asking its voice connection to
    /// rejoin, waiting for the connection to report it is ready again.
    ///
    /// Defaults to 10 seconds.
    pub rejoin_timeout: Duration,

    /// Delay between a track failing to play and the queue moving on to the next track.
    ///
    /// Defaults to 1 second.
    pub skip_delay: Duration,

    /// How long a queue waits, once its destroy timer is started, before tearing
    /// the session down.
    ///
    /// Defaults to 30 seconds.
    pub destroy_grace: Duration,

    /// Length of the fade-in applied to tracks started from their beginning.
    ///
    /// Defaults to 1.5 seconds.
    pub fade_in: Duration,

    /// Opus encoder bitrate.
    ///
    /// Defaults to 128kbps.
    pub bitrate: Bitrate,

    /// Number of encoded frames each stream may buffer ahead of playback.
    ///
    /// Defaults to `50` (one second of audio).
    pub frame_buffer_len: usize,

    /// Path to (or name of) the `ffmpeg`-compatible transcoder executable.
    ///
    /// Defaults to `"ffmpeg"`.
    pub transcoder_path: OsString,

    #[derivative(Debug = "ignore")]
    /// Scheduler which drives playback.
    ///
    /// Defaults to [`DEFAULT_SCHEDULER`].
    pub scheduler: Option<Scheduler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(25),
            rejoin_attempts: REJOIN_ATTEMPTS,
            rejoin_timeout: Duration::from_secs(10),
            skip_delay: Duration::from_secs(1),
            destroy_grace: Duration::from_secs(30),
            fade_in: Duration::from_millis(1500),
            bitrate: DEFAULT_BITRATE,
            frame_buffer_len: 50,
            transcoder_path: "ffmpeg".into(),
            scheduler: None,
        }
    }
}

impl Config {
    /// Sets this `Config`'s stream load timeout.
    #[must_use]
    pub fn load_timeout(mut self, load_timeout: Duration) -> Self {
        self.load_timeout = load_timeout;
        self
    }

    /// Sets this `Config`'s bound on rejoin attempts.
    #[must_use]
    pub fn rejoin_attempts(mut self, rejoin_attempts: u32) -> Self {
        self.rejoin_attempts = rejoin_attempts;
        self
    }

    /// Sets how long a player waits on each rejoin.
    #[must_use]
    pub fn rejoin_timeout(mut self, rejoin_timeout: Duration) -> Self {
        self.rejoin_timeout = rejoin_timeout;
        self
    }

    /// Sets this `Config`'s delay before skipping a failed track.
    #[must_use]
    pub fn skip_delay(mut self, skip_delay: Duration) -> Self {
        self.skip_delay = skip_delay;
        self
    }

    /// Sets this `Config`'s destroy timer grace period.
    #[must_use]
    pub fn destroy_grace(mut self, destroy_grace: Duration) -> Self {
        self.destroy_grace = destroy_grace;
        self
    }

    /// Sets this `Config`'s fade-in length.
    #[must_use]
    pub fn fade_in(mut self, fade_in: Duration) -> Self {
        self.fade_in = fade_in;
        self
    }

    /// Sets this `Config`'s Opus encoder bitrate.
    #[must_use]
    pub fn bitrate(mut self, bitrate: Bitrate) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// Sets this `Config`'s per-stream frame buffer length.
    #[must_use]
    pub fn frame_buffer_len(mut self, frame_buffer_len: usize) -> Self {
        self.frame_buffer_len = frame_buffer_len;
        self
    }

    /// Sets this `Config`'s transcoder executable.
    #[must_use]
    pub fn transcoder_path(mut self, transcoder_path: impl Into<OsString>) -> Self {
        self.transcoder_path = transcoder_path.into();
        self
    }

    /// Sets this `Config`'s scheduler.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Returns this `Config`'s scheduler, or the shared default.
    #[must_use]
    pub fn get_scheduler(&self) -> Scheduler {
        self.scheduler
            .as_ref()
            .unwrap_or(&*DEFAULT_SCHEDULER)
            .clone()
    }
}
