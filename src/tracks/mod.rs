//! Playback of queued tracks into a voice connection.
//!
//! An [`AudioPlayer`] owns at most one [`Transcoder`] stream at a time, and
//! sends one of its frames per [`Scheduler`] tick into an attached
//! [`VoiceConnection`]. A [`TrackQueue`] sits above the player: it resolves
//! each [`TrackInfo`] through a user-supplied [`TrackResolver`], starts the
//! stream, and reacts to the player's events to advance, loop, skip, or tear
//! the session down.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use warbler::{
//!     tracks::{AudioPlayer, TrackInfo, TrackQueue, TrackResolver},
//!     Config,
//! };
//!
//! # async fn run(resolver: Arc<dyn TrackResolver>) {
//! let config = Config::default();
//! let player = AudioPlayer::new(config.clone());
//! let queue = TrackQueue::new(&player, resolver, config);
//!
//! queue.add(TrackInfo::new("Lullaby", "https://example.com/lullaby.ogg"));
//! queue.play(Default::default()).await;
//! # }
//! ```
//!
//! [`Transcoder`]: crate::input::Transcoder
//! [`Scheduler`]: crate::driver::Scheduler
//! [`VoiceConnection`]: crate::driver::VoiceConnection

mod error;
mod looping;
mod mode;
mod player;
mod queue;
mod track;

pub use self::{
    error::*,
    looping::LoopMode,
    mode::PlayerStatus,
    player::{AudioPlayer, WeakAudioPlayer},
    queue::{DestroyTimer, TrackQueue},
    track::{Resolved, TrackInfo, TrackResolver},
};
