//! Typed lifecycle events exposed to message/UI layers.
//!
//! Every event source owns an [`EventBus`]: call `subscribe` on the source to
//! receive a [`flume::Receiver`] of its events, usable from both sync
//! (`recv`) and async (`recv_async`) code.

mod bus;

pub use self::bus::EventBus;

use crate::{
    driver::{NetworkingEvent, VoiceConnectionStatus},
    tracks::PlayError,
};
use std::sync::Arc;

/// Lifecycle events raised by an [`AudioPlayer`].
///
/// [`AudioPlayer`]: crate::tracks::AudioPlayer
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PlayerEvent {
    /// A stream became readable and playback began (or resumed).
    Playing,
    /// The player went idle, either by request or because a track ended.
    Wait,
    /// Playback was paused, by request or for lack of a voice connection.
    Pause,
    /// Playback failed. [`PlayError::action`] tells listeners whether to skip
    /// the track or abandon the session.
    Error(Arc<PlayError>),
}

/// Lifecycle events raised by a [`TrackQueue`].
///
/// [`TrackQueue`]: crate::tracks::TrackQueue
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum QueueEvent {
    /// The queue ran out of tracks, was stopped, or timed out: the session should be torn down.
    Destroy,
    /// The destroy timer was armed.
    Start,
    /// The destroy timer was cancelled.
    Cancel,
}

/// Lifecycle events raised by a [`VoiceConnection`].
///
/// [`VoiceConnection`]: crate::driver::VoiceConnection
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum VoiceEvent {
    /// The connection changed state.
    StateChange {
        /// Previous state.
        from: VoiceConnectionStatus,
        /// New state.
        to: VoiceConnectionStatus,
    },
    /// An event raised by the connection's network layer.
    Networking(NetworkingEvent),
}
