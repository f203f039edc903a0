#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
//! Warbler is an async audio streaming system for Discord voice channels, written in Rust.
//! The library offers:
//!  * A from-scratch voice connection: a WebSocket signalling channel, a UDP media
//!  channel with IP discovery and keepalives, and XSalsa20Poly1305 packet sealing in
//!  all three of Discord's tagging modes, with resume handling on recoverable loss.
//!  * An on-demand transcoding pipeline which spawns one external decoder process per
//!  track, applies an audio filter graph, and encodes 20ms Opus frames.
//!  * Per-session [`AudioPlayer`]s, all driven by a single shared [`Scheduler`] which
//!  emits exactly one frame per player every 20ms.
//!  * A [`TrackQueue`] which decides which track plays next, supports looping, shuffling
//!  and filter changes, and tears itself down once left alone.
//!
//! ## Gateway integration
//! Warbler does not own a connection to Discord's main gateway. Your library must
//! implement [`VoiceUpdate`] to send voice state updates, and must forward the
//! voice server/state packets it receives to [`VoiceConnection::update_server`] and
//! [`VoiceConnection::update_state`].
//!
//! [`AudioPlayer`]: crate::tracks::AudioPlayer
//! [`Scheduler`]: crate::driver::Scheduler
//! [`TrackQueue`]: crate::tracks::TrackQueue
//! [`VoiceUpdate`]: crate::shards::VoiceUpdate
//! [`VoiceConnection::update_server`]: crate::driver::VoiceConnection::update_server
//! [`VoiceConnection::update_state`]: crate::driver::VoiceConnection::update_state

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
)]

mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
pub mod id;
pub(crate) mod info;
pub mod input;
pub mod shards;
pub mod tracks;
mod ws;

pub use discortp as packet;
pub use serenity_voice_model as model;

pub use crate::{
    driver::{Scheduler, VoiceConnection},
    events::{PlayerEvent, QueueEvent, VoiceEvent},
    tracks::{AudioPlayer, TrackQueue},
};

pub use config::Config;
pub use info::ConnectionInfo;
