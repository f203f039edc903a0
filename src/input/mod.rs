//! Audio sources: on-demand transcoding of tracks into Opus frames.
//!
//! A [`Transcoder`] spawns one external process per stream, which decodes a
//! [`Playable`] source (applying the session's [`FilterChain`]) into 48kHz
//! stereo PCM. A dedicated thread encodes that PCM into 20ms Opus [`Frame`]s
//! and buffers them for the scheduler to pull, never blocking a tick.

mod child;
mod error;
pub mod filters;
mod frame;
mod transcoder;

pub use self::{
    child::ChildContainer,
    error::{TranscodeError, TranscodeResult},
    filters::{Filter, FilterChain},
    frame::Frame,
    transcoder::{Playable, StreamOptions, Transcoder},
};
