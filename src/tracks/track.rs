use crate::input::Playable;
use async_trait::async_trait;
use std::{error::Error, time::Duration};
use uuid::Uuid;

/// A queued track, as known before it is resolved into a playable source.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct TrackInfo {
    /// Unique identifier of this queue entry.
    pub id: Uuid,
    /// Human-readable title.
    pub title: String,
    /// Query, URL, or path which a [`TrackResolver`] understands.
    pub source: String,
    /// Track length, if known.
    pub duration: Option<Duration>,
}

impl TrackInfo {
    /// Creates a queue entry with a fresh identifier.
    #[must_use]
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            source: source.into(),
            duration: None,
        }
    }

    /// Sets this track's length.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// A track's resolved, playable source.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Resolved {
    /// Where to read the track's audio from.
    pub source: Playable,
    /// Track length, if the resolver learned it.
    pub duration: Option<Duration>,
}

/// Service which turns a [`TrackInfo`] into something the transcoder can open.
///
/// Looking tracks up on external platforms is left to implementors.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolves `track` into a playable source.
    async fn resolve(&self, track: &TrackInfo) -> Result<Resolved, Box<dyn Error + Send + Sync>>;
}
