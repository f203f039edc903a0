use crate::{error::ConnectionError, input::TranscodeError};
use std::{
    error::Error,
    fmt::{Display, Formatter, Result as FmtResult},
};

/// What a queue should do about a failed track.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorAction {
    /// Drop the failed track and move on to the next.
    Skip,
    /// Abandon the whole session.
    Crash,
}

/// Errors raised while loading or playing a track.
#[derive(Debug)]
#[non_exhaustive]
pub enum PlayError {
    /// The stream produced no audio within the load timeout.
    Timeout,
    /// The transcoder failed to start or to produce audio.
    Transcode(TranscodeError),
    /// Audio could not be sent, even after rejoining the voice channel.
    Transport(ConnectionError),
    /// The track could not be resolved into a playable source.
    Resolve(Box<dyn Error + Send + Sync>),
}

impl PlayError {
    /// Whether this failure should skip the track or end the session.
    #[must_use]
    pub fn action(&self) -> ErrorAction {
        match self {
            Self::Timeout | Self::Transcode(_) | Self::Resolve(_) => ErrorAction::Skip,
            Self::Transport(_) => ErrorAction::Crash,
        }
    }
}

impl Display for PlayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str("failed to play track: ")?;
        match self {
            Self::Timeout => f.write_str("stream produced no audio in time"),
            Self::Transcode(e) => write!(f, "{e}"),
            Self::Transport(e) => write!(f, "{e}"),
            Self::Resolve(e) => write!(f, "could not resolve source ({e})"),
        }
    }
}

impl Error for PlayError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Timeout => None,
            Self::Transcode(e) => Some(e),
            Self::Transport(e) => Some(e),
            Self::Resolve(e) => Some(e.as_ref()),
        }
    }
}

impl From<TranscodeError> for PlayError {
    fn from(e: TranscodeError) -> Self {
        Self::Transcode(e)
    }
}
