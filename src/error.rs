//! Driver and gateway error handling.

use std::{error::Error, fmt};

#[derive(Debug)]
#[non_exhaustive]
/// Error returned when a [`VoiceUpdate`] adapter is
/// unable to send messages over Discord's gateway.
///
/// [`VoiceUpdate`]: crate::shards::VoiceUpdate
pub enum JoinError {
    /// Request to join was dropped, cancelled, or replaced.
    Dropped,
    /// No available gateway connection was provided to send
    /// voice state update messages.
    NoSender,
    /// The voice connection failed.
    Driver(ConnectionError),
}

impl JoinError {
    /// Indicates whether this failure was raised by the voice connection itself,
    /// rather than the gateway adapter.
    #[must_use]
    pub fn is_driver_error(&self) -> bool {
        matches!(self, JoinError::Driver(_))
    }
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to join voice channel: ")?;
        match self {
            JoinError::Dropped => write!(f, "request was cancelled/dropped."),
            JoinError::NoSender => write!(f, "no gateway destination."),
            JoinError::Driver(t) => write!(f, "internal driver error {t}."),
        }
    }
}

impl Error for JoinError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JoinError::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectionError> for JoinError {
    fn from(e: ConnectionError) -> Self {
        JoinError::Driver(e)
    }
}

/// Convenience type for Discord gateway error handling.
pub type JoinResult<T> = Result<T, JoinError>;

pub use crate::{
    driver::connection::error::{
        Error as ConnectionError,
        ErrorCategory,
        Result as ConnectionResult,
    },
    input::{TranscodeError, TranscodeResult},
    tracks::{ErrorAction, PlayError},
};
