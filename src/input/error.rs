use audiopus::Error as OpusError;
use std::{error::Error, fmt, io::Error as IoError, process::ExitStatus};

/// Errors encountered while transcoding a track into Opus frames.
///
/// Each of these skips the current track, never the whole session.
#[derive(Debug)]
#[non_exhaustive]
pub enum TranscodeError {
    /// The transcoder process could not be started.
    Spawn(IoError),
    /// The Opus encoder could not be built or configured.
    Encoder(OpusError),
    /// Reading decoded audio from the transcoder failed.
    Io(IoError),
    /// The transcoder process exited unsuccessfully.
    Exited(ExitStatus),
    /// The transcoder produced no audio at all.
    NoAudio,
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to transcode track: ")?;
        match self {
            Self::Spawn(e) => write!(f, "could not start transcoder ({e})"),
            Self::Encoder(e) => write!(f, "opus encoder failure ({e})"),
            Self::Io(e) => write!(f, "i/o failure reading audio ({e})"),
            Self::Exited(status) => write!(f, "transcoder exited unsuccessfully ({status})"),
            Self::NoAudio => write!(f, "source contained no audio"),
        }
    }
}

impl Error for TranscodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(e) | Self::Io(e) => Some(e),
            Self::Encoder(e) => Some(e),
            Self::Exited(_) | Self::NoAudio => None,
        }
    }
}

impl From<OpusError> for TranscodeError {
    fn from(e: OpusError) -> Self {
        Self::Encoder(e)
    }
}

impl From<IoError> for TranscodeError {
    fn from(e: IoError) -> Self {
        Self::Io(e)
    }
}

/// Convenience type for transcoding errors.
pub type TranscodeResult<T> = Result<T, TranscodeError>;
