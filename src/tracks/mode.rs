use crate::input::Transcoder;

/// Playback status of an [`AudioPlayer`].
///
/// [`AudioPlayer`]: super::AudioPlayer
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum PlayerStatus {
    /// Idle, with no stream.
    #[default]
    Wait,
    /// A stream was given, but has not yet produced audio.
    Loading,
    /// Sending one frame per scheduler tick.
    Playing,
    /// Holding a stream without reading it.
    Pause,
    /// The last stream failed. Idle, with no stream.
    Errored,
}

/// Internal state of a player. Each stream is owned by exactly one state.
#[derive(Debug, Default)]
pub(crate) enum PlayerState {
    #[default]
    Wait,
    Loading {
        stream: Transcoder,
        load_id: u64,
    },
    Playing {
        stream: Transcoder,
        /// Silence frames left to send once the stream runs dry.
        padding: Option<u8>,
    },
    Pause {
        stream: Transcoder,
    },
    Errored,
}

impl PlayerState {
    pub(crate) fn status(&self) -> PlayerStatus {
        match self {
            Self::Wait => PlayerStatus::Wait,
            Self::Loading { .. } => PlayerStatus::Loading,
            Self::Playing { .. } => PlayerStatus::Playing,
            Self::Pause { .. } => PlayerStatus::Pause,
            Self::Errored => PlayerStatus::Errored,
        }
    }

    pub(crate) fn stream(&self) -> Option<&Transcoder> {
        match self {
            Self::Loading { stream, .. } | Self::Playing { stream, .. } | Self::Pause { stream } =>
                Some(stream),
            Self::Wait | Self::Errored => None,
        }
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut Transcoder> {
        match self {
            Self::Loading { stream, .. } | Self::Playing { stream, .. } | Self::Pause { stream } =>
                Some(stream),
            Self::Wait | Self::Errored => None,
        }
    }

    pub(crate) fn into_stream(self) -> Option<Transcoder> {
        match self {
            Self::Loading { stream, .. } | Self::Playing { stream, .. } | Self::Pause { stream } =>
                Some(stream),
            Self::Wait | Self::Errored => None,
        }
    }
}
