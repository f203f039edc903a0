use crate::constants::SILENT_FRAME;

/// One 20ms unit of Opus-encoded audio.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Frame {
    /// Encoded Opus payload.
    pub opus: Vec<u8>,
    /// Marks silence sent around a track's audio rather than audio from the track.
    ///
    /// Padding frames never count towards a stream's position.
    pub padding: bool,
}

impl Frame {
    /// Wraps an encoded Opus payload.
    #[must_use]
    pub fn new(opus: Vec<u8>) -> Self {
        Self {
            opus,
            padding: false,
        }
    }

    /// A silent padding frame.
    #[must_use]
    pub fn silence() -> Self {
        Self {
            opus: SILENT_FRAME.to_vec(),
            padding: true,
        }
    }
}
