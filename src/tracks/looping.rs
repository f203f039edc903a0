use std::collections::VecDeque;

/// What a queue does with its head track once that track ends.
#[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
pub enum LoopMode {
    /// The track is dropped.
    #[default]
    Off,
    /// The same track plays again, indefinitely.
    Track,
    /// The track moves to the back of the queue.
    Queue,
}

impl LoopMode {
    /// Applies this policy to a queue whose head track just ended.
    pub fn advance<T>(self, tracks: &mut VecDeque<T>) {
        match self {
            Self::Off => {
                tracks.pop_front();
            },
            Self::Track => {},
            Self::Queue =>
                if let Some(head) = tracks.pop_front() {
                    tracks.push_back(head);
                },
        }
    }

    /// Applies this policy to a queue whose head track was skipped.
    ///
    /// Skipping always moves past the head, even when looping one track.
    pub fn skip<T>(self, tracks: &mut VecDeque<T>) {
        match self {
            Self::Off | Self::Track => Self::Off.advance(tracks),
            Self::Queue => Self::Queue.advance(tracks),
        }
    }
}
