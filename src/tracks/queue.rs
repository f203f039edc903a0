use super::{
    AudioPlayer,
    ErrorAction,
    LoopMode,
    PlayError,
    PlayerStatus,
    TrackInfo,
    TrackResolver,
    WeakAudioPlayer,
};
use crate::{
    config::Config,
    events::{EventBus, PlayerEvent, QueueEvent},
    input::{FilterChain, StreamOptions, Transcoder},
};
use flume::Receiver;
use parking_lot::Mutex;
use rand::{seq::SliceRandom, Rng};
use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, info, instrument, warn};

/// Starts or cancels a queue's delayed teardown.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DestroyTimer {
    /// Pause playback, and destroy the queue once the grace period ends.
    Start,
    /// Call off a pending teardown and resume playback.
    Cancel,
}

/// An ordered list of tracks, fed one at a time into an [`AudioPlayer`].
///
/// The head of the list is the current track. The queue reacts to its
/// player's events: finished tracks advance according to the [`LoopMode`],
/// tracks which fail to load are skipped, and transport failures tear the
/// whole session down.
///
/// The queue only holds a weak handle to its player.
#[derive(Clone)]
pub struct TrackQueue {
    inner: Arc<QueueShared>,
}

struct QueueShared {
    core: Mutex<QueueCore>,
    player: WeakAudioPlayer,
    resolver: Arc<dyn TrackResolver>,
    events: EventBus<QueueEvent>,
    config: Config,
    handle: Handle,
}

#[derive(Default)]
struct QueueCore {
    tracks: VecDeque<TrackInfo>,
    loop_mode: LoopMode,
    random: bool,
    filters: FilterChain,
    destroy_timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
    failures: u64,
    destroyed: bool,
}

impl QueueCore {
    fn pick_random(&mut self) {
        if self.tracks.len() > 1 {
            let idx = rand::thread_rng().gen_range(0..self.tracks.len());
            if let Some(track) = self.tracks.remove(idx) {
                self.tracks.push_front(track);
            }
        }
    }
}

impl TrackQueue {
    /// Creates an empty queue which drives `player`.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    pub fn new(player: &AudioPlayer, resolver: Arc<dyn TrackResolver>, config: Config) -> Self {
        let inner = Arc::new(QueueShared {
            core: Mutex::default(),
            player: player.downgrade(),
            resolver,
            events: EventBus::default(),
            config,
            handle: Handle::current(),
        });

        let listener = inner
            .handle
            .spawn(listen(Arc::downgrade(&inner), player.subscribe()));
        inner.core.lock().listener = Some(listener);

        Self { inner }
    }

    /// Receives every event this queue raises from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// The track at the head of the queue.
    #[must_use]
    pub fn current(&self) -> Option<TrackInfo> {
        self.inner.core.lock().tracks.front().cloned()
    }

    /// Every queued track, current track first.
    #[must_use]
    pub fn tracks(&self) -> Vec<TrackInfo> {
        self.inner.core.lock().tracks.iter().cloned().collect()
    }

    /// Number of queued tracks, including the current track.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.core.lock().tracks.len()
    }

    /// Returns whether no tracks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.core.lock().tracks.is_empty()
    }

    /// Returns whether this queue has been torn down.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.core.lock().destroyed
    }

    /// Position within the current track.
    #[must_use]
    pub fn position(&self) -> Option<Duration> {
        self.inner.player.upgrade().and_then(|p| p.position())
    }

    /// Appends a track, returning its index in the queue.
    pub fn add(&self, track: TrackInfo) -> usize {
        let mut core = self.inner.core.lock();
        core.tracks.push_back(track);
        core.tracks.len() - 1
    }

    /// Removes the track at `index`.
    ///
    /// The current track (index `0`) cannot be removed: use [`skip`] instead.
    ///
    /// [`skip`]: TrackQueue::skip
    pub fn remove(&self, index: usize) -> Option<TrackInfo> {
        if index == 0 {
            return None;
        }

        self.inner.core.lock().tracks.remove(index)
    }

    /// Shuffles every track after the current one.
    pub fn shuffle(&self) {
        let mut core = self.inner.core.lock();
        if let Some(rest) = core.tracks.make_contiguous().get_mut(1..) {
            rest.shuffle(&mut rand::thread_rng());
        }
    }

    /// Current looping policy.
    #[must_use]
    pub fn loop_mode(&self) -> LoopMode {
        self.inner.core.lock().loop_mode
    }

    /// Sets the looping policy, applied the next time a track ends.
    pub fn set_loop(&self, mode: LoopMode) {
        self.inner.core.lock().loop_mode = mode;
    }

    /// Returns whether the next track is picked at random.
    #[must_use]
    pub fn is_random(&self) -> bool {
        self.inner.core.lock().random
    }

    /// Picks each next track at random, unless looping a single track.
    pub fn set_random(&self, random: bool) {
        self.inner.core.lock().random = random;
    }

    /// Filters applied to every track.
    #[must_use]
    pub fn filters(&self) -> FilterChain {
        self.inner.core.lock().filters.clone()
    }

    /// Replaces the filter chain, restarting the current track from its
    /// current position so the change is heard immediately.
    pub async fn set_filters(&self, filters: FilterChain) {
        self.inner.core.lock().filters = filters;

        if let Some(position) = self.position() {
            self.play(position).await;
        }
    }

    /// Restarts the current track at `position`.
    pub async fn seek(&self, position: Duration) -> bool {
        self.play(position).await
    }

    /// Moves past the current track and plays the next.
    ///
    /// With [`LoopMode::Queue`] the skipped track moves to the back of the queue.
    #[instrument(skip(self))]
    pub async fn skip(&self) -> bool {
        {
            let mut core = self.inner.core.lock();
            if core.destroyed || core.tracks.is_empty() {
                return false;
            }

            let mode = core.loop_mode;
            mode.skip(&mut core.tracks);
            if core.random {
                core.pick_random();
            }
        }

        self.play(Duration::ZERO).await;
        true
    }

    /// Starts the current track `seek` into its audio.
    ///
    /// An empty queue stops its player and raises [`QueueEvent::Destroy`].
    /// Returns whether a stream was handed to the player.
    #[instrument(skip(self))]
    pub async fn play(&self, seek: Duration) -> bool {
        let Some(player) = self.inner.player.upgrade() else {
            return false;
        };

        let head = {
            let core = self.inner.core.lock();
            if core.destroyed {
                return false;
            }

            core.tracks
                .front()
                .cloned()
                .map(|track| (track, core.filters.clone()))
        };

        let Some((track, filters)) = head else {
            debug!("Queue is empty.");
            player.halt();
            self.inner.events.emit(QueueEvent::Destroy);
            return false;
        };

        let resolved = match self.inner.resolver.resolve(&track).await {
            Ok(resolved) => resolved,
            Err(e) => {
                player.report(PlayError::Resolve(e));
                return false;
            },
        };

        {
            let mut core = self.inner.core.lock();
            let destroyed = core.destroyed;
            match core.tracks.front_mut() {
                Some(head) if head.id == track.id && !destroyed => {
                    if head.duration.is_none() {
                        head.duration = resolved.duration;
                    }
                },
                _ => {
                    debug!("Head of queue changed while resolving {:?}.", track.title);
                    return false;
                },
            }
        }

        let opts = StreamOptions::from_config(&self.inner.config)
            .seek(seek)
            .filters(filters);
        match Transcoder::spawn(&resolved.source, &opts) {
            Ok(stream) => {
                info!("Playing {:?} from {}.", track.title, resolved.source);
                player.read(stream);
                true
            },
            Err(e) => {
                player.report(e.into());
                false
            },
        }
    }

    /// Arms or cancels the queue's teardown timer.
    ///
    /// Starting the timer pauses playback and raises [`QueueEvent::Start`];
    /// if it is not cancelled within [`Config::destroy_grace`], the queue is
    /// destroyed. Cancelling resumes playback and raises [`QueueEvent::Cancel`].
    #[instrument(skip(self))]
    pub fn time_destroying(&self, action: DestroyTimer) {
        let mut core = self.inner.core.lock();
        if core.destroyed {
            return;
        }

        let player = self.inner.player.upgrade();
        match action {
            DestroyTimer::Start => {
                if core.destroy_timer.is_some() {
                    return;
                }

                if let Some(player) = player {
                    player.pause();
                }

                let queue = Arc::downgrade(&self.inner);
                let grace = self.inner.config.destroy_grace;
                core.destroy_timer = Some(self.inner.handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    if let Some(inner) = queue.upgrade() {
                        info!("Destroy timer elapsed.");
                        TrackQueue { inner }.destroy();
                    }
                }));
                self.inner.events.emit(QueueEvent::Start);
            },
            DestroyTimer::Cancel => {
                let Some(timer) = core.destroy_timer.take() else {
                    return;
                };

                timer.abort();
                if let Some(player) = player {
                    player.resume();
                }
                self.inner.events.emit(QueueEvent::Cancel);
            },
        }
    }

    /// Tears the session down: clears the queue, destroys the player, and
    /// destroys the player's voice connection.
    ///
    /// Raises [`QueueEvent::Destroy`], then disconnects every subscriber.
    #[instrument(skip(self))]
    pub fn destroy(&self) {
        let (timer, listener) = {
            let mut core = self.inner.core.lock();
            if core.destroyed {
                return;
            }

            core.destroyed = true;
            core.tracks.clear();
            (core.destroy_timer.take(), core.listener.take())
        };

        if let Some(timer) = timer {
            timer.abort();
        }

        if let Some(player) = self.inner.player.upgrade() {
            if let Some(voice) = player.detach_voice() {
                self.inner.handle.spawn(async move {
                    if let Err(e) = voice.destroy().await {
                        warn!("Failed to leave voice channel: {}.", e);
                    }
                });
            }
            player.destroy();
        }

        self.inner.events.emit(QueueEvent::Destroy);
        self.inner.events.clear();

        if let Some(listener) = listener {
            listener.abort();
        }
    }

    async fn advance(&self) {
        {
            let mut core = self.inner.core.lock();
            if core.destroyed {
                return;
            }

            let mode = core.loop_mode;
            mode.advance(&mut core.tracks);
            if core.random && mode != LoopMode::Track {
                core.pick_random();
            }
        }

        self.play(Duration::ZERO).await;
    }

    /// Drops the failed head track after a delay, unless the player has
    /// since moved on or failed again.
    fn skip_failed(&self) {
        let failure = {
            let mut core = self.inner.core.lock();
            core.failures += 1;
            core.failures
        };

        let queue = self.clone();
        self.inner.handle.spawn(async move {
            tokio::time::sleep(queue.inner.config.skip_delay).await;

            let still_failed = queue
                .inner
                .player
                .upgrade()
                .map_or(false, |p| p.status() == PlayerStatus::Errored);
            {
                let mut core = queue.inner.core.lock();
                if core.destroyed || core.failures != failure || !still_failed {
                    return;
                }
                core.tracks.pop_front();
            }

            queue.play(Duration::ZERO).await;
        });
    }

    async fn on_player_event(&self, event: PlayerEvent) {
        match event {
            PlayerEvent::Wait => self.advance().await,
            PlayerEvent::Error(e) => match e.action() {
                ErrorAction::Skip => self.skip_failed(),
                ErrorAction::Crash => {
                    warn!("Ending session: {}.", e);
                    self.destroy();
                },
            },
            _ => {},
        }
    }
}

async fn listen(queue: Weak<QueueShared>, events: Receiver<PlayerEvent>) {
    while let Ok(event) = events.recv_async().await {
        let Some(inner) = queue.upgrade() else {
            break;
        };
        TrackQueue { inner }.on_player_event(event).await;
    }
}

impl fmt::Debug for TrackQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("TrackQueue")
            .field("tracks", &core.tracks)
            .field("loop_mode", &core.loop_mode)
            .field("random", &core.random)
            .field("filters", &core.filters)
            .field("destroyed", &core.destroyed)
            .finish()
    }
}
