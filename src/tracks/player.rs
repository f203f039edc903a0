use super::{mode::PlayerState, ErrorAction, PlayError, PlayerStatus};
use crate::{
    config::Config,
    constants::SILENCE_PADDING_FRAMES,
    driver::{ScheduledTask, Scheduler, TaskId, VoiceConnection, VoiceConnectionStatus},
    events::{EventBus, PlayerEvent, VoiceEvent},
    input::{Frame, TranscodeError, Transcoder},
};
use flume::Receiver;
use parking_lot::Mutex;
use std::{
    fmt,
    mem,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::runtime::Handle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Plays one stream at a time into an attached [`VoiceConnection`].
///
/// While playing, the player is registered with its [`Scheduler`], and sends
/// one frame per tick. Once a stream ends the player pads the output with a
/// few silent frames, then returns to [`PlayerStatus::Wait`].
///
/// If a frame cannot be sent, the player asks its connection to rejoin and
/// holds its stream until the connection is ready again. After
/// [`Config::rejoin_attempts`] such rejoins without a successful send, the
/// player fails with [`PlayError::Transport`].
///
/// Cloning an `AudioPlayer` produces another handle to the same player.
#[derive(Clone)]
pub struct AudioPlayer {
    inner: Arc<PlayerShared>,
}

/// A handle to an [`AudioPlayer`] which does not keep it alive.
#[derive(Clone, Debug)]
pub struct WeakAudioPlayer {
    inner: Weak<PlayerShared>,
}

impl WeakAudioPlayer {
    /// Returns the player, if any strong handle to it remains.
    #[must_use]
    pub fn upgrade(&self) -> Option<AudioPlayer> {
        self.inner.upgrade().map(|inner| AudioPlayer { inner })
    }
}

struct PlayerShared {
    this: Weak<PlayerShared>,
    core: Mutex<PlayerCore>,
    events: EventBus<PlayerEvent>,
    config: Config,
    scheduler: Scheduler,
    handle: Handle,
}

#[derive(Default)]
struct PlayerCore {
    state: PlayerState,
    voice: Option<VoiceConnection>,
    task: Option<TaskId>,
    next_load: u64,
    rejoins: u32,
    rejoin_cycle: u64,
    rejoining: bool,
}

enum Effect {
    Emit(PlayerEvent),
    Rejoin(VoiceConnection, u64),
}

impl AudioPlayer {
    /// Creates an idle player.
    ///
    /// # Panics
    /// Panics if called outside of a Tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let scheduler = config.get_scheduler();

        Self {
            inner: Arc::new_cyclic(|this| PlayerShared {
                this: this.clone(),
                core: Mutex::default(),
                events: EventBus::default(),
                config,
                scheduler,
                handle: Handle::current(),
            }),
        }
    }

    /// Current playback status.
    #[must_use]
    pub fn status(&self) -> PlayerStatus {
        self.inner.core.lock().state.status()
    }

    /// Position within the current stream, if there is one.
    #[must_use]
    pub fn position(&self) -> Option<Duration> {
        self.inner
            .core
            .lock()
            .state
            .stream()
            .map(Transcoder::position)
    }

    /// Receives every event this player raises from now on.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    /// Creates a handle which does not keep this player alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakAudioPlayer {
        WeakAudioPlayer {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Routes audio into `voice`, returning the previously attached connection.
    pub fn attach_voice(&self, voice: VoiceConnection) -> Option<VoiceConnection> {
        let mut core = self.inner.core.lock();
        core.forget_rejoins();
        core.voice.replace(voice)
    }

    /// Stops routing audio into any connection. A playing player will pause on its next tick.
    pub fn detach_voice(&self) -> Option<VoiceConnection> {
        let mut core = self.inner.core.lock();
        core.forget_rejoins();
        core.voice.take()
    }

    /// The connection audio is currently routed into.
    #[must_use]
    pub fn voice(&self) -> Option<VoiceConnection> {
        self.inner.core.lock().voice.clone()
    }

    /// Starts playing `stream`, replacing (and closing) any current stream.
    ///
    /// If `stream` has not produced audio yet, the player waits in
    /// [`PlayerStatus::Loading`] until it does. A stream which stays silent
    /// past [`Config::load_timeout`] fails with [`PlayError::Timeout`].
    #[instrument(skip(self))]
    pub fn read(&self, stream: Transcoder) {
        let pending = self.update(move |core, fx| {
            if stream.readable() {
                core.transition(fx, |_| PlayerState::Playing {
                    stream,
                    padding: None,
                });
                None
            } else {
                core.next_load += 1;
                let load_id = core.next_load;
                let ready = stream.ready_signal();
                core.transition(fx, |_| PlayerState::Loading { stream, load_id });
                Some((load_id, ready))
            }
        });

        if let Some((load_id, ready)) = pending {
            self.watch_load(load_id, ready);
        }
    }

    /// Pauses playback. Only valid while playing.
    #[instrument(skip(self))]
    pub fn pause(&self) -> bool {
        self.update(|core, fx| {
            if core.state.status() != PlayerStatus::Playing {
                return false;
            }

            core.transition(fx, |state| match state {
                PlayerState::Playing { stream, .. } => PlayerState::Pause { stream },
                other => other,
            });
            true
        })
    }

    /// Resumes playback. Only valid while paused.
    #[instrument(skip(self))]
    pub fn resume(&self) -> bool {
        self.update(|core, fx| {
            if core.state.status() != PlayerStatus::Pause {
                return false;
            }

            core.transition(fx, |state| match state {
                PlayerState::Pause { stream } => PlayerState::Playing {
                    stream,
                    padding: None,
                },
                other => other,
            });
            true
        })
    }

    /// Closes the current stream and goes idle, raising [`PlayerEvent::Wait`].
    ///
    /// Does nothing unless a stream is loading, playing, or paused.
    #[instrument(skip(self))]
    pub fn stop(&self) -> bool {
        self.update(|core, fx| {
            if core.state.stream().is_none() {
                return false;
            }

            core.transition(fx, |_| PlayerState::Wait);
            true
        })
    }

    /// Disconnects every subscriber and closes the current stream.
    #[instrument(skip(self))]
    pub fn destroy(&self) {
        self.inner.events.clear();
        self.halt();
        self.inner.core.lock().voice = None;
    }

    /// Goes idle without raising any event.
    pub(crate) fn halt(&self) {
        self.update(|core, _| core.state = PlayerState::Wait);
    }

    /// Fails the current track with an error raised outside the player.
    pub(crate) fn report(&self, error: PlayError) {
        self.update(|core, fx| core.fail(fx, error));
    }

    fn watch_load(&self, load_id: u64, ready: Receiver<Result<(), TranscodeError>>) {
        let player = self.downgrade();
        let limit = self.inner.config.load_timeout;

        self.inner.handle.spawn(async move {
            let outcome = match tokio::time::timeout(limit, ready.recv_async()).await {
                Ok(Ok(Ok(()))) => Ok(()),
                Ok(Ok(Err(e))) => Err(PlayError::Transcode(e)),
                Ok(Err(_)) => Err(PlayError::Transcode(TranscodeError::NoAudio)),
                Err(_) => Err(PlayError::Timeout),
            };

            if let Some(player) = player.upgrade() {
                player.finish_load(load_id, outcome);
            }
        });
    }

    fn finish_load(&self, load_id: u64, outcome: Result<(), PlayError>) {
        self.update(|core, fx| {
            if !matches!(core.state, PlayerState::Loading { load_id: id, .. } if id == load_id) {
                trace!("Load {} finished after its stream was replaced.", load_id);
                return;
            }

            match outcome {
                Ok(()) => core.transition(fx, |state| match state.into_stream() {
                    Some(stream) if stream.readable() => PlayerState::Playing {
                        stream,
                        padding: None,
                    },
                    _ => PlayerState::Wait,
                }),
                Err(PlayError::Transcode(e)) => {
                    let e = match core.state.stream_mut() {
                        Some(stream) => stream.explain(e),
                        None => e,
                    };
                    core.fail(fx, PlayError::Transcode(e));
                },
                Err(e) => core.fail(fx, e),
            }
        });
    }

    fn update<R>(&self, f: impl FnOnce(&mut PlayerCore, &mut Vec<Effect>) -> R) -> R {
        let mut fx = vec![];
        let out = {
            let mut core = self.inner.core.lock();
            let out = f(&mut core, &mut fx);
            self.inner.sync_schedule(&mut core, Some(&self.inner));
            out
        };
        self.inner.apply(fx);
        out
    }
}

impl PlayerShared {
    /// Keeps scheduler membership in step with the player's state: a player
    /// is ticked if and only if it is playing.
    fn sync_schedule(&self, core: &mut PlayerCore, this: Option<&Arc<Self>>) {
        let playing = core.state.status() == PlayerStatus::Playing;
        match (playing, core.task) {
            (true, None) =>
                if let Some(this) = this {
                    core.task = Some(self.scheduler.add(this.clone()));
                },
            (false, Some(id)) => {
                self.scheduler.remove(id);
                core.task = None;
                if let Some(voice) = &core.voice {
                    voice.set_speaking(false);
                }
            },
            _ => {},
        }
    }

    fn apply(&self, fx: Vec<Effect>) {
        for effect in fx {
            match effect {
                Effect::Emit(event) => self.events.emit(event),
                Effect::Rejoin(voice, cycle) => {
                    let player = self.this.clone();
                    let limit = self.config.rejoin_timeout;
                    self.handle.spawn(async move {
                        let ready = rejoin(&voice, limit).await;
                        if let Some(player) = player.upgrade() {
                            player.finish_rejoin(cycle, ready);
                        }
                    });
                },
            }
        }
    }

    fn finish_rejoin(&self, cycle: u64, ready: bool) {
        let mut core = self.core.lock();
        if core.rejoining && core.rejoin_cycle == cycle {
            if ready {
                info!("Voice connection ready again, resuming playback.");
            } else {
                debug!("Rejoin {} did not complete, resuming playback.", cycle);
            }
            core.rejoining = false;
        }
    }
}

/// Asks `voice` to rejoin, then waits for it to report that it is ready.
async fn rejoin(voice: &VoiceConnection, limit: Duration) -> bool {
    let events = voice.subscribe();
    if let Err(e) = voice.rejoin(None).await {
        warn!("Rejoin after failed send did not go out: {}.", e);
        return false;
    }

    let ready = async {
        while let Ok(event) = events.recv_async().await {
            match event {
                VoiceEvent::StateChange {
                    to: VoiceConnectionStatus::Ready,
                    ..
                } => return true,
                VoiceEvent::StateChange {
                    to: VoiceConnectionStatus::Disconnected(_) | VoiceConnectionStatus::Destroyed,
                    ..
                } => return false,
                _ => {},
            }
        }
        false
    };

    tokio::time::timeout(limit, ready).await.unwrap_or(false)
}

impl ScheduledTask for PlayerShared {
    fn tick(&self) {
        let mut fx = vec![];
        {
            let mut core = self.core.lock();
            core.tick(&self.config, &mut fx);
            self.sync_schedule(&mut core, None);
        }
        self.apply(fx);
    }
}

impl PlayerCore {
    /// Replaces the current state, raising the event matching the new status
    /// when it changed. A stream not carried into the new state is closed.
    fn transition(&mut self, fx: &mut Vec<Effect>, f: impl FnOnce(PlayerState) -> PlayerState) {
        let from = self.state.status();
        self.state = f(mem::take(&mut self.state));
        let to = self.state.status();

        if from == to {
            return;
        }

        debug!("Player {:?} -> {:?}.", from, to);
        let event = match to {
            PlayerStatus::Wait => PlayerEvent::Wait,
            PlayerStatus::Playing => PlayerEvent::Playing,
            PlayerStatus::Pause => PlayerEvent::Pause,
            PlayerStatus::Loading | PlayerStatus::Errored => return,
        };
        fx.push(Effect::Emit(event));
    }

    /// Abandons any rejoin in flight, and resets the rejoin budget.
    fn forget_rejoins(&mut self) {
        self.rejoins = 0;
        self.rejoining = false;
        self.rejoin_cycle += 1;
    }

    fn fail(&mut self, fx: &mut Vec<Effect>, error: PlayError) {
        match error.action() {
            ErrorAction::Skip => warn!("{}.", error),
            ErrorAction::Crash => error!("{}.", error),
        }
        self.transition(fx, |_| PlayerState::Errored);
        fx.push(Effect::Emit(PlayerEvent::Error(Arc::new(error))));
    }

    fn tick(&mut self, config: &Config, fx: &mut Vec<Effect>) {
        if self.state.status() != PlayerStatus::Playing {
            return;
        }

        let Some(voice) = self.voice.clone() else {
            debug!("No voice connection attached: pausing.");
            self.transition(fx, |state| match state {
                PlayerState::Playing { stream, .. } => PlayerState::Pause { stream },
                other => other,
            });
            return;
        };

        if self.rejoining {
            trace!("Holding playback until the connection rejoins.");
            return;
        }

        let next = match &mut self.state {
            PlayerState::Playing { stream, padding } => match padding {
                Some(0) => Ok(None),
                Some(left) => {
                    *left -= 1;
                    Ok(Some(Frame::silence()))
                },
                None => match stream.read() {
                    Some(frame) => Ok(Some(frame)),
                    // Starved: the transcoder has fallen behind.
                    None if stream.readable() => return,
                    None => match stream.take_error() {
                        Some(e) => Err(e),
                        None => {
                            *padding = Some(SILENCE_PADDING_FRAMES - 1);
                            Ok(Some(Frame::silence()))
                        },
                    },
                },
            },
            _ => return,
        };

        let frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("Stream finished.");
                self.transition(fx, |_| PlayerState::Wait);
                return;
            },
            Err(e) => {
                self.fail(fx, PlayError::Transcode(e));
                return;
            },
        };

        match voice.send_frame(&frame) {
            Ok(_) => self.rejoins = 0,
            Err(e) if e.should_rejoin() && self.rejoins < config.rejoin_attempts => {
                self.rejoins += 1;
                self.rejoin_cycle += 1;
                self.rejoining = true;
                warn!(
                    "Failed to send audio ({}): rejoining, attempt {}.",
                    e, self.rejoins
                );
                fx.push(Effect::Rejoin(voice, self.rejoin_cycle));
            },
            Err(e) if e.should_rejoin() => {
                self.rejoins = 0;
                self.fail(fx, PlayError::Transport(e));
            },
            Err(e) => trace!("Dropped frame: {}.", e),
        }
    }
}

impl fmt::Debug for AudioPlayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.inner.core.lock();
        f.debug_struct("AudioPlayer")
            .field("state", &core.state)
            .field("voice", &core.voice)
            .field("task", &core.task)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::STEREO_FRAME_BYTE_SIZE,
        driver::test_impls::*,
        input::StreamOptions,
    };
    use std::io::{Cursor, Read};

    fn idle_scheduler() -> Scheduler {
        let scheduler = Scheduler::default();
        scheduler.shutdown();
        scheduler
    }

    fn manual_player(config: Config) -> AudioPlayer {
        AudioPlayer::new(config.scheduler(idle_scheduler()))
    }

    fn pcm(frames: usize) -> Cursor<Vec<u8>> {
        Cursor::new(vec![0x11; frames * STEREO_FRAME_BYTE_SIZE])
    }

    async fn ready_stream(frames: usize) -> Transcoder {
        let stream = Transcoder::from_pcm(pcm(frames), &StreamOptions::default());
        stream.ready_signal().recv_async().await.unwrap().unwrap();
        stream
    }

    /// PCM source which yields nothing until its sender is used.
    struct Gated(flume::Receiver<Vec<u8>>, Cursor<Vec<u8>>);

    impl Read for Gated {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            loop {
                let n = self.1.read(buf)?;
                if n > 0 {
                    return Ok(n);
                }
                match self.0.recv() {
                    Ok(bytes) => self.1 = Cursor::new(bytes),
                    Err(_) => return Ok(0),
                }
            }
        }
    }

    fn gated_stream() -> (flume::Sender<Vec<u8>>, Transcoder) {
        let (tx, rx) = flume::unbounded();
        let stream = Transcoder::from_pcm(
            Gated(rx, Cursor::new(vec![])),
            &StreamOptions::default(),
        );
        (tx, stream)
    }

    /// Ticks until the player goes idle, returning the number of ticks taken.
    async fn tick_until_idle(player: &AudioPlayer) -> usize {
        for ticks in 1..=1000 {
            player.inner.tick();
            if player.status() != PlayerStatus::Playing {
                return ticks;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("player never went idle");
    }

    #[tokio::test]
    async fn readable_streams_play_immediately() {
        let player = manual_player(Config::default());
        let rx = player.subscribe();

        player.read(ready_stream(2).await);

        assert_eq!(player.status(), PlayerStatus::Playing);
        assert!(matches!(rx.try_recv(), Ok(PlayerEvent::Playing)));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn waits_for_first_frame_before_playing() {
        let player = manual_player(Config::default());
        let rx = player.subscribe();
        let (gate, stream) = gated_stream();

        player.read(stream);
        assert_eq!(player.status(), PlayerStatus::Loading);

        // Ticks do nothing until the stream has audio.
        player.inner.tick();
        assert_eq!(player.status(), PlayerStatus::Loading);
        assert!(rx.is_empty());

        gate.send(vec![0x22; STEREO_FRAME_BYTE_SIZE]).unwrap();
        assert!(matches!(rx.recv_async().await, Ok(PlayerEvent::Playing)));
        assert_eq!(player.status(), PlayerStatus::Playing);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn silent_streams_time_out() {
        let player = manual_player(Config::default().load_timeout(Duration::from_millis(50)));
        let rx = player.subscribe();
        let (_gate, stream) = gated_stream();

        player.read(stream);

        match rx.recv_async().await {
            Ok(PlayerEvent::Error(e)) => {
                assert!(matches!(*e, PlayError::Timeout));
                assert_eq!(e.action(), ErrorAction::Skip);
            },
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert_eq!(player.status(), PlayerStatus::Errored);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn empty_streams_fail_to_load() {
        let player = manual_player(Config::default());
        let rx = player.subscribe();

        player.read(Transcoder::from_pcm(pcm(0), &StreamOptions::default()));

        match rx.recv_async().await {
            Ok(PlayerEvent::Error(e)) =>
                assert!(matches!(*e, PlayError::Transcode(TranscodeError::NoAudio))),
            other => panic!("expected a load failure, got {other:?}"),
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn replaced_loads_are_ignored() {
        let player = manual_player(Config::default().load_timeout(Duration::from_millis(50)));
        let rx = player.subscribe();
        let (_gate, stream) = gated_stream();

        player.read(stream);
        player.read(ready_stream(2).await);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(player.status(), PlayerStatus::Playing);
        let events: Vec<_> = rx.drain().collect();
        assert!(!events.iter().any(|e| matches!(e, PlayerEvent::Error(_))));
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn finished_streams_are_padded_with_silence() {
        let transport = MockTransport::default();
        let voice = ready_connection(&transport, &MockAdapter::default()).await;
        let player = manual_player(Config::default());
        let rx = player.subscribe();
        player.attach_voice(voice);

        let sent_before = transport.datagrams().len();
        player.read(ready_stream(3).await);
        tick_until_idle(&player).await;

        let sent = transport.datagrams().len() - sent_before;
        assert_eq!(sent, 3 + usize::from(SILENCE_PADDING_FRAMES));
        assert_eq!(player.status(), PlayerStatus::Wait);

        let events: Vec<_> = rx.drain().collect();
        assert!(matches!(events[..], [PlayerEvent::Playing, PlayerEvent::Wait]));
    }

    #[tokio::test]
    async fn no_voice_pauses_playback() {
        let player = manual_player(Config::default());
        player.read(ready_stream(2).await);

        player.inner.tick();

        assert_eq!(player.status(), PlayerStatus::Pause);
        assert!(player.resume());
        assert_eq!(player.status(), PlayerStatus::Playing);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn send_failures_rejoin_then_crash() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let voice = ready_connection(&transport, &adapter).await;
        let player = manual_player(
            Config::default()
                .rejoin_attempts(2)
                .rejoin_timeout(Duration::from_millis(50)),
        );
        let rx = player.subscribe();
        player.attach_voice(voice);
        player.read(ready_stream(10).await);

        let updates_before = adapter.updates.lock().len();
        transport.fail_sends(true);
        tick_until_idle(&player).await;

        assert_eq!(player.status(), PlayerStatus::Errored);
        let error = rx
            .drain()
            .find_map(|e| match e {
                PlayerEvent::Error(e) => Some(e),
                _ => None,
            })
            .unwrap();
        assert!(matches!(*error, PlayError::Transport(_)));
        assert_eq!(error.action(), ErrorAction::Crash);

        assert_eq!(adapter.updates.lock().len(), updates_before + 2);
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn playback_resumes_once_rejoined() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let voice = ready_connection(&transport, &adapter).await;
        let player = manual_player(Config::default());
        let rx = player.subscribe();
        player.attach_voice(voice.clone());
        player.read(ready_stream(10).await);

        let updates_before = adapter.updates.lock().len();
        transport.fail_sends(true);
        player.inner.tick();
        while adapter.updates.lock().len() == updates_before {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Nothing is read or sent until the connection is ready again.
        transport.fail_sends(false);
        let held_from = transport.datagrams().len();
        for _ in 0..5 {
            player.inner.tick();
        }
        assert_eq!(transport.datagrams().len(), held_from);
        assert_eq!(player.status(), PlayerStatus::Playing);

        voice.update_server(Some("voice.example.com:80".into()), "fresh-token".into());
        complete_handshake(&voice, &transport).await;
        let sent_before = transport.datagrams().len();
        tick_until_idle(&player).await;

        assert_eq!(player.status(), PlayerStatus::Wait);
        assert_eq!(
            transport.datagrams().len() - sent_before,
            9 + usize::from(SILENCE_PADDING_FRAMES)
        );
        assert!(!rx.drain().any(|e| matches!(e, PlayerEvent::Error(_))));
    }

    /// Yields its audio, then fails as a crashed transcoder's pipe would.
    struct Truncated(Cursor<Vec<u8>>);

    impl Read for Truncated {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "transcoder died",
                )),
                n => Ok(n),
            }
        }
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn streams_dying_mid_track_fail_instead_of_finishing() {
        let transport = MockTransport::default();
        let voice = ready_connection(&transport, &MockAdapter::default()).await;
        let player = manual_player(Config::default());
        let rx = player.subscribe();
        player.attach_voice(voice);

        let stream = Transcoder::from_pcm(Truncated(pcm(3)), &StreamOptions::default());
        stream.ready_signal().recv_async().await.unwrap().unwrap();
        let sent_before = transport.datagrams().len();
        player.read(stream);
        tick_until_idle(&player).await;

        assert_eq!(player.status(), PlayerStatus::Errored);
        assert_eq!(transport.datagrams().len() - sent_before, 3);

        let events: Vec<_> = rx.drain().collect();
        assert!(!events.iter().any(|e| matches!(e, PlayerEvent::Wait)));
        match events.last() {
            Some(PlayerEvent::Error(e)) => {
                assert!(matches!(**e, PlayError::Transcode(TranscodeError::Io(_))));
                assert_eq!(e.action(), ErrorAction::Skip);
            },
            other => panic!("expected a transcode failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transitions_need_the_right_state() {
        let player = manual_player(Config::default());

        assert!(!player.pause());
        assert!(!player.resume());
        assert!(!player.stop());

        player.read(ready_stream(2).await);
        assert!(!player.resume());
        assert!(player.pause());
        assert!(!player.pause());
        assert!(player.stop());
        assert_eq!(player.status(), PlayerStatus::Wait);
        assert_eq!(player.position(), None);
    }

    #[tokio::test]
    async fn destroy_disconnects_subscribers() {
        let player = manual_player(Config::default());
        let rx = player.subscribe();
        player.read(ready_stream(2).await);
        rx.drain().for_each(drop);

        player.destroy();

        assert_eq!(player.status(), PlayerStatus::Wait);
        assert!(rx.recv().is_err());
    }

    #[tokio::test]
    async fn weak_handles_do_not_keep_players_alive() {
        let player = manual_player(Config::default());
        let weak = player.downgrade();
        assert!(weak.upgrade().is_some());

        drop(player);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn scheduler_drives_playback() {
        let transport = MockTransport::default();
        let voice = ready_connection(&transport, &MockAdapter::default()).await;
        let scheduler = Scheduler::default();
        let player = AudioPlayer::new(Config::default().scheduler(scheduler.clone()));
        let rx = player.subscribe();
        player.attach_voice(voice);

        let sent_before = transport.datagrams().len();
        player.read(ready_stream(4).await);

        loop {
            if let PlayerEvent::Wait = rx.recv_async().await.unwrap() {
                break;
            }
        }
        assert_eq!(
            transport.datagrams().len() - sent_before,
            4 + usize::from(SILENCE_PADDING_FRAMES)
        );

        scheduler.shutdown();
    }
}
