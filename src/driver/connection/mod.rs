//! Per-session facade above a [`Networking`] instance.

pub mod error;

use self::error::{Error, Result};
use super::networking::{
    NetworkInput,
    Networking,
    NetworkingEvent,
    NetworkingStatus,
    TokioTransport,
    Transport,
};
use crate::{
    constants::{CLOSE_CODE_DISCONNECTED, REJOIN_ATTEMPTS},
    error::{JoinError, JoinResult},
    events::{EventBus, VoiceEvent},
    id::{ChannelId, GuildId, UserId},
    info::ConnectionProgress,
    input::Frame,
    shards::VoiceUpdate,
    ConnectionInfo,
};
use flume::Receiver;
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tokio::runtime::Handle;
use tracing::{debug, error, instrument, trace, warn};

/// Why a [`VoiceConnection`] is no longer connected.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The signalling socket closed with the given code, and no reconnection
    /// will be attempted.
    WebSocketClosed(Option<u16>),
    /// The gateway adapter could not send a voice state update.
    AdapterUnavailable,
    /// Discord withdrew the voice server assigned to this session.
    EndpointRemoved,
    /// The connection was asked to leave its channel.
    Manual,
}

/// Lifecycle state of a [`VoiceConnection`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum VoiceConnectionStatus {
    /// Waiting on voice server and voice state packets from the main gateway.
    Signalling,
    /// Both packets are known, and the voice handshake is underway.
    Connecting,
    /// Audio may be sent.
    Ready,
    /// Not connected, though the session may be rejoined.
    Disconnected(DisconnectReason),
    /// Terminal.
    Destroyed,
}

/// Channel and mute settings sent to Discord when joining.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct JoinConfig {
    /// Voice channel to join.
    pub channel_id: Option<ChannelId>,
    /// Whether to join self-deafened.
    pub self_deaf: bool,
    /// Whether to join self-muted.
    pub self_mute: bool,
}

impl JoinConfig {
    /// Join settings for `channel_id`, undeafened and unmuted.
    #[must_use]
    pub fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id: Some(channel_id),
            ..Default::default()
        }
    }
}

struct VoiceCore {
    join: JoinConfig,
    networking: Option<Networking>,
    generation: u64,
    progress: ConnectionProgress,
    rejoin_attempts: u32,
    rejoin_limit: u32,
    status: VoiceConnectionStatus,
}

impl VoiceCore {
    fn set_status(&mut self, to: VoiceConnectionStatus, out: &mut Vec<VoiceEvent>) {
        let from = self.status;
        if from == to || from == VoiceConnectionStatus::Destroyed {
            return;
        }

        debug!("Voice connection {:?} -> {:?}.", from, to);
        self.status = to;
        out.push(VoiceEvent::StateChange { from, to });
    }
}

/// A single guild's voice session.
///
/// A `VoiceConnection` sends voice state updates through its [`VoiceUpdate`]
/// adapter, and assembles the voice server and voice state packets that Discord
/// sends back (passed in through [`update_server`] and [`update_state`]) into a
/// [`Networking`] session. Cloning yields another handle to the same session.
///
/// [`update_server`]: VoiceConnection::update_server
/// [`update_state`]: VoiceConnection::update_state
#[derive(Clone)]
pub struct VoiceConnection {
    adapter: Arc<dyn VoiceUpdate + Send + Sync>,
    core: Arc<Mutex<VoiceCore>>,
    events: Arc<EventBus<VoiceEvent>>,
    guild_id: GuildId,
    handle: Handle,
    transport: Arc<dyn Transport>,
}

impl VoiceConnection {
    /// Creates a voice connection for `guild_id`, using real sockets.
    ///
    /// No voice state update is sent until [`connect`] is called.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    ///
    /// [`connect`]: VoiceConnection::connect
    #[must_use]
    pub fn new(
        guild_id: GuildId,
        user_id: UserId,
        join: JoinConfig,
        adapter: Arc<dyn VoiceUpdate + Send + Sync>,
    ) -> Self {
        Self::with_transport(guild_id, user_id, join, adapter, Arc::new(TokioTransport))
    }

    /// Creates a voice connection whose sockets are opened by `transport`.
    ///
    /// # Panics
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn with_transport(
        guild_id: GuildId,
        user_id: UserId,
        join: JoinConfig,
        adapter: Arc<dyn VoiceUpdate + Send + Sync>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let core = VoiceCore {
            join,
            networking: None,
            generation: 0,
            progress: ConnectionProgress::new(guild_id, user_id, join.channel_id),
            rejoin_attempts: 0,
            rejoin_limit: REJOIN_ATTEMPTS,
            status: VoiceConnectionStatus::Signalling,
        };

        Self {
            adapter,
            core: Arc::new(Mutex::new(core)),
            events: Arc::default(),
            guild_id,
            handle: Handle::current(),
            transport,
        }
    }

    /// Current state of this connection.
    #[must_use]
    pub fn status(&self) -> VoiceConnectionStatus {
        self.core.lock().status
    }

    /// Number of rejoins attempted since the connection was last `Ready`.
    #[must_use]
    pub fn rejoin_attempts(&self) -> u32 {
        self.core.lock().rejoin_attempts
    }

    /// Sets how many times a failed handshake is signalled again before the
    /// connection gives up. Defaults to [`REJOIN_ATTEMPTS`].
    ///
    /// [`REJOIN_ATTEMPTS`]: crate::constants::REJOIN_ATTEMPTS
    pub fn set_rejoin_limit(&self, limit: u32) {
        self.core.lock().rejoin_limit = limit;
    }

    /// Channel this connection currently targets.
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.core.lock().progress.channel_id()
    }

    /// Full connection parameters, once both gateway packets have arrived.
    #[must_use]
    pub fn current_connection(&self) -> Option<ConnectionInfo> {
        self.core.lock().progress.info().cloned()
    }

    /// Phase of the underlying network session, if one exists.
    #[must_use]
    pub fn networking_status(&self) -> Option<NetworkingStatus> {
        self.core.lock().networking.as_ref().map(Networking::status)
    }

    /// Receives every [`VoiceEvent`] raised from now on.
    pub fn subscribe(&self) -> Receiver<VoiceEvent> {
        self.events.subscribe()
    }

    /// Asks Discord to place this user in the configured channel.
    #[instrument(skip(self))]
    pub async fn connect(&self) -> JoinResult<()> {
        let join = {
            let mut core = self.core.lock();
            if core.status == VoiceConnectionStatus::Destroyed {
                return Err(JoinError::Dropped);
            }

            let mut out = vec![];
            core.set_status(VoiceConnectionStatus::Signalling, &mut out);
            self.emit_all(out);
            core.join
        };

        self.send_voice_state(join.channel_id, join).await
    }

    /// Resends the voice state update, optionally with new settings.
    ///
    /// If the connection is not `Ready`, this also returns it to `Signalling`
    /// and counts a rejoin attempt.
    #[instrument(skip(self))]
    pub async fn rejoin(&self, config: Option<JoinConfig>) -> JoinResult<()> {
        let join = {
            let mut core = self.core.lock();
            if core.status == VoiceConnectionStatus::Destroyed {
                return Err(JoinError::Dropped);
            }

            if let Some(config) = config {
                core.join = config;
            }

            let mut out = vec![];
            if core.status != VoiceConnectionStatus::Ready {
                core.rejoin_attempts += 1;
                core.set_status(VoiceConnectionStatus::Signalling, &mut out);
            }
            self.emit_all(out);

            core.join
        };

        self.send_voice_state(join.channel_id, join).await
    }

    /// Leaves the voice channel.
    ///
    /// The network session is kept, so the connection may later be rejoined.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) -> JoinResult<()> {
        let join = self.core.lock().join;
        self.send_voice_state(None, join).await?;

        let mut core = self.core.lock();
        let mut out = vec![];
        core.set_status(
            VoiceConnectionStatus::Disconnected(DisconnectReason::Manual),
            &mut out,
        );
        drop(core);
        self.emit_all(out);

        Ok(())
    }

    /// Leaves the voice channel and releases every resource held by this connection.
    ///
    /// Irreversible: all further calls are no-ops or fail with [`JoinError::Dropped`].
    #[instrument(skip(self))]
    pub async fn destroy(&self) -> JoinResult<()> {
        let (join, out) = {
            let mut core = self.core.lock();
            if core.status == VoiceConnectionStatus::Destroyed {
                return Ok(());
            }

            let mut out = vec![];
            if let Some(mut net) = core.networking.take() {
                out.extend(net.destroy().into_iter().map(VoiceEvent::Networking));
            }
            core.generation += 1;
            core.set_status(VoiceConnectionStatus::Destroyed, &mut out);

            (core.join, out)
        };

        let leave = self
            .adapter
            .update_voice_state(self.guild_id, None, join.self_deaf, join.self_mute)
            .await;
        self.adapter.destroy();

        self.emit_all(out);
        self.events.clear();

        leave
    }

    /// Updates the voice server data sent by Discord.
    ///
    /// An `endpoint` of `None` means the server was withdrawn, and Discord
    /// will assign a new one.
    #[instrument(skip(self, token))]
    pub fn update_server(&self, endpoint: Option<String>, token: String) {
        let mut out = vec![];
        {
            let mut core = self.core.lock();
            if core.status == VoiceConnectionStatus::Destroyed {
                return;
            }

            if let Some(endpoint) = endpoint {
                if core.progress.apply_server_update(endpoint, token) {
                    self.configure_networking(&mut core, &mut out);
                }
            } else {
                core.progress.remove_server();
                Self::drop_networking(&mut core, &mut out);
                core.set_status(
                    VoiceConnectionStatus::Disconnected(DisconnectReason::EndpointRemoved),
                    &mut out,
                );
            }
        }
        self.emit_all(out);
    }

    /// Updates this user's voice state, as sent by Discord.
    ///
    /// A `channel_id` of `None` means this user has left (or been removed from)
    /// the voice channel.
    #[instrument(skip(self))]
    pub fn update_state(&self, session_id: String, channel_id: Option<ChannelId>) {
        let mut out = vec![];
        {
            let mut core = self.core.lock();
            if core.status == VoiceConnectionStatus::Destroyed {
                return;
            }

            let reconnect = core.progress.apply_state_update(session_id, channel_id);
            if channel_id.is_none() {
                Self::drop_networking(&mut core, &mut out);
                core.set_status(
                    VoiceConnectionStatus::Disconnected(DisconnectReason::Manual),
                    &mut out,
                );
            } else if reconnect {
                core.join.channel_id = channel_id;
                self.configure_networking(&mut core, &mut out);
            }
        }
        self.emit_all(out);
    }

    /// Seals and sends one Opus frame.
    ///
    /// Returns whether a packet went out.
    pub fn send_frame(&self, frame: &Frame) -> Result<bool> {
        let mut core = self.core.lock();
        let net = core.networking.as_mut().ok_or(Error::NotReady)?;

        net.prepare_audio_packet(&frame.opus)?;
        net.dispatch_audio()
    }

    /// Sets the speaking flag, notifying Discord if it changed.
    pub fn set_speaking(&self, speaking: bool) {
        if let Some(net) = self.core.lock().networking.as_mut() {
            net.set_speaking(speaking);
        }
    }

    async fn send_voice_state(&self, channel_id: Option<ChannelId>, join: JoinConfig) -> JoinResult<()> {
        let sent = self
            .adapter
            .update_voice_state(self.guild_id, channel_id, join.self_deaf, join.self_mute)
            .await;

        if let Err(e) = &sent {
            warn!("Gateway adapter failed to send voice state: {}.", e);
            let mut core = self.core.lock();
            let mut out = vec![];
            core.set_status(
                VoiceConnectionStatus::Disconnected(DisconnectReason::AdapterUnavailable),
                &mut out,
            );
            drop(core);
            self.emit_all(out);
        }

        sent
    }

    fn drop_networking(core: &mut VoiceCore, out: &mut Vec<VoiceEvent>) {
        if let Some(mut net) = core.networking.take() {
            out.extend(net.destroy().into_iter().map(VoiceEvent::Networking));
        }
        core.generation += 1;
    }

    /// Replaces the network session with a fresh one built from the completed
    /// connection info.
    fn configure_networking(&self, core: &mut VoiceCore, out: &mut Vec<VoiceEvent>) {
        let Some(info) = core.progress.info().cloned() else {
            return;
        };

        Self::drop_networking(core, out);
        let generation = core.generation;

        let (tx, rx) = flume::unbounded();
        let net = {
            let _rt = self.handle.enter();
            Networking::new(info, self.transport.clone(), tx)
        };

        match net {
            Ok(net) => {
                core.networking = Some(net);
                core.set_status(VoiceConnectionStatus::Connecting, out);

                let conn = self.clone();
                self.handle.spawn(async move {
                    trace!("Networking runner {} started.", generation);
                    while let Ok(input) = rx.recv_async().await {
                        if !conn.process(generation, input).await {
                            break;
                        }
                    }
                    trace!("Networking runner {} finished.", generation);
                });
            },
            Err(e) => {
                error!("Could not start voice handshake: {}.", e);
                out.push(VoiceEvent::Networking(NetworkingEvent::Error(Arc::new(e))));
                core.set_status(
                    VoiceConnectionStatus::Disconnected(DisconnectReason::WebSocketClosed(None)),
                    out,
                );
            },
        }
    }

    /// Feeds one socket event into the network session of the given generation.
    ///
    /// Returns `false` once that session has been replaced or closed.
    async fn process(&self, generation: u64, input: NetworkInput) -> bool {
        let mut out = vec![];
        let mut resignal = None;

        {
            let mut core = self.core.lock();
            if core.generation != generation {
                return false;
            }
            let Some(net) = core.networking.as_mut() else {
                return false;
            };

            for event in net.handle(input) {
                match &event {
                    NetworkingEvent::StateChange {
                        to: NetworkingStatus::Ready,
                        ..
                    } => {
                        core.rejoin_attempts = 0;
                        core.set_status(VoiceConnectionStatus::Ready, &mut out);
                    },
                    NetworkingEvent::StateChange {
                        to: NetworkingStatus::Resuming,
                        ..
                    } => core.set_status(VoiceConnectionStatus::Connecting, &mut out),
                    NetworkingEvent::Close(Some(CLOSE_CODE_DISCONNECTED)) => {
                        core.set_status(
                            VoiceConnectionStatus::Disconnected(DisconnectReason::WebSocketClosed(
                                Some(CLOSE_CODE_DISCONNECTED),
                            )),
                            &mut out,
                        );
                    },
                    NetworkingEvent::Close(code) if core.rejoin_attempts >= core.rejoin_limit => {
                        warn!(
                            "Networking closed ({:?}) after {} rejoins, giving up.",
                            code, core.rejoin_attempts
                        );
                        core.set_status(
                            VoiceConnectionStatus::Disconnected(DisconnectReason::WebSocketClosed(
                                *code,
                            )),
                            &mut out,
                        );
                    },
                    NetworkingEvent::Close(code) => {
                        debug!("Networking closed ({:?}), signalling again.", code);
                        core.rejoin_attempts += 1;
                        core.set_status(VoiceConnectionStatus::Signalling, &mut out);
                        resignal = Some(core.join);
                    },
                    _ => {},
                }
                out.push(VoiceEvent::Networking(event));
            }

            if core
                .networking
                .as_ref()
                .map_or(true, |net| net.status() == NetworkingStatus::Closed)
            {
                core.networking = None;
                core.generation += 1;
            }
        }

        self.emit_all(out);

        if let Some(join) = resignal {
            // Errors move the connection to `Disconnected` inside.
            let _ = self.send_voice_state(join.channel_id, join).await;
            return false;
        }

        self.core.lock().generation == generation
    }

    fn emit_all(&self, events: Vec<VoiceEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }
}

impl fmt::Debug for VoiceConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.core.lock();
        f.debug_struct("VoiceConnection")
            .field("guild_id", &self.guild_id)
            .field("status", &core.status)
            .field("progress", &core.progress)
            .field("networking", &core.networking)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{control::ControlEvent, crypto::CryptoMode, media::MediaEvent, test_impls::*};
    use std::{net::IpAddr, sync::atomic::Ordering};

    fn build(transport: &MockTransport, adapter: &MockAdapter) -> VoiceConnection {
        VoiceConnection::with_transport(
            GuildId(1),
            UserId(2),
            JoinConfig::new(ChannelId(3)),
            Arc::new(adapter.clone()),
            Arc::new(transport.clone()),
        )
    }

    fn fill_progress(conn: &VoiceConnection) {
        conn.update_server(Some("voice.example.com:80".into()), "secret-token".into());
        conn.update_state("session".into(), Some(ChannelId(3)));
    }

    async fn feed(conn: &VoiceConnection, input: NetworkInput) {
        let generation = conn.core.lock().generation;
        conn.process(generation, input).await;
    }

    async fn drive_to_ready(conn: &VoiceConnection, transport: &MockTransport) {
        let ws = transport.last_control().unwrap();
        feed(conn, NetworkInput::Control(ws, ControlEvent::Open)).await;
        feed(conn, NetworkInput::Control(ws, ControlEvent::Packet(gateway(HELLO)))).await;
        feed(
            conn,
            NetworkInput::Control(ws, ControlEvent::Packet(ready_packet(ALL_MODES))),
        )
        .await;
        feed(
            conn,
            NetworkInput::Media(
                transport.last_media().unwrap(),
                MediaEvent::Discovered(IpAddr::from([203, 0, 113, 9]), 40_000),
            ),
        )
        .await;
        feed(
            conn,
            NetworkInput::Control(ws, ControlEvent::Packet(session_description(CryptoMode::Lite))),
        )
        .await;
    }

    fn statuses(rx: &Receiver<VoiceEvent>) -> Vec<VoiceConnectionStatus> {
        rx.drain()
            .filter_map(|e| match e {
                VoiceEvent::StateChange { to, .. } => Some(to),
                VoiceEvent::Networking(_) => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn handshake_requires_both_packets() {
        let transport = MockTransport::default();
        let conn = build(&transport, &MockAdapter::default());

        conn.update_server(Some("voice.example.com:80".into()), "secret-token".into());
        assert_eq!(transport.opened_control(), 0);
        assert_eq!(conn.status(), VoiceConnectionStatus::Signalling);

        conn.update_state("session".into(), Some(ChannelId(3)));
        assert_eq!(transport.opened_control(), 1);
        assert_eq!(conn.status(), VoiceConnectionStatus::Connecting);
    }

    #[tokio::test]
    async fn reaches_ready_and_sends_frames() {
        let transport = MockTransport::default();
        let conn = build(&transport, &MockAdapter::default());
        let rx = conn.subscribe();

        fill_progress(&conn);
        drive_to_ready(&conn, &transport).await;

        assert_eq!(conn.status(), VoiceConnectionStatus::Ready);
        assert_eq!(
            statuses(&rx),
            vec![VoiceConnectionStatus::Connecting, VoiceConnectionStatus::Ready]
        );

        let frame = Frame::new(vec![1, 2, 3]);
        assert!(conn.send_frame(&frame).unwrap());
        assert_eq!(transport.datagrams().len(), 1);
    }

    #[tokio::test]
    async fn frames_need_a_session() {
        let conn = build(&MockTransport::default(), &MockAdapter::default());
        assert!(matches!(
            conn.send_frame(&Frame::new(vec![1])),
            Err(Error::NotReady)
        ));
    }

    #[tokio::test]
    async fn new_server_replaces_networking() {
        let transport = MockTransport::default();
        let conn = build(&transport, &MockAdapter::default());

        fill_progress(&conn);
        conn.update_server(Some("voice2.example.com".into()), "secret-token".into());

        assert_eq!(transport.opened_control(), 2);
        assert_eq!(transport.live_control(), 1);
    }

    #[tokio::test]
    async fn endpoint_removal_disconnects() {
        let transport = MockTransport::default();
        let conn = build(&transport, &MockAdapter::default());

        fill_progress(&conn);
        conn.update_server(None, String::new());

        assert_eq!(
            conn.status(),
            VoiceConnectionStatus::Disconnected(DisconnectReason::EndpointRemoved)
        );
        assert_eq!(transport.live_control(), 0);
        assert!(conn.networking_status().is_none());
    }

    #[tokio::test]
    async fn close_4014_is_terminal_for_the_session() {
        let transport = MockTransport::default();
        let conn = build(&transport, &MockAdapter::default());

        fill_progress(&conn);
        drive_to_ready(&conn, &transport).await;

        let ws = transport.last_control().unwrap();
        feed(&conn, NetworkInput::Control(ws, ControlEvent::Closed(Some(4014)))).await;

        assert_eq!(
            conn.status(),
            VoiceConnectionStatus::Disconnected(DisconnectReason::WebSocketClosed(Some(4014)))
        );
        assert_eq!(transport.opened_control(), 1);
        assert_eq!(transport.live_control(), 0);
    }

    #[tokio::test]
    async fn abnormal_close_reconnects_without_signalling() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let conn = build(&transport, &adapter);

        fill_progress(&conn);
        drive_to_ready(&conn, &transport).await;

        let ws = transport.last_control().unwrap();
        feed(&conn, NetworkInput::Control(ws, ControlEvent::Closed(Some(1006)))).await;

        assert_eq!(conn.status(), VoiceConnectionStatus::Connecting);
        assert_eq!(conn.networking_status(), Some(NetworkingStatus::Resuming));
        assert!(adapter.updates.lock().is_empty());
    }

    #[tokio::test]
    async fn handshake_failure_signals_again() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let conn = build(&transport, &adapter);

        fill_progress(&conn);
        let ws = transport.last_control().unwrap();
        feed(&conn, NetworkInput::Control(ws, ControlEvent::Closed(Some(1006)))).await;

        assert_eq!(conn.status(), VoiceConnectionStatus::Signalling);
        assert_eq!(conn.rejoin_attempts(), 1);
        assert_eq!(*adapter.updates.lock(), vec![Some(ChannelId(3))]);
        assert!(conn.networking_status().is_none());
    }

    #[tokio::test]
    async fn repeated_handshake_failures_give_up() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let conn = build(&transport, &adapter);

        for attempt in 0..3 {
            // Each new token is a fresh server assignment.
            conn.update_server(Some("voice.example.com:80".into()), format!("token-{attempt}"));
            conn.update_state("session".into(), Some(ChannelId(3)));
            let ws = transport.last_control().unwrap();
            feed(&conn, NetworkInput::Control(ws, ControlEvent::Closed(Some(1006)))).await;
        }

        assert_eq!(
            conn.status(),
            VoiceConnectionStatus::Disconnected(DisconnectReason::WebSocketClosed(Some(1006)))
        );
        assert_eq!(conn.rejoin_attempts(), REJOIN_ATTEMPTS);
        assert_eq!(adapter.updates.lock().len(), 2);
        assert_eq!(transport.opened_control(), 3);
        assert!(conn.networking_status().is_none());
    }

    #[tokio::test]
    async fn rejoin_counts_attempts_until_ready() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let conn = build(&transport, &adapter);

        conn.rejoin(None).await.unwrap();
        conn.rejoin(Some(JoinConfig::new(ChannelId(9)))).await.unwrap();
        assert_eq!(conn.rejoin_attempts(), 2);
        assert_eq!(
            *adapter.updates.lock(),
            vec![Some(ChannelId(3)), Some(ChannelId(9))]
        );

        fill_progress(&conn);
        drive_to_ready(&conn, &transport).await;
        assert_eq!(conn.rejoin_attempts(), 0);

        conn.rejoin(None).await.unwrap();
        assert_eq!(conn.rejoin_attempts(), 0);
        assert_eq!(conn.status(), VoiceConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn adapter_failure_is_reported() {
        let adapter = MockAdapter::default();
        adapter.fail.store(true, Ordering::SeqCst);
        let conn = build(&MockTransport::default(), &adapter);

        assert!(matches!(conn.connect().await, Err(JoinError::NoSender)));
        assert_eq!(
            conn.status(),
            VoiceConnectionStatus::Disconnected(DisconnectReason::AdapterUnavailable)
        );
    }

    #[tokio::test]
    async fn disconnect_keeps_networking() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let conn = build(&transport, &adapter);

        fill_progress(&conn);
        drive_to_ready(&conn, &transport).await;
        conn.disconnect().await.unwrap();

        assert_eq!(
            conn.status(),
            VoiceConnectionStatus::Disconnected(DisconnectReason::Manual)
        );
        assert_eq!(*adapter.updates.lock(), vec![None]);
        assert_eq!(transport.live_control(), 1);
    }

    #[tokio::test]
    async fn destroy_is_terminal() {
        let transport = MockTransport::default();
        let adapter = MockAdapter::default();
        let conn = build(&transport, &adapter);
        let rx = conn.subscribe();

        fill_progress(&conn);
        drive_to_ready(&conn, &transport).await;
        conn.destroy().await.unwrap();

        assert_eq!(conn.status(), VoiceConnectionStatus::Destroyed);
        assert!(adapter.destroyed.load(Ordering::SeqCst));
        assert_eq!(transport.live_control(), 0);
        assert_eq!(transport.live_media(), 0);
        assert_eq!(statuses(&rx).last(), Some(&VoiceConnectionStatus::Destroyed));

        conn.update_state("session-2".into(), Some(ChannelId(3)));
        assert_eq!(transport.opened_control(), 1);
        assert!(matches!(conn.rejoin(None).await, Err(JoinError::Dropped)));
        assert!(conn.destroy().await.is_ok());
    }

    #[tokio::test]
    #[ntest::timeout(10_000)]
    async fn runner_drives_the_handshake() {
        let transport = MockTransport::default();
        let conn = build(&transport, &MockAdapter::default());
        let rx = conn.subscribe();

        fill_progress(&conn);

        // Socket events reach the spawned runner through the session's channel.
        let events = transport.last_events().unwrap();
        let ws = transport.last_control().unwrap();
        events
            .send(NetworkInput::Control(ws, ControlEvent::Open))
            .unwrap();

        loop {
            if let VoiceEvent::Networking(NetworkingEvent::StateChange {
                to: NetworkingStatus::Identifying,
                ..
            }) = rx.recv_async().await.unwrap()
            {
                break;
            }
        }
        assert_eq!(
            conn.networking_status(),
            Some(NetworkingStatus::Identifying)
        );
    }
}
