#![allow(missing_docs)]

use super::{
    connection::{
        error::{Error, Result},
        JoinConfig,
        VoiceConnection,
        VoiceConnectionStatus,
    },
    control::{ControlEvent, ControlHandle},
    crypto::{CryptoMode, KEY_SIZE},
    media::{MediaEvent, MediaHandle},
    networking::{NetworkInput, NetworkingEvent, NetworkingStatus, SocketId, Transport},
};
use crate::{
    error::{JoinError, JoinResult},
    events::VoiceEvent,
    id::*,
    model::Event as GatewayEvent,
    shards::VoiceUpdate,
    ConnectionInfo,
};
use async_trait::async_trait;
use flume::{Receiver, Sender};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    net::{IpAddr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use url::Url;

pub const TEST_SSRC: u32 = 0x00c0_ffee;

pub const ALL_MODES: &[&str] = &[
    "xsalsa20_poly1305",
    "xsalsa20_poly1305_suffix",
    "xsalsa20_poly1305_lite",
];

pub const HELLO: &str = r#"{"op":8,"d":{"heartbeat_interval":41250.0}}"#;
pub const RESUMED: &str = r#"{"op":9,"d":null}"#;

pub fn test_info() -> ConnectionInfo {
    ConnectionInfo {
        channel_id: Some(ChannelId(3)),
        endpoint: "voice.example.com:80".into(),
        guild_id: GuildId(1),
        session_id: "session".into(),
        token: "secret-token".into(),
        user_id: UserId(2),
    }
}

pub fn gateway(json: &str) -> GatewayEvent {
    serde_json::from_str(json).unwrap()
}

pub fn ready_packet(modes: &[&str]) -> GatewayEvent {
    let json = serde_json::json!({
        "op": 2,
        "d": {
            "ssrc": TEST_SSRC,
            "ip": "127.0.0.1",
            "port": 50_001,
            "modes": modes,
        },
    });
    serde_json::from_str(&json.to_string()).unwrap()
}

pub fn session_description(mode: CryptoMode) -> GatewayEvent {
    let json = serde_json::json!({
        "op": 4,
        "d": {
            "mode": mode.to_request_str(),
            "secret_key": vec![7u8; KEY_SIZE],
        },
    });
    serde_json::from_str(&json.to_string()).unwrap()
}

#[derive(Default)]
struct MockShared {
    live_control: AtomicUsize,
    live_media: AtomicUsize,
    opened_control: AtomicUsize,
    opened_media: AtomicUsize,
    last_control: Mutex<Option<SocketId>>,
    last_media: Mutex<Option<SocketId>>,
    sent: Mutex<Vec<Value>>,
    datagrams: Mutex<Vec<Vec<u8>>>,
    discoveries: Mutex<Vec<u32>>,
    events: Mutex<Option<Sender<NetworkInput>>>,
    fail_sends: AtomicBool,
}

/// In-memory sockets which record all outbound traffic and count live handles.
#[derive(Clone, Default)]
pub struct MockTransport {
    shared: Arc<MockShared>,
}

impl MockTransport {
    pub fn live_control(&self) -> usize {
        self.shared.live_control.load(Ordering::SeqCst)
    }

    pub fn live_media(&self) -> usize {
        self.shared.live_media.load(Ordering::SeqCst)
    }

    pub fn opened_control(&self) -> usize {
        self.shared.opened_control.load(Ordering::SeqCst)
    }

    pub fn opened_media(&self) -> usize {
        self.shared.opened_media.load(Ordering::SeqCst)
    }

    pub fn last_control(&self) -> Option<SocketId> {
        *self.shared.last_control.lock()
    }

    pub fn last_media(&self) -> Option<SocketId> {
        *self.shared.last_media.lock()
    }

    pub fn sent_packets(&self) -> Vec<Value> {
        self.shared.sent.lock().clone()
    }

    pub fn datagrams(&self) -> Vec<Vec<u8>> {
        self.shared.datagrams.lock().clone()
    }

    pub fn discoveries(&self) -> Vec<u32> {
        self.shared.discoveries.lock().clone()
    }

    /// Event channel handed to the most recently opened signalling socket.
    pub fn last_events(&self) -> Option<Sender<NetworkInput>> {
        self.shared.events.lock().clone()
    }

    /// Makes every subsequent UDP send fail, as an unresolvable host would.
    pub fn fail_sends(&self, fail: bool) {
        self.shared.fail_sends.store(fail, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn open_control(
        &self,
        id: SocketId,
        _url: Url,
        events: Sender<NetworkInput>,
    ) -> Box<dyn ControlHandle> {
        self.shared.live_control.fetch_add(1, Ordering::SeqCst);
        self.shared.opened_control.fetch_add(1, Ordering::SeqCst);
        *self.shared.last_control.lock() = Some(id);
        *self.shared.events.lock() = Some(events);

        Box::new(MockControl {
            id,
            shared: self.shared.clone(),
        })
    }

    fn open_media(
        &self,
        id: SocketId,
        _remote: SocketAddr,
        _events: Sender<NetworkInput>,
    ) -> Result<Box<dyn MediaHandle>> {
        self.shared.live_media.fetch_add(1, Ordering::SeqCst);
        self.shared.opened_media.fetch_add(1, Ordering::SeqCst);
        *self.shared.last_media.lock() = Some(id);

        Ok(Box::new(MockMedia {
            id,
            shared: self.shared.clone(),
        }))
    }
}

struct MockControl {
    id: SocketId,
    shared: Arc<MockShared>,
}

impl ControlHandle for MockControl {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send_packet(&self, packet: GatewayEvent) {
        let value = serde_json::to_value(&packet).unwrap();
        self.shared.sent.lock().push(value);
    }
}

impl Drop for MockControl {
    fn drop(&mut self) {
        self.shared.live_control.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockMedia {
    id: SocketId,
    shared: Arc<MockShared>,
}

impl MediaHandle for MockMedia {
    fn id(&self) -> SocketId {
        self.id
    }

    fn perform_ip_discovery(&self, ssrc: u32) {
        self.shared.discoveries.lock().push(ssrc);
    }

    fn send(&self, packet: &[u8]) -> Result<()> {
        if self.shared.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "getaddrinfo ENOTFOUND",
            )));
        }

        self.shared.datagrams.lock().push(packet.to_vec());
        Ok(())
    }
}

impl Drop for MockMedia {
    fn drop(&mut self) {
        self.shared.live_media.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Gateway adapter which records every voice state update it is asked to send.
#[derive(Clone, Default)]
pub struct MockAdapter {
    pub updates: Arc<Mutex<Vec<Option<ChannelId>>>>,
    pub destroyed: Arc<AtomicBool>,
    pub fail: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceUpdate for MockAdapter {
    async fn update_voice_state(
        &self,
        _guild_id: GuildId,
        channel_id: Option<ChannelId>,
        _self_deaf: bool,
        _self_mute: bool,
    ) -> JoinResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(JoinError::NoSender);
        }

        self.updates.lock().push(channel_id);
        Ok(())
    }

    fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

async fn wait_for(rx: &Receiver<VoiceEvent>, wanted: impl Fn(&VoiceEvent) -> bool) {
    loop {
        let event = rx.recv_async().await.unwrap();
        if wanted(&event) {
            return;
        }
    }
}

fn reached(event: &VoiceEvent, status: NetworkingStatus) -> bool {
    matches!(
        event,
        VoiceEvent::Networking(NetworkingEvent::StateChange { to, .. }) if *to == status
    )
}

/// Builds a connection over `transport`, and feeds its runner task a complete
/// handshake until audio may be sent.
pub async fn ready_connection(transport: &MockTransport, adapter: &MockAdapter) -> VoiceConnection {
    let conn = VoiceConnection::with_transport(
        GuildId(1),
        UserId(2),
        JoinConfig::new(ChannelId(3)),
        Arc::new(adapter.clone()),
        Arc::new(transport.clone()),
    );

    conn.update_server(Some("voice.example.com:80".into()), "secret-token".into());
    conn.update_state("session".into(), Some(ChannelId(3)));
    complete_handshake(&conn, transport).await;

    conn
}

/// Feeds the most recently opened sockets of `conn` every packet needed to reach `Ready`.
pub async fn complete_handshake(conn: &VoiceConnection, transport: &MockTransport) {
    let rx = conn.subscribe();
    let events = transport.last_events().unwrap();
    let ws = transport.last_control().unwrap();
    for packet in [ControlEvent::Open, ControlEvent::Packet(gateway(HELLO))] {
        events.send(NetworkInput::Control(ws, packet)).unwrap();
    }
    events
        .send(NetworkInput::Control(
            ws,
            ControlEvent::Packet(ready_packet(ALL_MODES)),
        ))
        .unwrap();
    wait_for(&rx, |e| reached(e, NetworkingStatus::UdpHandshaking)).await;

    events
        .send(NetworkInput::Media(
            transport.last_media().unwrap(),
            MediaEvent::Discovered(IpAddr::from([203, 0, 113, 9]), 40_000),
        ))
        .unwrap();
    wait_for(&rx, |e| reached(e, NetworkingStatus::SelectingProtocol)).await;

    events
        .send(NetworkInput::Control(
            ws,
            ControlEvent::Packet(session_description(CryptoMode::Lite)),
        ))
        .unwrap();
    wait_for(&rx, |e| {
        matches!(
            e,
            VoiceEvent::StateChange {
                to: VoiceConnectionStatus::Ready,
                ..
            }
        )
    })
    .await;
}
