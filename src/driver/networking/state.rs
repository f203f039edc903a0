use super::{transport::Transport, NetworkInput, NetworkingEvent, NetworkingStatus, SocketId};
use crate::{
    constants::*,
    driver::{
        connection::error::{Error, Result},
        control::{ControlEvent, ControlHandle},
        crypto::{self, CryptoMode},
        media::{MediaEvent, MediaHandle},
    },
    model::{
        payload::{Identify, Ready as ReadyPayload, Resume, SelectProtocol, SessionDescription},
        Event as GatewayEvent,
        ProtocolData,
    },
    ConnectionInfo,
};
use crypto_secretbox::XSalsa20Poly1305 as Cipher;
use discortp::rtp::MutableRtpPacket;
use flume::Sender;
use std::{fmt, net::SocketAddr, sync::Arc};
use tracing::{debug, trace, warn};
use url::Url;

/// Session parameters negotiated during the handshake, and the per-packet
/// counters which follow from them.
pub struct ConnectionData {
    /// Media source ID assigned by the server.
    pub ssrc: u32,
    /// Negotiated encryption mode.
    pub mode: CryptoMode,
    cipher: Cipher,
    /// RTP sequence number of the next packet.
    pub sequence: u16,
    /// RTP timestamp of the next packet.
    pub timestamp: u32,
    /// Lite-mode nonce counter.
    pub nonce: u32,
    /// Whether the server currently believes we are speaking.
    pub speaking: bool,
    /// Number of audio packets handed to the media socket.
    pub packets_played: u64,
    pub(crate) prepared_packet: Option<Vec<u8>>,
}

impl ConnectionData {
    pub(crate) fn new(ssrc: u32, mode: CryptoMode, cipher: Cipher) -> Self {
        Self {
            ssrc,
            mode,
            cipher,
            sequence: rand::random(),
            timestamp: rand::random(),
            nonce: 0,
            speaking: false,
            packets_played: 0,
            prepared_packet: None,
        }
    }

    /// Seals `opus` into a complete datagram under the current counters,
    /// replacing any packet which was prepared but never dispatched.
    pub(crate) fn prepare_packet(&mut self, opus: &[u8]) -> Result<()> {
        let mut header = [0u8; RTP_HEADER_LEN];
        {
            let mut rtp = MutableRtpPacket::new(&mut header[..]).expect(
                "FATAL: Too few bytes in header for RTP header.\
                    (Blame: RTP_HEADER_LEN?)",
            );
            rtp.set_version(RTP_VERSION);
            rtp.set_payload_type(RTP_PROFILE_TYPE);
            rtp.set_sequence(self.sequence.into());
            rtp.set_timestamp(self.timestamp.into());
            rtp.set_ssrc(self.ssrc);
        }

        self.nonce = self.nonce.wrapping_add(1);
        let packet = self
            .mode
            .encrypt_packet(&header, opus, self.nonce, &self.cipher)?;

        if self.prepared_packet.replace(packet).is_some() {
            trace!("Overwrote undispatched audio packet.");
        }

        Ok(())
    }

    /// Advances the per-packet counters after a packet is sent.
    pub(crate) fn advance(&mut self) {
        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(MONO_FRAME_SIZE as u32);
        self.packets_played += 1;
    }

    #[cfg(test)]
    pub(crate) fn cipher(&self) -> &Cipher {
        &self.cipher
    }
}

impl fmt::Debug for ConnectionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionData")
            .field("ssrc", &self.ssrc)
            .field("mode", &self.mode)
            .field("cipher", &"<secret>")
            .field("sequence", &self.sequence)
            .field("timestamp", &self.timestamp)
            .field("nonce", &self.nonce)
            .field("speaking", &self.speaking)
            .field("packets_played", &self.packets_played)
            .field("prepared_packet", &self.prepared_packet.as_ref().map(Vec::len))
            .finish()
    }
}

/// Live state of a voice connection's network layer.
///
/// Each variant owns exactly the sockets it needs: moving to a state which does
/// not carry a socket forward drops (and so shuts down) that socket.
pub(crate) enum NetworkingState {
    OpeningWs {
        ws: Box<dyn ControlHandle>,
    },
    Identifying {
        ws: Box<dyn ControlHandle>,
    },
    UdpHandshaking {
        ws: Box<dyn ControlHandle>,
        udp: Box<dyn MediaHandle>,
        ssrc: u32,
        mode: CryptoMode,
    },
    SelectingProtocol {
        ws: Box<dyn ControlHandle>,
        udp: Box<dyn MediaHandle>,
        ssrc: u32,
        mode: CryptoMode,
    },
    Ready {
        ws: Box<dyn ControlHandle>,
        udp: Box<dyn MediaHandle>,
        data: ConnectionData,
    },
    Resuming {
        ws: Box<dyn ControlHandle>,
        udp: Box<dyn MediaHandle>,
        data: ConnectionData,
    },
    Closed,
}

impl NetworkingState {
    pub(crate) fn status(&self) -> NetworkingStatus {
        use NetworkingState::*;
        match self {
            OpeningWs { .. } => NetworkingStatus::OpeningWs,
            Identifying { .. } => NetworkingStatus::Identifying,
            UdpHandshaking { .. } => NetworkingStatus::UdpHandshaking,
            SelectingProtocol { .. } => NetworkingStatus::SelectingProtocol,
            Ready { .. } => NetworkingStatus::Ready,
            Resuming { .. } => NetworkingStatus::Resuming,
            Closed => NetworkingStatus::Closed,
        }
    }

    pub(crate) fn ws(&self) -> Option<&dyn ControlHandle> {
        use NetworkingState::*;
        match self {
            OpeningWs { ws }
            | Identifying { ws }
            | UdpHandshaking { ws, .. }
            | SelectingProtocol { ws, .. }
            | Ready { ws, .. }
            | Resuming { ws, .. } => Some(&**ws),
            Closed => None,
        }
    }

    pub(crate) fn udp(&self) -> Option<&dyn MediaHandle> {
        use NetworkingState::*;
        match self {
            UdpHandshaking { udp, .. }
            | SelectingProtocol { udp, .. }
            | Ready { udp, .. }
            | Resuming { udp, .. } => Some(&**udp),
            _ => None,
        }
    }

    pub(crate) fn data(&self) -> Option<&ConnectionData> {
        match self {
            NetworkingState::Ready { data, .. } | NetworkingState::Resuming { data, .. } =>
                Some(data),
            _ => None,
        }
    }

    /// Sockets and session data, for states which may carry audio.
    pub(crate) fn session_mut(
        &mut self,
    ) -> Option<(&dyn ControlHandle, &dyn MediaHandle, &mut ConnectionData)> {
        match self {
            NetworkingState::Ready { ws, udp, data }
            | NetworkingState::Resuming { ws, udp, data } =>
                Some((&**ws, &**udp, data)),
            _ => None,
        }
    }

    fn owns_control(&self, id: SocketId) -> bool {
        self.ws().is_some_and(|ws| ws.id() == id)
    }

    fn owns_media(&self, id: SocketId) -> bool {
        self.udp().is_some_and(|udp| udp.id() == id)
    }
}

impl fmt::Debug for NetworkingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkingState")
            .field("status", &self.status())
            .field("ws", &self.ws().map(|ws| ws.id()))
            .field("udp", &self.udp().map(|udp| udp.id()))
            .field("data", &self.data())
            .finish()
    }
}

/// Side effects of a transition, applied by the caller to the *new* state.
#[derive(Debug)]
pub(crate) enum Effect {
    /// Send a packet over the new state's signalling socket.
    Send(GatewayEvent),
    /// Begin IP discovery over the new state's media socket.
    Discover(u32),
    /// Report an event to the owner.
    Emit(NetworkingEvent),
}

/// Everything a transition needs besides the current state.
pub(crate) struct Context {
    pub(crate) info: ConnectionInfo,
    pub(crate) url: Url,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) events: Sender<NetworkInput>,
}

impl Context {
    pub(crate) fn open_control(&self) -> Box<dyn ControlHandle> {
        self.transport
            .open_control(SocketId::next(), self.url.clone(), self.events.clone())
    }

    fn open_media(&self, remote: SocketAddr) -> Result<Box<dyn MediaHandle>> {
        self.transport
            .open_media(SocketId::next(), remote, self.events.clone())
    }

    fn identify(&self) -> GatewayEvent {
        GatewayEvent::from(Identify {
            server_id: self.info.guild_id.into(),
            session_id: self.info.session_id.clone(),
            token: self.info.token.clone(),
            user_id: self.info.user_id.into(),
        })
    }

    fn resume(&self) -> GatewayEvent {
        GatewayEvent::from(Resume {
            server_id: self.info.guild_id.into(),
            session_id: self.info.session_id.clone(),
            token: self.info.token.clone(),
        })
    }
}

/// Computes the state following `input`, and the effects which must be applied to it.
///
/// Sockets which are not carried into the returned state are dropped here.
pub(crate) fn step(
    state: NetworkingState,
    input: NetworkInput,
    ctx: &Context,
) -> (NetworkingState, Vec<Effect>) {
    use NetworkingState::*;

    match input {
        NetworkInput::Destroy => (Closed, vec![]),
        NetworkInput::Control(id, _) if !state.owns_control(id) => {
            trace!("Ignoring event from stale signalling socket {:?}.", id);
            (state, vec![])
        },
        NetworkInput::Media(id, _) if !state.owns_media(id) => {
            trace!("Ignoring event from stale media socket {:?}.", id);
            (state, vec![])
        },
        NetworkInput::Control(_, event) => on_control(state, event, ctx),
        NetworkInput::Media(_, event) => on_media(state, event, ctx),
    }
}

fn closed_with(code: Option<u16>, error: Option<Error>) -> (NetworkingState, Vec<Effect>) {
    let mut effects = vec![];
    if let Some(e) = error {
        effects.push(Effect::Emit(NetworkingEvent::Error(Arc::new(e))));
    }
    effects.push(Effect::Emit(NetworkingEvent::Close(code)));

    (NetworkingState::Closed, effects)
}

fn on_control(
    state: NetworkingState,
    event: ControlEvent,
    ctx: &Context,
) -> (NetworkingState, Vec<Effect>) {
    use NetworkingState::*;

    match (state, event) {
        (OpeningWs { ws }, ControlEvent::Open) =>
            (Identifying { ws }, vec![Effect::Send(ctx.identify())]),
        (s @ Resuming { .. }, ControlEvent::Open) => (s, vec![Effect::Send(ctx.resume())]),
        (Identifying { ws }, ControlEvent::Packet(GatewayEvent::Ready(ready))) =>
            on_ready_packet(ws, &ready, ctx),
        (
            SelectingProtocol {
                ws,
                udp,
                ssrc,
                mode,
            },
            ControlEvent::Packet(GatewayEvent::SessionDescription(desc)),
        ) => match session_data(ssrc, mode, &desc) {
            Ok(data) => (Ready { ws, udp, data }, vec![]),
            Err(e) => closed_with(None, Some(e)),
        },
        (Resuming { ws, udp, mut data }, ControlEvent::Packet(GatewayEvent::Resumed)) => {
            data.speaking = false;
            (Ready { ws, udp, data }, vec![])
        },
        (Ready { udp, data, .. } | Resuming { udp, data, .. }, ControlEvent::Closed(code)) =>
            if code == Some(CLOSE_CODE_DISCONNECTED) {
                closed_with(code, None)
            } else {
                debug!("Signalling socket closed ({:?}), resuming.", code);
                let ws = ctx.open_control();
                (Resuming { ws, udp, data }, vec![])
            },
        (_, ControlEvent::Closed(code)) => closed_with(code, None),
        (s, ControlEvent::Packet(packet)) => {
            trace!("Received other websocket data: {:?}", packet);
            (s, vec![])
        },
        (s, ControlEvent::Open) => (s, vec![]),
    }
}

fn on_ready_packet(
    ws: Box<dyn ControlHandle>,
    ready: &ReadyPayload,
    ctx: &Context,
) -> (NetworkingState, Vec<Effect>) {
    let mode = match crypto::choose_mode(ready.modes.as_slice()) {
        Ok(mode) => mode,
        Err(e) => return closed_with(None, Some(e)),
    };

    match ctx.open_media(SocketAddr::new(ready.ip, ready.port)) {
        Ok(udp) => (
            NetworkingState::UdpHandshaking {
                ws,
                udp,
                ssrc: ready.ssrc,
                mode,
            },
            vec![Effect::Discover(ready.ssrc)],
        ),
        Err(e) => closed_with(None, Some(e)),
    }
}

fn session_data(ssrc: u32, mode: CryptoMode, desc: &SessionDescription) -> Result<ConnectionData> {
    if desc.mode != mode.to_request_str() {
        return Err(Error::CryptoModeInvalid);
    }

    let cipher = crypto::cipher_from_key(&desc.secret_key)?;

    Ok(ConnectionData::new(ssrc, mode, cipher))
}

fn on_media(
    state: NetworkingState,
    event: MediaEvent,
    ctx: &Context,
) -> (NetworkingState, Vec<Effect>) {
    use NetworkingState::*;

    match (state, event) {
        (
            UdpHandshaking {
                ws,
                udp,
                ssrc,
                mode,
            },
            MediaEvent::Discovered(address, port),
        ) => {
            let select = GatewayEvent::from(SelectProtocol {
                protocol: "udp".into(),
                data: ProtocolData {
                    address,
                    mode: mode.to_request_str().into(),
                    port,
                },
            });
            (
                SelectingProtocol {
                    ws,
                    udp,
                    ssrc,
                    mode,
                },
                vec![Effect::Send(select)],
            )
        },
        (Ready { udp, data, .. }, MediaEvent::Closed) => {
            warn!("Media socket closed, resuming.");
            let ws = ctx.open_control();
            (Resuming { ws, udp, data }, vec![])
        },
        (UdpHandshaking { .. } | SelectingProtocol { .. }, MediaEvent::Closed) =>
            closed_with(None, Some(Error::AttemptDiscarded)),
        (s, MediaEvent::Message(bytes)) => {
            trace!("Ignoring {}B inbound datagram.", bytes.len());
            (s, vec![])
        },
        (s, _) => (s, vec![]),
    }
}
