//! Composition of a signalling socket, a media socket and an encryption context
//! into a single voice session.
//!
//! A [`Networking`] instance walks the voice gateway handshake
//! (open → identify → discover → select protocol → ready) and resumes the
//! session after recoverable socket loss. It is driven by feeding every
//! [`NetworkInput`] raised by its sockets into [`Networking::handle`].

mod state;
/// Socket sources used by [`Networking`] to open its signalling and media connections.
pub mod transport;

pub use self::{
    state::ConnectionData,
    transport::{TokioTransport, Transport},
};
pub(crate) use state::NetworkingState;

use self::state::{step, Context, Effect};
use super::{
    connection::error::{Error, Result},
    control::ControlEvent,
    media::MediaEvent,
};
use crate::{
    constants::VOICE_GATEWAY_VERSION,
    model::{payload::Speaking, Event as GatewayEvent, SpeakingState},
    ConnectionInfo,
};
use flume::Sender;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::{debug, instrument, trace, warn};
use url::Url;

/// Process-unique identity of a socket, used to discard events from
/// sockets which have since been replaced.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SocketId(pub(crate) u64);

impl SocketId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Inputs which drive a [`Networking`] state machine.
#[derive(Debug)]
#[non_exhaustive]
pub enum NetworkInput {
    /// An event raised by a signalling socket.
    Control(SocketId, ControlEvent),
    /// An event raised by a media socket.
    Media(SocketId, MediaEvent),
    /// Tear down every socket and close.
    Destroy,
}

/// Externally visible phase of a [`Networking`] instance.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum NetworkingStatus {
    /// Waiting for the signalling socket to open.
    OpeningWs,
    /// `Identify` sent, waiting for `Ready`.
    Identifying,
    /// Performing IP discovery over the media socket.
    UdpHandshaking,
    /// `SelectProtocol` sent, waiting for `SessionDescription`.
    SelectingProtocol,
    /// Audio may be sent.
    Ready,
    /// The signalling socket is being re-established. Audio may still be sent.
    Resuming,
    /// Terminal: all sockets have been released.
    Closed,
}

/// Events raised by [`Networking::handle`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum NetworkingEvent {
    /// The session changed phase.
    StateChange {
        /// Previous phase.
        from: NetworkingStatus,
        /// New phase.
        to: NetworkingStatus,
    },
    /// The handshake failed.
    Error(Arc<Error>),
    /// The session closed. Carries the signalling socket's close code, if any.
    Close(Option<u16>),
}

/// A single voice session's network layer.
pub struct Networking {
    state: NetworkingState,
    ctx: Context,
}

impl Networking {
    /// Opens a signalling socket to `info.endpoint` and begins the handshake.
    ///
    /// Every event raised by this session's sockets is sent into `events`.
    #[instrument(skip(transport, events))]
    pub fn new(
        info: ConnectionInfo,
        transport: Arc<dyn Transport>,
        events: Sender<NetworkInput>,
    ) -> Result<Self> {
        let url = generate_url(&info.endpoint)?;

        let ctx = Context {
            info,
            url,
            transport,
            events,
        };
        let ws = ctx.open_control();

        debug!("Opening signalling socket {:?}.", ws.id());

        Ok(Self {
            state: NetworkingState::OpeningWs { ws },
            ctx,
        })
    }

    /// Current phase of the session.
    #[must_use]
    pub fn status(&self) -> NetworkingStatus {
        self.state.status()
    }

    /// Negotiated session parameters, present once `Ready`.
    #[must_use]
    pub fn connection_data(&self) -> Option<&ConnectionData> {
        self.state.data()
    }

    /// Applies one input, returning the events it raised.
    pub fn handle(&mut self, input: NetworkInput) -> Vec<NetworkingEvent> {
        let from = self.state.status();
        let state = std::mem::replace(&mut self.state, NetworkingState::Closed);

        let (next, effects) = step(state, input, &self.ctx);
        self.state = next;

        let mut events = Vec::new();
        for effect in effects {
            match effect {
                Effect::Send(packet) =>
                    if let Some(ws) = self.state.ws() {
                        ws.send_packet(packet);
                    },
                Effect::Discover(ssrc) =>
                    if let Some(udp) = self.state.udp() {
                        udp.perform_ip_discovery(ssrc);
                    },
                Effect::Emit(event) => events.push(event),
            }
        }

        let to = self.state.status();
        if from != to {
            debug!("Networking state {:?} -> {:?}.", from, to);
            events.push(NetworkingEvent::StateChange { from, to });
        }

        events
    }

    /// Releases all sockets. Irreversible.
    pub fn destroy(&mut self) -> Vec<NetworkingEvent> {
        self.handle(NetworkInput::Destroy)
    }

    /// Seals an Opus frame into the session's single outbound packet slot.
    ///
    /// Only valid while `Ready` or `Resuming`. A packet which is prepared but
    /// never dispatched is overwritten by the next call.
    pub fn prepare_audio_packet(&mut self, opus: &[u8]) -> Result<()> {
        let (_, _, data) = self.state.session_mut().ok_or(Error::NotReady)?;
        data.prepare_packet(opus)
    }

    /// Sends the prepared packet, if any, and advances the RTP counters.
    ///
    /// Returns whether a packet was sent.
    pub fn dispatch_audio(&mut self) -> Result<bool> {
        let Some((ws, udp, data)) = self.state.session_mut() else {
            return Ok(false);
        };

        let Some(packet) = data.prepared_packet.take() else {
            return Ok(false);
        };

        data.advance();
        update_speaking(ws, data, true);

        trace!("Sending {}B audio packet.", packet.len());
        udp.send(&packet).map_err(|e| {
            warn!("UDP audio send failed: {:?}.", e);
            e
        })?;

        Ok(true)
    }

    /// Updates the speaking flag, sending `Speaking` only if it changed.
    pub fn set_speaking(&mut self, speaking: bool) {
        if let Some((ws, _, data)) = self.state.session_mut() {
            update_speaking(ws, data, speaking);
        }
    }
}

impl std::fmt::Debug for Networking {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Networking")
            .field("state", &self.state)
            .field("info", &self.ctx.info)
            .finish()
    }
}

fn update_speaking(
    ws: &dyn super::control::ControlHandle,
    data: &mut ConnectionData,
    speaking: bool,
) {
    if data.speaking == speaking {
        return;
    }

    data.speaking = speaking;
    debug!("Speaking: {}.", speaking);

    let state = if speaking {
        SpeakingState::MICROPHONE
    } else {
        SpeakingState::empty()
    };

    ws.send_packet(GatewayEvent::from(Speaking {
        delay: Some(0),
        speaking: state,
        ssrc: data.ssrc,
        user_id: None,
    }));
}

fn generate_url(endpoint: &str) -> Result<Url> {
    let endpoint = endpoint.strip_suffix(":80").unwrap_or(endpoint);

    Url::parse(&format!("wss://{endpoint}/?v={VOICE_GATEWAY_VERSION}")).or(Err(Error::EndpointUrl))
}
