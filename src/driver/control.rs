//! WebSocket signalling channel: opcode framing, heartbeating and lifecycle events.

use super::networking::{NetworkInput, SocketId};
use crate::{
    constants::HEARTBEAT_MISS_LIMIT,
    model::{payload::Heartbeat as HeartbeatPayload, Event as GatewayEvent},
    ws::{Error as WsError, WsStream},
};
use flume::{Receiver, Sender};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::{
    select,
    time::{sleep_until, Instant},
};
use tracing::{debug, instrument, trace, warn};
use url::Url;

/// Lifecycle and data events raised by a signalling socket.
#[derive(Debug)]
#[non_exhaustive]
pub enum ControlEvent {
    /// The WebSocket handshake completed.
    Open,
    /// A gateway packet arrived.
    Packet(GatewayEvent),
    /// The socket closed, carrying the server's close code verbatim if one was sent.
    ///
    /// Heartbeat expiry and transport failures close without a code.
    Closed(Option<u16>),
}

/// Owner's view of a live signalling socket.
///
/// Dropping the handle shuts the socket down without raising [`ControlEvent::Closed`].
pub trait ControlHandle: Send {
    /// Identity of this socket, attached to each event it raises.
    fn id(&self) -> SocketId;

    /// Serialises and sends a gateway packet.
    ///
    /// Packets sent before [`ControlEvent::Open`] are queued.
    fn send_packet(&self, packet: GatewayEvent);
}

pub(crate) enum ControlMessage {
    Send(GatewayEvent),
    Poison,
}

/// Handle to a signalling socket driven by a tokio task.
pub struct ControlSocket {
    id: SocketId,
    tx: Sender<ControlMessage>,
}

impl ControlSocket {
    /// Spawns a task connecting to `url`, forwarding its events into `events`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(id: SocketId, url: Url, events: Sender<NetworkInput>) -> Self {
        let (tx, rx) = flume::unbounded();

        tokio::spawn(runner(id, url, rx, events));

        Self { id, tx }
    }
}

impl ControlHandle for ControlSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send_packet(&self, packet: GatewayEvent) {
        drop(self.tx.send(ControlMessage::Send(packet)));
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        drop(self.tx.send(ControlMessage::Poison));
    }
}

/// Outcome of a heartbeat timer firing.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Beat {
    /// Send a heartbeat carrying this nonce.
    Send(u64),
    /// Too many heartbeats went unacknowledged: the socket is dead.
    Expire,
}

/// Heartbeat bookkeeping, separate from any socket so that its timing rules
/// can be checked in isolation.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    pub(crate) interval: Duration,
    missed: u8,
    last_nonce: Option<u64>,
}

impl Heartbeat {
    /// `interval_ms` is the (fractional) millisecond period sent in `Hello`.
    pub(crate) fn new(interval_ms: f64) -> Self {
        Self {
            interval: Duration::from_secs_f64(interval_ms.max(1.0) / 1000.0),
            missed: 0,
            last_nonce: None,
        }
    }

    pub(crate) fn on_tick(&mut self, nonce: u64) -> Beat {
        if self.missed >= HEARTBEAT_MISS_LIMIT {
            return Beat::Expire;
        }

        self.missed += 1;
        self.last_nonce = Some(nonce);

        Beat::Send(nonce)
    }

    pub(crate) fn on_ack(&mut self, nonce: u64) {
        if let Some(sent) = self.last_nonce {
            if sent != nonce {
                warn!("Heartbeat nonce mismatch! Expected {}, saw {}.", sent, nonce);
            }
        }

        trace!("Heartbeat ACK received.");
        self.missed = 0;
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

struct ControlTask {
    id: SocketId,
    rx: Receiver<ControlMessage>,
    events: Sender<NetworkInput>,
    heartbeat: Option<Heartbeat>,
}

impl ControlTask {
    fn emit(&self, event: ControlEvent) {
        drop(self.events.send(NetworkInput::Control(self.id, event)));
    }

    /// Runs until the socket closes, returning the close code to report,
    /// or `None` if the owner hung up.
    async fn run(&mut self, ws: &mut WsStream) -> Option<Option<u16>> {
        let mut next_heartbeat = Instant::now();

        loop {
            select! {
                () = sleep_until(next_heartbeat), if self.heartbeat.is_some() => {
                    let Some(hb) = self.heartbeat.as_mut() else {
                        continue;
                    };
                    next_heartbeat += hb.interval;

                    match hb.on_tick(unix_millis()) {
                        Beat::Send(nonce) => {
                            trace!("Sending heartbeat {}.", nonce);
                            if let Err(e) = ws.send_json(&GatewayEvent::from(HeartbeatPayload { nonce })).await {
                                return Some(report_error(&e));
                            }
                        },
                        Beat::Expire => {
                            warn!("{} heartbeats went unacknowledged, closing.", HEARTBEAT_MISS_LIMIT);
                            ws.close().await;
                            return Some(None);
                        },
                    }
                },
                ws_msg = ws.recv_json() => match ws_msg {
                    Ok(Some(msg)) => {
                        match &msg {
                            GatewayEvent::Hello(h) => {
                                let hb = Heartbeat::new(h.heartbeat_interval);
                                debug!("WS heartbeat duration {:?}.", hb.interval);
                                next_heartbeat = Instant::now() + hb.interval;
                                self.heartbeat = Some(hb);
                            },
                            GatewayEvent::HeartbeatAck(ack) => {
                                if let Some(hb) = self.heartbeat.as_mut() {
                                    hb.on_ack(ack.nonce);
                                }
                            },
                            _ => {},
                        }
                        self.emit(ControlEvent::Packet(msg));
                    },
                    Ok(None) => {},
                    Err(e) => return Some(report_error(&e)),
                },
                inner_msg = self.rx.recv_async() => match inner_msg {
                    Ok(ControlMessage::Send(packet)) => {
                        if let Err(e) = ws.send_json(&packet).await {
                            return Some(report_error(&e));
                        }
                    },
                    Ok(ControlMessage::Poison) | Err(_) => {
                        ws.close().await;
                        return None;
                    },
                },
            }
        }
    }
}

fn report_error(e: &WsError) -> Option<u16> {
    let code = e.close_code();
    if code.is_none() {
        debug!("Error sending/receiving ws {:?}.", e);
    }
    code
}

#[instrument(skip(rx, events))]
pub(crate) async fn runner(
    id: SocketId,
    url: Url,
    rx: Receiver<ControlMessage>,
    events: Sender<NetworkInput>,
) {
    trace!("WS task started.");

    let mut task = ControlTask {
        id,
        rx,
        events,
        heartbeat: None,
    };

    match WsStream::connect(url).await {
        Ok(mut ws) => {
            task.emit(ControlEvent::Open);
            if let Some(code) = task.run(&mut ws).await {
                task.emit(ControlEvent::Closed(code));
            }
        },
        Err(e) => {
            warn!("Failed to open signalling socket: {:?}.", e);
            task.emit(ControlEvent::Closed(e.close_code()));
        },
    }

    trace!("WS task finished.");
}
