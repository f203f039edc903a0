//! UDP media channel: IP discovery, keepalives and raw datagram passthrough.

use super::{
    connection::error::{Error, Result},
    networking::{NetworkInput, SocketId},
};
use crate::constants::*;
use byteorder::{ByteOrder, LittleEndian};
use discortp::discord::{IpDiscoveryPacket, IpDiscoveryType, MutableIpDiscoveryPacket};
use flume::{Receiver, Sender};
use std::{
    io::ErrorKind,
    net::{IpAddr, SocketAddr, UdpSocket as StdUdpSocket},
    num::Wrapping,
    str::FromStr,
    sync::Arc,
};
use tokio::{
    net::UdpSocket,
    select,
    time::{sleep_until, Instant},
};
use tracing::{error, instrument, trace, warn};

/// Events raised by a media socket.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum MediaEvent {
    /// IP discovery completed with our externally visible address.
    Discovered(IpAddr, u16),
    /// Any other datagram received from the voice server.
    Message(Vec<u8>),
    /// The socket failed and has shut down.
    Closed,
}

/// Owner's view of a live media socket.
pub trait MediaHandle: Send {
    /// Identity of this socket, attached to each event it raises.
    fn id(&self) -> SocketId;

    /// Sends a discovery request for `ssrc`.
    ///
    /// The first valid response is raised as [`MediaEvent::Discovered`]; if the
    /// socket closes first, [`MediaEvent::Closed`] is raised instead.
    fn perform_ip_discovery(&self, ssrc: u32);

    /// Sends one datagram immediately, without blocking.
    fn send(&self, packet: &[u8]) -> Result<()>;
}

pub(crate) enum MediaMessage {
    Discover(u32),
    Poison,
}

/// Handle to a UDP socket whose keepalives and reads are driven by a tokio task.
///
/// Audio is sent synchronously from the caller's thread through a clone of the socket.
pub struct MediaSocket {
    id: SocketId,
    tx: Sender<MediaMessage>,
    udp_tx: StdUdpSocket,
}

impl MediaSocket {
    /// Binds a local socket connected to `remote` and spawns its driving task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(id: SocketId, remote: SocketAddr, events: Sender<NetworkInput>) -> Result<Self> {
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let udp_tx = StdUdpSocket::bind(bind_addr)?;
        udp_tx.connect(remote)?;
        udp_tx.set_nonblocking(true)?;

        let udp_rx = UdpSocket::from_std(udp_tx.try_clone()?)?;

        let (tx, rx) = flume::unbounded();
        tokio::spawn(runner(id, Arc::new(udp_rx), rx, events));

        Ok(Self { id, tx, udp_tx })
    }
}

impl MediaHandle for MediaSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn perform_ip_discovery(&self, ssrc: u32) {
        drop(self.tx.send(MediaMessage::Discover(ssrc)));
    }

    fn send(&self, packet: &[u8]) -> Result<()> {
        // A UDP send should only WouldBlock if we're sending more data
        // than the OS can handle.
        self.udp_tx.send(packet)?;
        Ok(())
    }
}

impl Drop for MediaSocket {
    fn drop(&mut self) {
        drop(self.tx.send(MediaMessage::Poison));
    }
}

/// Builds the 74-byte request used for IP discovery.
#[must_use]
pub fn build_discovery_request(ssrc: u32) -> [u8; IpDiscoveryPacket::const_packet_size()] {
    let mut bytes = [0; IpDiscoveryPacket::const_packet_size()];
    {
        let mut view = MutableIpDiscoveryPacket::new(&mut bytes[..]).expect(
            "FATAL: Too few bytes in 'bytes' for IPDiscovery packet.\
                (Blame: IpDiscoveryPacket::const_packet_size()?)",
        );
        view.set_pkt_type(IpDiscoveryType::Request);
        view.set_length(70);
        view.set_ssrc(ssrc);
    }
    bytes
}

/// Parses an IP discovery response into our external address and port.
pub fn parse_discovery_response(bytes: &[u8]) -> Result<(IpAddr, u16)> {
    let view = IpDiscoveryPacket::new(bytes).ok_or(Error::IllegalDiscoveryResponse)?;

    if view.get_pkt_type() != IpDiscoveryType::Response {
        return Err(Error::IllegalDiscoveryResponse);
    }

    // Find the first '\0' from the left: spoofed packets could place
    // arbitrary data after it.
    let raw = view.get_address_raw();
    let nul_byte_index = raw.iter().position(|&b| b == 0).ok_or(Error::IllegalIp)?;

    let address_str = std::str::from_utf8(&raw[..nul_byte_index]).map_err(|_| Error::IllegalIp)?;
    let address = IpAddr::from_str(address_str).map_err(|_| Error::IllegalIp)?;

    Ok((address, view.get_port()))
}

/// Builds the next keepalive: the counter, little-endian, padded out to 8 bytes.
fn next_keepalive(counter: &mut Wrapping<u32>) -> [u8; UDP_KEEPALIVE_LEN] {
    let mut ka = [0u8; UDP_KEEPALIVE_LEN];
    LittleEndian::write_u32(&mut ka[..4], counter.0);
    *counter += Wrapping(1);
    ka
}

struct MediaTask {
    id: SocketId,
    udp: Arc<UdpSocket>,
    rx: Receiver<MediaMessage>,
    events: Sender<NetworkInput>,
    keepalive_counter: Wrapping<u32>,
    discovering: bool,
}

impl MediaTask {
    fn emit(&self, event: MediaEvent) {
        drop(self.events.send(NetworkInput::Media(self.id, event)));
    }

    /// Runs until failure (`true`) or until the owner hangs up (`false`).
    async fn run(&mut self) -> bool {
        let mut buf = [0u8; VOICE_PACKET_MAX];
        let mut ka_time = Instant::now() + UDP_KEEPALIVE_GAP;

        loop {
            select! {
                () = sleep_until(ka_time) => {
                    trace!("Sending UDP Keepalive.");
                    let ka = next_keepalive(&mut self.keepalive_counter);

                    if let Err(e) = self.udp.send(&ka[..]).await {
                        error!("Fatal UDP keepalive send error: {:?}.", e);
                        return true;
                    }
                    ka_time += UDP_KEEPALIVE_GAP;
                },
                recv = self.udp.recv(&mut buf[..]) => match recv {
                    Ok(len) => self.process_datagram(&buf[..len]),
                    Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
                        warn!("UDP destination unreachable: {:?}.", e);
                    },
                    Err(e) => {
                        error!("Fatal UDP packet receive error: {:?}.", e);
                        return true;
                    },
                },
                msg = self.rx.recv_async() => match msg {
                    Ok(MediaMessage::Discover(ssrc)) => {
                        self.discovering = true;
                        if let Err(e) = self.udp.send(&build_discovery_request(ssrc)).await {
                            error!("Fatal UDP discovery send error: {:?}.", e);
                            return true;
                        }
                    },
                    Ok(MediaMessage::Poison) | Err(_) => return false,
                },
            }
        }
    }

    fn process_datagram(&mut self, bytes: &[u8]) {
        if self.discovering {
            match parse_discovery_response(bytes) {
                Ok((ip, port)) => {
                    self.discovering = false;
                    self.emit(MediaEvent::Discovered(ip, port));
                },
                Err(e) => trace!("Ignoring datagram during IP discovery: {:?}.", e),
            }
        } else {
            self.emit(MediaEvent::Message(bytes.to_vec()));
        }
    }
}

#[instrument(skip(udp, rx, events))]
pub(crate) async fn runner(
    id: SocketId,
    udp: Arc<UdpSocket>,
    rx: Receiver<MediaMessage>,
    events: Sender<NetworkInput>,
) {
    trace!("UDP task started.");

    let mut task = MediaTask {
        id,
        udp,
        rx,
        events,
        keepalive_counter: Wrapping(0),
        discovering: false,
    };

    if task.run().await {
        task.emit(MediaEvent::Closed);
    }

    trace!("UDP task finished.");
}
