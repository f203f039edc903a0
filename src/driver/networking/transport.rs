use super::{NetworkInput, SocketId};
use crate::driver::{
    connection::error::Result,
    control::{ControlHandle, ControlSocket},
    media::{MediaHandle, MediaSocket},
};
use flume::Sender;
use std::net::SocketAddr;
use url::Url;

/// Source of signalling and media sockets for a [`Networking`] instance.
///
/// Every socket raises its events into `events`, tagged with its `id`.
///
/// [`Networking`]: super::Networking
pub trait Transport: Send + Sync {
    /// Opens a WebSocket to `url`. Connection failure is reported through
    /// [`ControlEvent::Closed`].
    ///
    /// [`ControlEvent::Closed`]: crate::driver::ControlEvent::Closed
    fn open_control(
        &self,
        id: SocketId,
        url: Url,
        events: Sender<NetworkInput>,
    ) -> Box<dyn ControlHandle>;

    /// Binds a UDP socket connected to `remote`.
    fn open_media(
        &self,
        id: SocketId,
        remote: SocketAddr,
        events: Sender<NetworkInput>,
    ) -> Result<Box<dyn MediaHandle>>;
}

/// Real sockets, driven by tasks on the current tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTransport;

impl Transport for TokioTransport {
    fn open_control(
        &self,
        id: SocketId,
        url: Url,
        events: Sender<NetworkInput>,
    ) -> Box<dyn ControlHandle> {
        Box::new(ControlSocket::open(id, url, events))
    }

    fn open_media(
        &self,
        id: SocketId,
        remote: SocketAddr,
        events: Sender<NetworkInput>,
    ) -> Result<Box<dyn MediaHandle>> {
        Ok(Box::new(MediaSocket::open(id, remote, events)?))
    }
}
