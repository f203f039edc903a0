use crate::model::Event;

use futures::{SinkExt, StreamExt};
use serde_json::Error as JsonError;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    tungstenite::{
        error::Error as TungsteniteError,
        protocol::{CloseFrame, WebSocketConfig as Config},
        Message,
    },
    MaybeTlsStream,
    WebSocketStream,
};
use tracing::{debug, instrument};
use url::Url;

pub struct WsStream(WebSocketStream<MaybeTlsStream<TcpStream>>);

impl WsStream {
    #[instrument]
    pub(crate) async fn connect(url: Url) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async_with_config::<Url>(
            url,
            Some(Config {
                max_message_size: None,
                max_frame_size: None,
                ..Default::default()
            }),
            true,
        )
        .await?;

        Ok(Self(stream))
    }

    /// Waits for the next gateway packet.
    ///
    /// Returns `Ok(None)` for frames which carry no packet (pings, unknown JSON).
    /// Closure of the stream, with or without a close frame, is an error.
    pub(crate) async fn recv_json(&mut self) -> Result<Option<Event>> {
        match self.0.next().await {
            Some(Ok(msg)) => convert_ws_message(msg),
            Some(Err(e)) => Err(e.into()),
            None => Err(Error::WsClosed(None)),
        }
    }

    pub(crate) async fn send_json(&mut self, value: &Event) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        drop(self.0.close(None).await);
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Json(JsonError),

    /// The discord voice gateway does not support or offer zlib compression.
    /// As a result, only text messages are expected.
    UnexpectedBinaryMessage(Vec<u8>),

    Ws(TungsteniteError),

    WsClosed(Option<CloseFrame<'static>>),
}

impl Error {
    /// The close code sent by the server, if this error is a clean closure.
    pub(crate) fn close_code(&self) -> Option<u16> {
        match self {
            Error::WsClosed(Some(frame)) => Some(u16::from(frame.code)),
            _ => None,
        }
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<TungsteniteError> for Error {
    fn from(e: TungsteniteError) -> Error {
        Error::Ws(e)
    }
}

#[inline]
pub(crate) fn convert_ws_message(message: Message) -> Result<Option<Event>> {
    Ok(match message {
        Message::Text(payload) => serde_json::from_str(&payload)
            .map_err(|e| {
                debug!("Unexpected JSON: {e}. Payload: {payload}");
                e
            })
            .ok(),
        Message::Binary(bytes) => {
            return Err(Error::UnexpectedBinaryMessage(bytes));
        },
        Message::Close(frame) => {
            return Err(Error::WsClosed(frame.map(CloseFrame::into_owned)));
        },
        // Ping/Pong message behaviour is internally handled by tungstenite.
        _ => None,
    })
}
