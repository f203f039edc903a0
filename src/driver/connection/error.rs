//! Connection errors and convenience types.

use crate::ws::Error as WsError;
use crypto_secretbox::{cipher::InvalidLength, Error as CryptoError};
use serde_json::Error as JsonError;
use std::{error::Error as StdError, fmt, io::Error as IoError};

/// Errors encountered while connecting to, or sending over, a Discord voice server.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The socket performing an operation was replaced or shut down before it completed.
    AttemptDiscarded,
    /// An error occurred during [en/de]cryption of voice packets or key generation.
    Crypto(CryptoError),
    /// The secret key sent by the server had an invalid length.
    InvalidLength(InvalidLength),
    /// Server did not return the expected crypto mode during negotiation.
    CryptoModeInvalid,
    /// None of the server's offered crypto modes are supported.
    CryptoModeUnavailable,
    /// An indicator that an endpoint URL was invalid.
    EndpointUrl,
    /// Discord failed to correctly respond to IP discovery.
    IllegalDiscoveryResponse,
    /// Could not parse Discord's view of our IP.
    IllegalIp,
    /// Miscellaneous I/O error.
    Io(IoError),
    /// JSON (de)serialization error.
    Json(JsonError),
    /// Error communicating with gateway server over WebSocket.
    Ws(WsError),
    /// An audio packet was prepared or sent while no session was established.
    NotReady,
}

/// Classes of failure which determine how each error is recovered from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorCategory {
    /// Malformed or unexpected protocol data. Never retried.
    Protocol,
    /// A socket failed. Recoverable by resuming or rejoining.
    Transport,
    /// The operation was not valid in the connection's current state.
    State,
}

impl Error {
    /// Classifies this error by its recovery strategy.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        use Error::*;
        match self {
            Crypto(_)
            | InvalidLength(_)
            | CryptoModeInvalid
            | CryptoModeUnavailable
            | EndpointUrl
            | IllegalDiscoveryResponse
            | IllegalIp
            | Json(_) => ErrorCategory::Protocol,
            AttemptDiscarded | Io(_) | Ws(_) => ErrorCategory::Transport,
            NotReady => ErrorCategory::State,
        }
    }

    /// Indicates whether a caller should attempt to rejoin the voice channel
    /// after this failure.
    #[must_use]
    pub fn should_rejoin(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Error::Crypto(e)
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Error {
        Error::Io(e)
    }
}

impl From<JsonError> for Error {
    fn from(e: JsonError) -> Error {
        Error::Json(e)
    }
}

impl From<WsError> for Error {
    fn from(e: WsError) -> Error {
        Error::Ws(e)
    }
}

impl From<InvalidLength> for Error {
    fn from(value: InvalidLength) -> Self {
        Error::InvalidLength(value)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "voice connection failure: ")?;
        use Error::*;
        match self {
            AttemptDiscarded => write!(f, "socket was replaced or closed mid-operation"),
            Crypto(e) => e.fmt(f),
            InvalidLength(e) => e.fmt(f),
            CryptoModeInvalid => write!(f, "server changed negotiated encryption mode"),
            CryptoModeUnavailable => write!(f, "server offered no supported encryption mode"),
            EndpointUrl => write!(f, "endpoint URL received from gateway was invalid"),
            IllegalDiscoveryResponse => write!(f, "IP discovery/NAT punching response was invalid"),
            IllegalIp => write!(f, "IP discovery/NAT punching response had bad IP value"),
            Io(e) => e.fmt(f),
            Json(e) => e.fmt(f),
            Ws(e) => write!(f, "websocket issue ({e:?})."),
            NotReady => write!(f, "no established session to send audio over"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Crypto(e) => e.source(),
            Error::InvalidLength(v) => v.source(),
            Error::Io(e) => e.source(),
            Error::Json(e) => e.source(),
            _ => None,
        }
    }
}

/// Convenience type for Discord voice connection error handling.
pub type Result<T> = std::result::Result<T, Error>;
