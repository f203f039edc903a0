//! Runner for a voice connection.
//!
//! The driver is a mixed-sync system, using:
//!  * Asynchronous connection management: a signalling task and a media task per
//!  session, whose events are folded into a [`Networking`] state machine.
//!  * A synchronous [`Scheduler`] thread which, every 20ms, asks each playing
//!  session to seal and send its next audio frame.
//!
//! This splits up work according to its IO/compute bound nature, preventing packet
//! generation from being slowed down past its deadline by unrelated async work.

pub(crate) mod connection;
pub(crate) mod control;
pub(crate) mod crypto;
pub(crate) mod media;
pub mod networking;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod test_impls;

pub use self::{
    connection::{
        DisconnectReason,
        JoinConfig,
        VoiceConnection,
        VoiceConnectionStatus,
    },
    control::{ControlEvent, ControlHandle},
    crypto::CryptoMode,
    media::{MediaEvent, MediaHandle},
    networking::{
        ConnectionData,
        NetworkInput,
        Networking,
        NetworkingEvent,
        NetworkingStatus,
        SocketId,
        TokioTransport,
        Transport,
    },
    scheduler::{ScheduledTask, Scheduler, TaskId, DEFAULT_SCHEDULER},
};

#[cfg(feature = "internals")]
pub use self::crypto::{choose_mode, cipher_from_key, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
