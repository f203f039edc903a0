//! Constants affecting voice connection, transcoding and timing behaviour.

use audiopus::{Bitrate, SampleRate};
use discortp::rtp::RtpType;
use std::time::Duration;

/// The voice gateway version used by the library.
pub const VOICE_GATEWAY_VERSION: u8 = 4;

/// Sample rate of audio to be sent to Discord.
pub const SAMPLE_RATE: SampleRate = SampleRate::Hz48000;

/// Sample rate of audio to be sent to Discord.
pub const SAMPLE_RATE_RAW: usize = 48_000;

/// Number of audio frames/packets to be sent per second.
pub const AUDIO_FRAME_RATE: usize = 50;

/// Length of time between any two audio frames.
pub const TIMESTEP_LENGTH: Duration = Duration::from_millis(1000 / AUDIO_FRAME_RATE as u64);

/// Default bitrate for audio.
pub const DEFAULT_BITRATE: Bitrate = Bitrate::BitsPerSecond(128_000);

/// Number of samples in one complete frame of audio per channel.
///
/// This is equally the number of stereo (joint) samples in an audio frame,
/// and the amount the RTP timestamp advances with each packet.
pub const MONO_FRAME_SIZE: usize = SAMPLE_RATE_RAW / AUDIO_FRAME_RATE;

/// Number of individual samples in one complete frame of stereo audio.
pub const STEREO_FRAME_SIZE: usize = 2 * MONO_FRAME_SIZE;

/// Number of bytes in one complete frame of raw `i16`-encoded stereo audio.
pub const STEREO_FRAME_BYTE_SIZE: usize = STEREO_FRAME_SIZE * std::mem::size_of::<i16>();

/// Length (in milliseconds) of any audio frame.
pub const FRAME_LEN_MS: usize = 1000 / AUDIO_FRAME_RATE;

/// Maximum packet size for a voice packet.
///
/// Set a safe amount below the Ethernet MTU to avoid fragmentation/rejection.
pub const VOICE_PACKET_MAX: usize = 1460;

/// Size of the RTP header preceding every voice packet.
pub const RTP_HEADER_LEN: usize = 12;

/// Delay between sends of UDP keepalive frames.
///
/// Passive monitoring of Discord itself shows that these fire every 5 seconds
/// irrespective of outgoing UDP traffic.
pub const UDP_KEEPALIVE_GAP: Duration = Duration::from_secs(5);

/// Size of a UDP keepalive datagram.
pub const UDP_KEEPALIVE_LEN: usize = 8;

/// Number of consecutive unacknowledged heartbeats after which a signalling
/// socket is considered dead.
pub const HEARTBEAT_MISS_LIMIT: u8 = 3;

/// Number of times a session is signalled again after failing, before the
/// failure is treated as fatal.
pub const REJOIN_ATTEMPTS: u32 = 2;

/// Close code sent by Discord when the session has been deliberately ended
/// (kicked, moved by an admin, or channel deleted). Never resumed.
pub const CLOSE_CODE_DISCONNECTED: u16 = 4014;

/// Opus silent frame, used to signal speech start and end (and prevent audio glitching).
pub const SILENT_FRAME: [u8; 3] = [0xf8, 0xff, 0xfe];

/// Number of silent frames sent after a track's audio runs out.
pub const SILENCE_PADDING_FRAMES: u8 = 5;

/// The one (and only) RTP version.
pub const RTP_VERSION: u8 = 2;

/// Profile type used by Discord's Opus audio traffic.
pub const RTP_PROFILE_TYPE: RtpType = RtpType::Dynamic(120);

/// Maximum size of a single encoded Opus frame.
pub const OPUS_FRAME_MAX: usize = 1275;
