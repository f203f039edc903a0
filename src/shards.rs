//! Adapter for sending voice state updates over a main gateway connection.

use crate::{error::JoinResult, id::*};
use async_trait::async_trait;

/// Trait for a generic shard handle to send voice state updates to Discord.
///
/// Implemented by whichever library owns the bot's connection to Discord's
/// main gateway.
#[async_trait]
pub trait VoiceUpdate {
    /// Send a voice update message to the inner shard handle.
    ///
    /// A `channel_id` of `None` leaves the current voice channel.
    async fn update_voice_state(
        &self,
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        self_deaf: bool,
        self_mute: bool,
    ) -> JoinResult<()>;

    /// Called once the owning voice connection is destroyed, so that the adapter
    /// can stop forwarding voice packets for this guild.
    fn destroy(&self) {}
}
