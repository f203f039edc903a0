use crate::id::{ChannelId, GuildId, UserId};
use std::fmt;

/// Assembles voice server and voice state packets from the main gateway
/// into a complete [`ConnectionInfo`].
#[derive(Clone, Debug)]
pub(crate) enum ConnectionProgress {
    Complete(ConnectionInfo),
    Incomplete(Partial),
}

impl ConnectionProgress {
    pub(crate) fn new(guild_id: GuildId, user_id: UserId, channel_id: Option<ChannelId>) -> Self {
        ConnectionProgress::Incomplete(Partial {
            channel_id,
            guild_id,
            user_id,
            token: None,
            endpoint: None,
            session_id: None,
        })
    }

    pub(crate) fn info(&self) -> Option<&ConnectionInfo> {
        match self {
            Self::Complete(c) => Some(c),
            Self::Incomplete(_) => None,
        }
    }

    pub(crate) fn channel_id(&self) -> Option<ChannelId> {
        match self {
            Self::Complete(c) => c.channel_id,
            Self::Incomplete(p) => p.channel_id,
        }
    }

    /// Drops back to an incomplete state, retaining every known field.
    fn demote(&mut self) -> &mut Partial {
        if let Self::Complete(c) = self {
            let c = c.clone();
            *self = Self::Incomplete(Partial {
                channel_id: c.channel_id,
                guild_id: c.guild_id,
                user_id: c.user_id,
                token: Some(c.token),
                endpoint: Some(c.endpoint),
                session_id: Some(c.session_id),
            });
        }

        match self {
            Self::Incomplete(p) => p,
            Self::Complete(_) => unreachable!("connection progress was just demoted"),
        }
    }

    fn promote(&mut self) -> bool {
        if let Self::Incomplete(p) = self {
            if let Some(info) = p.finalise() {
                *self = Self::Complete(info);
                return true;
            }
        }

        false
    }

    /// Applies a voice state packet, returning whether a new voice connection
    /// must be negotiated.
    pub(crate) fn apply_state_update(
        &mut self,
        session_id: String,
        channel_id: Option<ChannelId>,
    ) -> bool {
        if let Self::Complete(c) = self {
            if c.channel_id == channel_id && c.session_id == session_id {
                return false;
            }
        }

        let partial = self.demote();
        if partial.channel_id != channel_id {
            // Moved to a different channel (e.g., by an admin): the old voice
            // server assignment no longer holds.
            partial.endpoint = None;
            partial.token = None;
        }
        partial.channel_id = channel_id;
        partial.session_id = Some(session_id);

        self.promote()
    }

    /// Applies a voice server packet, returning whether a new voice connection
    /// must be negotiated.
    pub(crate) fn apply_server_update(&mut self, endpoint: String, token: String) -> bool {
        if let Self::Complete(c) = self {
            if c.endpoint == endpoint && c.token == token {
                return false;
            }
        }

        let partial = self.demote();
        partial.endpoint = Some(endpoint);
        partial.token = Some(token);

        self.promote()
    }

    /// Forgets the current voice server, as happens when Discord reallocates it.
    pub(crate) fn remove_server(&mut self) {
        let partial = self.demote();
        partial.endpoint = None;
        partial.token = None;
    }
}

/// Parameters and information needed to start communicating with Discord's voice servers.
///
/// The secret `token` is never printed by the `Debug` implementation.
#[derive(Clone, Eq, Hash, PartialEq)]
pub struct ConnectionInfo {
    /// ID of the voice channel being joined, if it is known.
    pub channel_id: Option<ChannelId>,
    /// URL of the voice websocket gateway server assigned to this call.
    pub endpoint: String,
    /// ID of the target voice channel's parent guild.
    pub guild_id: GuildId,
    /// Unique string describing this session for validation/authentication purposes.
    pub session_id: String,
    /// Ephemeral secret used to validate the above session.
    pub token: String,
    /// UserID of this bot.
    pub user_id: UserId,
}

impl fmt::Debug for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionInfo")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token", &"<secret>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct Partial {
    pub channel_id: Option<ChannelId>,
    pub endpoint: Option<String>,
    pub guild_id: GuildId,
    pub session_id: Option<String>,
    pub token: Option<String>,
    pub user_id: UserId,
}

impl fmt::Debug for Partial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partial")
            .field("channel_id", &self.channel_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("session_id", &self.session_id)
            .field("token_is_some", &self.token.is_some())
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl Partial {
    fn finalise(&mut self) -> Option<ConnectionInfo> {
        self.channel_id?;

        match (&self.endpoint, &self.session_id, &self.token) {
            (Some(endpoint), Some(session_id), Some(token)) => Some(ConnectionInfo {
                channel_id: self.channel_id,
                endpoint: endpoint.clone(),
                session_id: session_id.clone(),
                token: token.clone(),
                guild_id: self.guild_id,
                user_id: self.user_id,
            }),
            _ => None,
        }
    }
}
