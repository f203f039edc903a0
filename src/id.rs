//! Newtypes around Discord IDs, decoupling callers from any one gateway library.

use crate::model::id::{GuildId as DriverGuild, UserId as DriverUser};
use std::fmt::{Display, Formatter, Result as FmtResult};

macro_rules! impl_id {
    ($Id:ident) => {
        impl $Id {
            /// Returns the u64 representation of this Id.
            #[must_use]
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $Id {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                Display::fmt(&self.0, f)
            }
        }
    };
}

/// ID of a Discord voice/text channel.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ChannelId(pub u64);

/// ID of a Discord guild (colloquially, "server").
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct GuildId(pub u64);

/// ID of a Discord user.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct UserId(pub u64);

impl_id! {ChannelId}
impl_id! {GuildId}
impl_id! {UserId}

impl From<GuildId> for DriverGuild {
    fn from(id: GuildId) -> Self {
        Self(id.get())
    }
}

impl From<UserId> for DriverUser {
    fn from(id: UserId) -> Self {
        Self(id.get())
    }
}
