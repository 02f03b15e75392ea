//! Channels, guilds and permission computation

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

use crate::snowflake::{as_str, option_str};
use crate::Snowflake;

/// Permission bit set. Travels as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);
    pub const ADMINISTRATOR: Permissions = Permissions(1 << 3);
    pub const VIEW_CHANNEL: Permissions = Permissions(1 << 10);
    pub const SEND_MESSAGES: Permissions = Permissions(1 << 11);
    pub const MANAGE_MESSAGES: Permissions = Permissions(1 << 13);
    pub const EMBED_LINKS: Permissions = Permissions(1 << 14);
    pub const ATTACH_FILES: Permissions = Permissions(1 << 15);
    pub const READ_MESSAGE_HISTORY: Permissions = Permissions(1 << 16);
    pub const USE_EXTERNAL_EMOJIS: Permissions = Permissions(1 << 18);
    pub const MANAGE_WEBHOOKS: Permissions = Permissions(1 << 29);
    pub const SEND_MESSAGES_IN_THREADS: Permissions = Permissions(1 << 38);

    /// What the relay path needs from the service bot
    pub const RELAY_REQUIRED: Permissions = Permissions(
        Self::VIEW_CHANNEL.0 | Self::SEND_MESSAGES.0 | Self::MANAGE_MESSAGES.0 | Self::MANAGE_WEBHOOKS.0,
    );

    /// What the persona bot path needs from the persona bot
    pub const PERSONA_BOT_REQUIRED: Permissions =
        Permissions(Self::VIEW_CHANNEL.0 | Self::SEND_MESSAGES.0);

    const NAMED: [(Permissions, &'static str); 10] = [
        (Self::ADMINISTRATOR, "ADMINISTRATOR"),
        (Self::VIEW_CHANNEL, "VIEW_CHANNEL"),
        (Self::SEND_MESSAGES, "SEND_MESSAGES"),
        (Self::MANAGE_MESSAGES, "MANAGE_MESSAGES"),
        (Self::EMBED_LINKS, "EMBED_LINKS"),
        (Self::ATTACH_FILES, "ATTACH_FILES"),
        (Self::READ_MESSAGE_HISTORY, "READ_MESSAGE_HISTORY"),
        (Self::USE_EXTERNAL_EMOJIS, "USE_EXTERNAL_EMOJIS"),
        (Self::MANAGE_WEBHOOKS, "MANAGE_WEBHOOKS"),
        (Self::SEND_MESSAGES_IN_THREADS, "SEND_MESSAGES_IN_THREADS"),
    ];

    pub const fn all() -> Permissions {
        Permissions(u64::MAX)
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits of `required` that are not set
    pub fn missing(self, required: Permissions) -> Permissions {
        Permissions(required.0 & !self.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Permissions {
    type Output = Permissions;
    fn bitor(self, rhs: Self) -> Self::Output {
        Permissions(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permissions {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permissions {
    type Output = Permissions;
    fn bitand(self, rhs: Self) -> Self::Output {
        Permissions(self.0 & rhs.0)
    }
}

impl Not for Permissions {
    type Output = Permissions;
    fn not(self) -> Self::Output {
        Permissions(!self.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            f.write_str(&names.join(" | "))
        }
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BitsVisitor;

        impl Visitor<'_> for BitsVisitor {
            type Value = Permissions;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a permission bit set")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<Permissions, E> {
                Ok(Permissions(value))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Permissions, E> {
                value
                    .parse()
                    .map(Permissions)
                    .map_err(|_| E::invalid_value(de::Unexpected::Str(value), &self))
            }
        }

        deserializer.deserialize_any(BitsVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overwrite {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    /// 0 = role, 1 = member
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub allow: Permissions,
    #[serde(default)]
    pub deny: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(default)]
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default, with = "option_str")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, with = "option_str")]
    pub parent_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub permission_overwrites: Vec<Overwrite>,
    #[serde(default, with = "option_str")]
    pub last_message_id: Option<Snowflake>,
}

impl ChannelInfo {
    /// Announcement, public and private threads
    pub fn is_thread(&self) -> bool {
        matches!(self.kind, 10..=12)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildEmoji {
    #[serde(with = "as_str")]
    pub id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(with = "as_str")]
    pub owner_id: Snowflake,
    #[serde(default)]
    pub premium_tier: u8,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub emojis: Vec<GuildEmoji>,
}

/// Effective permissions of a guild member in `channel`.
///
/// For threads pass the parent channel: threads inherit its overwrites.
pub fn compute_permissions(
    guild: &GuildInfo,
    channel: &ChannelInfo,
    user_id: Snowflake,
    member_roles: &[Snowflake],
) -> Permissions {
    if guild.owner_id == user_id {
        return Permissions::all();
    }

    let role_bits = |id: Snowflake| {
        guild
            .roles
            .iter()
            .find(|role| role.id == id)
            .map(|role| role.permissions)
    };

    // the @everyone role shares the guild id
    let mut permissions = role_bits(guild.id).unwrap_or_default();
    for role_id in member_roles {
        permissions |= role_bits(*role_id).unwrap_or_default();
    }

    if permissions.contains(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    let overwrite = |id: Snowflake| channel.permission_overwrites.iter().find(|o| o.id == id);

    if let Some(everyone) = overwrite(guild.id) {
        permissions = (permissions & !everyone.deny) | everyone.allow;
    }

    let mut allow = Permissions::NONE;
    let mut deny = Permissions::NONE;
    for role_id in member_roles {
        if let Some(role) = overwrite(*role_id) {
            allow |= role.allow;
            deny |= role.deny;
        }
    }
    permissions = (permissions & !deny) | allow;

    if let Some(member) = channel
        .permission_overwrites
        .iter()
        .find(|o| o.kind == 1 && o.id == user_id)
    {
        permissions = (permissions & !member.deny) | member.allow;
    }

    permissions
}
