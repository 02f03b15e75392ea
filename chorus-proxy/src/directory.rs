//! Cached channels and guilds
//!
//! Channel and guild snapshots are cached for a short time. The cache is
//! advisory: callers that need the current state (edit handling) ask for a
//! fresh read.

use dashmap::{DashMap, DashSet};
use std::time::{Duration, Instant};
use tracing::debug;

use chorus_core::{compute_permissions, BotToken, ChannelInfo, GuildInfo, Permissions, Snowflake};
use chorus_http::PlatformError;

use crate::SharedPlatform;

/// Threads nest one level; categories one more
const MAX_ANCESTRY: usize = 3;

struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

pub struct ChannelDirectory {
    platform: SharedPlatform,
    token: BotToken,
    ttl: Duration,
    channels: DashMap<Snowflake, Cached<ChannelInfo>>,
    guilds: DashMap<Snowflake, Cached<GuildInfo>>,
    known_emoji: DashSet<Snowflake>,
}

impl ChannelDirectory {
    pub fn new(platform: SharedPlatform, token: BotToken, ttl: Duration) -> Self {
        Self {
            platform,
            token,
            ttl,
            channels: DashMap::new(),
            guilds: DashMap::new(),
            known_emoji: DashSet::new(),
        }
    }

    pub async fn channel(&self, channel_id: Snowflake) -> Result<ChannelInfo, PlatformError> {
        if let Some(cached) = self.channels.get(&channel_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }
        self.fresh_channel(channel_id).await
    }

    /// Bypass the cache
    pub async fn fresh_channel(&self, channel_id: Snowflake) -> Result<ChannelInfo, PlatformError> {
        let channel = self.platform.get_channel(&self.token, channel_id).await?;
        self.channels.insert(
            channel_id,
            Cached {
                value: channel.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(channel)
    }

    pub fn invalidate_channel(&self, channel_id: Snowflake) {
        self.channels.remove(&channel_id);
    }

    pub async fn guild(&self, guild_id: Snowflake) -> Result<GuildInfo, PlatformError> {
        if let Some(cached) = self.guilds.get(&guild_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }
        let guild = self.platform.get_guild(&self.token, guild_id).await?;
        for emoji in &guild.emojis {
            self.known_emoji.insert(emoji.id);
        }
        self.guilds.insert(
            guild_id,
            Cached {
                value: guild.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(guild)
    }

    /// The channel followed by its parents, nearest first
    pub async fn ancestry(&self, channel_id: Snowflake) -> Result<Vec<Snowflake>, PlatformError> {
        let mut chain = vec![channel_id];
        let mut current = self.channel(channel_id).await?;
        while let Some(parent) = current.parent_id {
            if chain.len() >= MAX_ANCESTRY || chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = self.channel(parent).await?;
        }
        Ok(chain)
    }

    /// Channel a relay endpoint lives in, plus the thread to post into
    pub async fn relay_channel(&self, channel_id: Snowflake) -> Result<(Snowflake, Option<Snowflake>), PlatformError> {
        let channel = self.channel(channel_id).await?;
        match channel.parent_id.filter(|_| channel.is_thread()) {
            Some(parent) => Ok((parent, Some(channel_id))),
            None => Ok((channel_id, None)),
        }
    }

    /// Effective permissions of `user_id` in `channel_id`. Threads use their
    /// parent's overwrites. Member roles are fetched when not supplied.
    pub async fn permissions(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        user_id: Snowflake,
        roles: Option<&[Snowflake]>,
    ) -> Result<Permissions, PlatformError> {
        let guild = self.guild(guild_id).await?;
        let (base, _) = self.relay_channel(channel_id).await?;
        let channel = self.channel(base).await?;

        let fetched;
        let roles = match roles {
            Some(roles) => roles,
            None => {
                fetched = self
                    .platform
                    .get_guild_member(&self.token, guild_id, user_id)
                    .await?
                    .roles;
                &fetched[..]
            }
        };

        let permissions = compute_permissions(&guild, &channel, user_id, roles);
        debug!("Permissions of {} in {}: {}", user_id, channel_id, permissions);
        Ok(permissions)
    }

    /// Whether a custom emoji belongs to a guild the service can see
    pub fn is_known_emoji(&self, emoji_id: Snowflake) -> bool {
        self.known_emoji.contains(&emoji_id)
    }
}
