//! Relay Registry
//!
//! Finds, creates and heals the relay endpoint each channel is proxied
//! through. The platform is the source of truth: the local cache only saves
//! a listing, every entry is re-validated once older than the probe interval
//! and again whenever a use fails. Replicas may race on the same channel, so
//! deletes treat "already gone" as success and every mutation is followed by
//! a fresh listing that converges on the lowest live endpoint id.

use dashmap::DashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use chorus_core::{BotToken, Snowflake};
use chorus_http::{PlatformError, Webhook};

use crate::{ChannelDirectory, SharedPlatform};
use std::sync::Arc;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Relay endpoint for channel {0} could not be established")]
    Unavailable(Snowflake),
}

/// An endpoint we can execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayEndpoint {
    pub id: Snowflake,
    pub secret: String,
    pub channel_id: Snowflake,
}

/// Where to post a message for a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub endpoint: RelayEndpoint,
    /// Set when posting into a thread of `endpoint.channel_id`
    pub thread_id: Option<Snowflake>,
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Name given to endpoints we create
    pub relay_name: String,
    /// Cached entries older than this are probed before use
    pub probe_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            relay_name: "Chorus".to_string(),
            probe_interval: Duration::from_secs(60),
        }
    }
}

/// Listings a reconcile may take before giving up
const RECONCILE_ROUNDS: usize = 4;

struct CachedEndpoint {
    endpoint: RelayEndpoint,
    checked_at: Instant,
}

pub struct RelayRegistry {
    platform: SharedPlatform,
    directory: Arc<ChannelDirectory>,
    token: BotToken,
    application_id: Snowflake,
    config: RegistryConfig,
    cache: DashMap<Snowflake, CachedEndpoint>,
}

impl RelayRegistry {
    pub fn new(
        platform: SharedPlatform,
        directory: Arc<ChannelDirectory>,
        token: BotToken,
        application_id: Snowflake,
        config: RegistryConfig,
    ) -> Self {
        Self {
            platform,
            directory,
            token,
            application_id,
            config,
            cache: DashMap::new(),
        }
    }

    /// A live endpoint for `channel_id`, creating one when absent. Threads
    /// resolve to their parent channel.
    pub async fn get_or_create(&self, channel_id: Snowflake) -> Result<RelayTarget, RegistryError> {
        let (base, thread_id) = self.directory.relay_channel(channel_id).await?;
        let endpoint = self.endpoint_for(base).await?;
        Ok(RelayTarget { endpoint, thread_id })
    }

    /// Forget the cached endpoint of `channel_id` (or of its parent)
    pub fn invalidate(&self, channel_id: Snowflake) {
        self.cache.remove(&channel_id);
    }

    /// Replace an endpoint that failed in use and return a fresh target
    pub async fn heal(&self, channel_id: Snowflake, dead: &RelayEndpoint) -> Result<RelayTarget, RegistryError> {
        warn!(
            "Relay endpoint {} in channel {} failed in use, replacing",
            dead.id, dead.channel_id
        );
        self.invalidate(dead.channel_id);
        self.delete_quietly(dead.id).await?;
        self.get_or_create(channel_id).await
    }

    /// The cached endpoint for a channel without validating it
    pub fn cached(&self, channel_id: Snowflake) -> Option<RelayEndpoint> {
        self.cache.get(&channel_id).map(|entry| entry.endpoint.clone())
    }

    async fn endpoint_for(&self, channel_id: Snowflake) -> Result<RelayEndpoint, RegistryError> {
        let cached = self
            .cache
            .get(&channel_id)
            .map(|entry| (entry.endpoint.clone(), entry.checked_at.elapsed()));

        if let Some((endpoint, age)) = cached {
            if age < self.config.probe_interval {
                return Ok(endpoint);
            }
            match self.probe(&endpoint).await {
                Ok(true) => {
                    self.remember(endpoint.clone());
                    return Ok(endpoint);
                }
                Ok(false) => {
                    info!("Cached relay endpoint {} in {} is dead", endpoint.id, channel_id);
                    self.invalidate(channel_id);
                    self.delete_quietly(endpoint.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let endpoint = self.reconcile(channel_id).await?;
        self.remember(endpoint.clone());
        Ok(endpoint)
    }

    /// Live-check an endpoint. `Ok(false)` when it is gone or rotated.
    async fn probe(&self, endpoint: &RelayEndpoint) -> Result<bool, PlatformError> {
        match self
            .platform
            .get_webhook_with_token(endpoint.id, &endpoint.secret)
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.is_stale_endpoint() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Endpoints in `channel_id` we created and can execute, lowest id first
    async fn canonical(&self, channel_id: Snowflake) -> Result<Vec<RelayEndpoint>, PlatformError> {
        let hooks = self.platform.channel_webhooks(&self.token, channel_id).await?;
        let mut owned: Vec<RelayEndpoint> = hooks
            .into_iter()
            .filter(|hook| hook.kind == 1 && hook.application_id == Some(self.application_id))
            .filter_map(|hook| as_endpoint(hook, channel_id))
            .collect();
        owned.sort_by_key(|endpoint| endpoint.id);
        Ok(owned)
    }

    /// Probe the listing lowest id first, keep the first live endpoint and
    /// delete the rest. Returns the survivor and whether anything was deleted.
    async fn settle(&self, channel_id: Snowflake) -> Result<(Option<RelayEndpoint>, bool), RegistryError> {
        let mut mutated = false;
        let mut chosen = None;

        for endpoint in self.canonical(channel_id).await? {
            if chosen.is_some() {
                info!("Reaping duplicate relay endpoint {} in {}", endpoint.id, channel_id);
                self.delete_quietly(endpoint.id).await?;
                mutated = true;
                continue;
            }
            if self.probe(&endpoint).await? {
                chosen = Some(endpoint);
            } else {
                info!("Deleting dead relay endpoint {} in {}", endpoint.id, channel_id);
                self.delete_quietly(endpoint.id).await?;
                mutated = true;
            }
        }
        Ok((chosen, mutated))
    }

    /// Settle the channel until a listing needs no changes; another replica
    /// may create or delete endpoints between our listings.
    async fn reconcile(&self, channel_id: Snowflake) -> Result<RelayEndpoint, RegistryError> {
        for round in 0..RECONCILE_ROUNDS {
            match self.settle(channel_id).await? {
                (Some(endpoint), false) => return Ok(endpoint),
                (Some(_), true) => debug!("Relisting relay endpoints in {} (round {})", channel_id, round),
                (None, _) => {
                    let hook = self
                        .platform
                        .create_webhook(&self.token, channel_id, &self.config.relay_name)
                        .await?;
                    info!("Created relay endpoint {} in {}", hook.id, channel_id);
                }
            }
        }
        warn!("Relay endpoints in {} did not settle", channel_id);
        Err(RegistryError::Unavailable(channel_id))
    }

    /// Delete an endpoint; one that is already gone counts as deleted
    async fn delete_quietly(&self, webhook_id: Snowflake) -> Result<(), PlatformError> {
        match self.platform.delete_webhook(&self.token, webhook_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("Relay endpoint {} was already deleted", webhook_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remember(&self, endpoint: RelayEndpoint) {
        self.cache.insert(
            endpoint.channel_id,
            CachedEndpoint {
                endpoint,
                checked_at: Instant::now(),
            },
        );
    }
}

fn as_endpoint(hook: Webhook, channel_id: Snowflake) -> Option<RelayEndpoint> {
    Some(RelayEndpoint {
        id: hook.id,
        secret: hook.token?,
        channel_id: hook.channel_id.unwrap_or(channel_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{service_token, FakeFailure, FakePlatform, SERVICE_APP_ID};
    use chorus_core::ChannelInfo;

    fn channel(id: Snowflake, kind: u8, parent: Option<Snowflake>) -> ChannelInfo {
        ChannelInfo {
            id,
            kind,
            guild_id: Some(1),
            parent_id: parent,
            name: None,
            permission_overwrites: vec![],
            last_message_id: None,
        }
    }

    fn hook(id: Snowflake, channel_id: Snowflake, app: Option<Snowflake>) -> Webhook {
        Webhook {
            id,
            token: Some(format!("secret-{id}")),
            channel_id: Some(channel_id),
            application_id: app,
            name: Some("Chorus".into()),
            kind: 1,
        }
    }

    fn registry(platform: &Arc<FakePlatform>, probe_interval: Duration) -> RelayRegistry {
        let directory = Arc::new(ChannelDirectory::new(
            platform.clone(),
            service_token(),
            Duration::from_secs(60),
        ));
        RelayRegistry::new(
            platform.clone(),
            directory,
            service_token(),
            SERVICE_APP_ID,
            RegistryConfig {
                probe_interval,
                ..RegistryConfig::default()
            },
        )
    }

    fn platform() -> Arc<FakePlatform> {
        let platform = Arc::new(FakePlatform::new());
        platform.add_channel(channel(10, 0, None));
        platform.add_channel(channel(11, 11, Some(10)));
        platform
    }

    #[tokio::test]
    async fn test_creates_when_absent_and_reuses() {
        let platform = platform();
        // an endpoint created by a user is never adopted
        platform.add_webhook(hook(5, 10, None));
        let registry = registry(&platform, Duration::from_secs(60));

        let target = registry.get_or_create(10).await.unwrap();
        assert_ne!(target.endpoint.id, 5);
        assert_eq!(target.thread_id, None);
        assert_eq!(platform.count("create_webhook"), 1);

        let again = registry.get_or_create(10).await.unwrap();
        assert_eq!(again, target);
        assert_eq!(platform.count("create_webhook"), 1);
        assert_eq!(platform.webhooks_in(10).len(), 2);
    }

    #[tokio::test]
    async fn test_thread_resolves_to_parent() {
        let platform = platform();
        platform.add_webhook(hook(7, 10, Some(SERVICE_APP_ID)));
        let registry = registry(&platform, Duration::from_secs(60));

        let target = registry.get_or_create(11).await.unwrap();
        assert_eq!(target.endpoint.id, 7);
        assert_eq!(target.endpoint.channel_id, 10);
        assert_eq!(target.thread_id, Some(11));
        assert_eq!(platform.count("create_webhook"), 0);
    }

    #[tokio::test]
    async fn test_dead_cached_endpoint_is_replaced() {
        let platform = platform();
        platform.add_webhook(hook(7, 10, Some(SERVICE_APP_ID)));
        let registry = registry(&platform, Duration::ZERO);

        let first = registry.get_or_create(10).await.unwrap();
        assert_eq!(first.endpoint.id, 7);

        // deleted behind our back
        platform.remove_webhook(7);
        let second = registry.get_or_create(10).await.unwrap();
        assert_ne!(second.endpoint.id, 7);
        assert_eq!(platform.count("create_webhook"), 1);
        assert_eq!(platform.webhooks_in(10).len(), 1);
        // the 404 on deleting the vanished endpoint is not an error
        assert!(platform.count("delete_webhook") >= 1);
    }

    #[tokio::test]
    async fn test_duplicates_are_pruned_to_one() {
        let platform = platform();
        for id in [21, 22, 23] {
            platform.add_webhook(hook(id, 10, Some(SERVICE_APP_ID)));
        }
        let registry = registry(&platform, Duration::from_secs(60));

        let target = registry.get_or_create(10).await.unwrap();
        assert_eq!(target.endpoint.id, 21);
        let left = platform.webhooks_in(10);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, 21);
    }

    #[tokio::test]
    async fn test_rotated_secret_is_dead() {
        let platform = platform();
        let mut rotated = hook(30, 10, Some(SERVICE_APP_ID));
        platform.add_webhook(rotated.clone());
        let registry = registry(&platform, Duration::ZERO);
        registry.get_or_create(10).await.unwrap();

        rotated.token = Some("new-secret".into());
        platform.add_webhook(rotated);
        let target = registry.get_or_create(10).await.unwrap();
        assert_ne!(target.endpoint.id, 30);
        assert_eq!(platform.webhooks_in(10).len(), 1);
    }

    #[tokio::test]
    async fn test_heal_replaces_endpoint() {
        let platform = platform();
        let registry = registry(&platform, Duration::from_secs(60));
        let first = registry.get_or_create(11).await.unwrap();

        platform.remove_webhook(first.endpoint.id);
        let healed = registry.heal(11, &first.endpoint).await.unwrap();
        assert_ne!(healed.endpoint.id, first.endpoint.id);
        assert_eq!(healed.thread_id, Some(11));
    }

    #[tokio::test]
    async fn test_racing_endpoint_gone_before_use_is_not_returned() {
        let platform = platform();
        // a lower id created concurrently, already deleted when we probe it
        platform.race_next_create(hook(3, 10, Some(SERVICE_APP_ID)));
        platform.fail_next("get_webhook_with_token", FakeFailure::NotFound);
        let registry = registry(&platform, Duration::from_secs(60));

        let target = registry.get_or_create(10).await.unwrap();
        assert_ne!(target.endpoint.id, 3);
        assert_eq!(platform.count("create_webhook"), 1);
        let left = platform.webhooks_in(10);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, target.endpoint.id);
    }

    #[tokio::test]
    async fn test_transient_probe_failure_surfaces() {
        let platform = platform();
        platform.add_webhook(hook(7, 10, Some(SERVICE_APP_ID)));
        let registry = registry(&platform, Duration::ZERO);
        registry.get_or_create(10).await.unwrap();

        platform.fail_next("get_webhook_with_token", FakeFailure::Server);
        assert!(matches!(
            registry.get_or_create(10).await,
            Err(RegistryError::Platform(PlatformError::Server { .. }))
        ));
        assert_eq!(platform.webhooks_in(10).len(), 1);
    }
}
