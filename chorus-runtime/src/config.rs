//! Runtime configuration
//!
//! Loaded from a TOML file; every key has a default so a file only needs the
//! credentials. The CLI overrides individual keys afterwards.

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use chorus_core::{BotToken, LinkBases, Snowflake};
use chorus_http::PlatformConfig;
use chorus_proxy::{DispatchConfig, RegistryConfig, SyncConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Address the event intake listens on
    pub bind: String,
    /// Service application id; derived from the token when unset
    pub application_id: Option<Snowflake>,
    /// Hex ed25519 key the service's deliveries are signed with
    pub public_key: String,
    pub bot_token: String,
    pub api_base: String,
    pub cdn_base: String,
    /// Base for message jump links
    pub web_base: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub dedup_ttl_secs: u64,
    pub pending_proxy_ttl_secs: u64,
    pub diagnostic_ttl_secs: u64,
    /// How long channel and guild lookups are cached
    pub channel_cache_ttl_secs: u64,
    pub provenance_retention_days: u32,
    pub retention_sweep_interval_secs: u64,
    pub relay_probe_interval_secs: u64,
    pub relay_name: String,
    /// Interaction URL wired into persona bots
    pub interactions_url: Option<String>,
    /// Event webhook URL wired into persona bots
    pub event_webhooks_url: Option<String>,
    /// Reject deliveries whose timestamp is further off than this
    pub timestamp_skew_secs: Option<u64>,
    pub drain_timeout_secs: u64,
    /// Written into dedup markers to tell replicas apart
    pub replica_id: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let platform = PlatformConfig::default();
        let links = LinkBases::default();
        Self {
            bind: "0.0.0.0:8080".to_string(),
            application_id: None,
            public_key: String::new(),
            bot_token: String::new(),
            api_base: platform.api_base,
            cdn_base: platform.cdn_base,
            web_base: links.web,
            request_timeout_secs: platform.timeout_secs,
            max_retries: platform.max_attempts.saturating_sub(1),
            retry_base_delay_ms: platform.retry_base_delay_ms,
            retry_max_delay_ms: platform.retry_max_delay_ms,
            dedup_ttl_secs: 10,
            pending_proxy_ttl_secs: 30,
            diagnostic_ttl_secs: 3600,
            channel_cache_ttl_secs: 60,
            provenance_retention_days: 30,
            retention_sweep_interval_secs: 3600,
            relay_probe_interval_secs: 60,
            relay_name: RegistryConfig::default().relay_name,
            interactions_url: None,
            event_webhooks_url: None,
            timestamp_skew_secs: None,
            drain_timeout_secs: 10,
            replica_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn with_bind(mut self, bind: &str) -> Self {
        self.bind = bind.to_string();
        self
    }

    pub fn with_bot_token(mut self, token: &str) -> Self {
        self.bot_token = token.to_string();
        self
    }

    pub fn with_public_key(mut self, key: &str) -> Self {
        self.public_key = key.to_string();
        self
    }

    /// Check everything that can be checked without network access
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.bind_addr()?;
        self.verifying_key()?;
        self.resolved_application_id()?;
        if self.dedup_ttl_secs == 0 {
            return Err(ConfigError::Invalid("dedup_ttl_secs must be positive".into()));
        }
        if self.pending_proxy_ttl_secs == 0 {
            return Err(ConfigError::Invalid("pending_proxy_ttl_secs must be positive".into()));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry_base_delay_ms exceeds retry_max_delay_ms".into(),
            ));
        }
        if self.retention_sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "retention_sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("bind address {:?} is not host:port", self.bind)))
    }

    pub fn verifying_key(&self) -> Result<VerifyingKey, ConfigError> {
        parse_public_key(&self.public_key)
            .ok_or_else(|| ConfigError::Invalid("public_key must be 64 hex characters of an ed25519 key".into()))
    }

    pub fn token(&self) -> BotToken {
        BotToken::new(self.bot_token.trim())
    }

    /// The configured application id, or the one encoded in the token. The
    /// two must agree when both are present.
    pub fn resolved_application_id(&self) -> Result<Snowflake, ConfigError> {
        let from_token = self
            .token()
            .application_id()
            .map_err(|_| ConfigError::Invalid("bot_token is not a bot token".into()))?;
        match self.application_id {
            Some(id) if id != from_token => Err(ConfigError::Invalid(format!(
                "application_id {id} does not match the token's {from_token}"
            ))),
            _ => Ok(from_token),
        }
    }

    pub fn platform_config(&self) -> PlatformConfig {
        PlatformConfig {
            api_base: self.api_base.clone(),
            cdn_base: self.cdn_base.clone(),
            timeout_secs: self.request_timeout_secs,
            max_attempts: self.max_retries + 1,
            retry_base_delay_ms: self.retry_base_delay_ms,
            retry_max_delay_ms: self.retry_max_delay_ms,
        }
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            relay_name: self.relay_name.clone(),
            probe_interval: Duration::from_secs(self.relay_probe_interval_secs),
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            links: LinkBases {
                web: self.web_base.clone(),
                cdn: self.cdn_base.clone(),
            },
            pending_ttl: Duration::from_secs(self.pending_proxy_ttl_secs),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interactions_url: self.interactions_url.clone(),
            event_webhooks_url: self.event_webhooks_url.clone(),
            ..Default::default()
        }
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn diagnostic_ttl(&self) -> Duration {
        Duration::from_secs(self.diagnostic_ttl_secs)
    }

    pub fn channel_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.channel_cache_ttl_secs)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.provenance_retention_days))
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }
}

/// An ed25519 verifying key from its hex form
pub fn parse_public_key(hex_key: &str) -> Option<VerifyingKey> {
    let bytes: [u8; 32] = hex::decode(hex_key.trim()).ok()?.try_into().ok()?;
    VerifyingKey::from_bytes(&bytes).ok()
}
