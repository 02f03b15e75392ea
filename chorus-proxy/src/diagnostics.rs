//! Per-message debug log
//!
//! Why a message was or was not proxied is kept in the TTL store under
//! `diagnostic:{message_id}` for a bounded time. It is read by a debug
//! command and never posted in-channel.

use std::time::Duration;
use tracing::warn;

use chorus_core::Snowflake;

use crate::SharedTtlStore;

pub fn diagnostic_key(message_id: Snowflake) -> String {
    format!("diagnostic:{message_id}")
}

#[derive(Clone)]
pub struct Diagnostics {
    store: SharedTtlStore,
    ttl: Duration,
}

impl Diagnostics {
    pub fn new(store: SharedTtlStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Append `notes` to the message's log. Failures are logged, not raised.
    pub async fn record(&self, message_id: Snowflake, notes: &[String]) {
        if notes.is_empty() {
            return;
        }
        let key = diagnostic_key(message_id);
        let mut log = self.read(message_id).await;
        log.extend(notes.iter().cloned());

        let encoded = match serde_json::to_string(&log) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Failed to encode diagnostics for {}: {}", message_id, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &encoded, self.ttl).await {
            warn!("Failed to store diagnostics for {}: {}", message_id, e);
        }
    }

    pub async fn read(&self, message_id: Snowflake) -> Vec<String> {
        match self.store.get(&diagnostic_key(message_id)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_default(),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read diagnostics for {}: {}", message_id, e);
                Vec::new()
            }
        }
    }
}
