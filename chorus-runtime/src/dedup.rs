//! Delivery deduplication
//!
//! Upstream delivery is at-least-once and any replica may receive any
//! delivery. The first replica to claim a payload's fingerprint in the shared
//! TTL store processes it; everyone else drops it.

use std::time::Duration;
use tracing::debug;

use chorus_core::event_fingerprint;
use chorus_proxy::{SharedTtlStore, StoreError};

pub fn dedup_key(fingerprint: &str) -> String {
    format!("dedup:{fingerprint}")
}

#[derive(Clone)]
pub struct Deduplicator {
    store: SharedTtlStore,
    replica_id: String,
    ttl: Duration,
}

impl Deduplicator {
    pub fn new(store: SharedTtlStore, replica_id: &str, ttl: Duration) -> Self {
        Self {
            store,
            replica_id: replica_id.to_string(),
            ttl,
        }
    }

    /// `true` when this replica is the first to see `body` within the TTL
    pub async fn claim(&self, body: &[u8]) -> Result<bool, StoreError> {
        let key = dedup_key(&event_fingerprint(body));
        let claimed = self
            .store
            .set_if_absent(&key, &self.replica_id, self.ttl)
            .await?;
        if !claimed {
            let owner = self.store.get(&key).await?.unwrap_or_default();
            debug!("Duplicate delivery {} (claimed by {})", key, owner);
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_proxy::MemoryTtlStore;
    use futures::future::join_all;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_one_claim_across_replicas() {
        let store: SharedTtlStore = Arc::new(MemoryTtlStore::new());
        let replicas: Vec<Deduplicator> = (0..8)
            .map(|i| Deduplicator::new(store.clone(), &format!("replica-{i}"), Duration::from_secs(10)))
            .collect();

        let body = br#"{"type":"MESSAGE_CREATE","data":{}}"#;
        let claims = join_all(replicas.iter().map(|replica| replica.claim(body))).await;
        let winners = claims.into_iter().filter(|claim| *claim.as_ref().unwrap()).count();
        assert_eq!(winners, 1);

        assert!(replicas[0].claim(b"something else").await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_expires() {
        let store = Arc::new(MemoryTtlStore::new());
        let dedup = Deduplicator::new(store, "r", Duration::from_millis(20));
        assert!(dedup.claim(b"x").await.unwrap());
        assert!(!dedup.claim(b"x").await.unwrap());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(dedup.claim(b"x").await.unwrap());
    }
}
