//! Provenance retention
//!
//! Provenance is only needed while a proxied message can still be acted on.
//! Records older than the retention window are pruned periodically.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use chorus_proxy::SharedProvenanceStore;

use crate::TaskSupervisor;

/// Prune once; returns how many records went
pub async fn sweep_provenance(store: &SharedProvenanceStore, retention: chrono::Duration) -> usize {
    let cutoff = Utc::now() - retention;
    match store.prune_provenance(cutoff).await {
        Ok(0) => {
            debug!("No provenance older than {}", cutoff);
            0
        }
        Ok(pruned) => {
            info!("Pruned {} provenance records older than {}", pruned, cutoff);
            pruned
        }
        Err(e) => {
            warn!("Provenance sweep failed: {}", e);
            0
        }
    }
}

/// Sweep every `interval` until the supervisor starts shutting down
pub fn spawn_retention_sweeper(
    supervisor: &TaskSupervisor,
    store: SharedProvenanceStore,
    retention: chrono::Duration,
    interval: Duration,
) {
    let stopping = supervisor.stopping();
    supervisor.spawn("provenance-retention", async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = stopping.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    sweep_provenance(&store, retention).await;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chorus_core::{MemberId, ProvenanceRecord, ProxyReason};
    use chorus_proxy::{MemoryStore, ProvenanceStore};
    use std::sync::Arc;

    fn record(id: u64, age_days: i64) -> ProvenanceRecord {
        ProvenanceRecord {
            proxy_message_id: id,
            original_message_id: Some(id + 1),
            author_id: 1,
            member_id: MemberId::new(),
            channel_id: 10,
            reason: ProxyReason::Autoproxy,
            relay_endpoint_id: Some(5),
            bot_id: None,
            created_at: Utc::now() - chrono::Duration::days(age_days),
        }
    }

    #[tokio::test]
    async fn test_sweeper_prunes_old_records_and_stops() {
        let store = Arc::new(MemoryStore::new());
        store.record_provenance(&record(1, 40)).await.unwrap();
        store.record_provenance(&record(2, 1)).await.unwrap();

        let supervisor = TaskSupervisor::new();
        spawn_retention_sweeper(
            &supervisor,
            store.clone(),
            chrono::Duration::days(30),
            Duration::from_secs(3600),
        );
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.provenance(1).await.unwrap().is_none());
        assert!(store.provenance(2).await.unwrap().is_some());
        assert!(supervisor.drain(Duration::from_secs(1)).await);
    }
}
