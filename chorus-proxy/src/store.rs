//! Persisted state consumed by the proxy pipeline
//!
//! Personas, sessions and provenance live in a document store owned by other
//! services; markers live in a TTL-capable keyed store. Both are reached
//! through the traits below. The in-memory implementations back tests and
//! single-replica deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use chorus_core::{
    Account, AccountId, AutoproxySession, Group, GroupId, Member, MemberId, ProvenanceRecord,
    SessionScope, Snowflake,
};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Read access to personas, groups and accounts
#[async_trait]
pub trait PersonaStore: Send + Sync {
    async fn account_for_user(&self, user_id: Snowflake) -> Result<Option<Account>, StoreError>;

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Groups owned by the user's account or shared with the user, in
    /// declaration order
    async fn groups_for_user(&self, user_id: Snowflake) -> Result<Vec<Group>, StoreError>;

    async fn members(&self, ids: &[MemberId]) -> Result<Vec<Member>, StoreError>;

    async fn member(&self, id: MemberId) -> Result<Option<Member>, StoreError>;

    /// The member whose persona bot has this bot id
    async fn member_by_bot(&self, bot_id: Snowflake) -> Result<Option<Member>, StoreError>;

    /// The first group containing the member
    async fn group_of(&self, member: MemberId) -> Result<Option<Group>, StoreError>;

    async fn save_member(&self, member: &Member) -> Result<(), StoreError>;
}

/// Autoproxy sessions keyed by (user, scope)
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn session(
        &self,
        user_id: Snowflake,
        scope: SessionScope,
    ) -> Result<Option<AutoproxySession>, StoreError>;

    async fn put_session(&self, session: &AutoproxySession) -> Result<(), StoreError>;

    async fn delete_session(&self, user_id: Snowflake, scope: SessionScope) -> Result<(), StoreError>;
}

/// Provenance records keyed by proxied message id
#[async_trait]
pub trait ProvenanceStore: Send + Sync {
    async fn record_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError>;

    async fn provenance(&self, proxy_message_id: Snowflake) -> Result<Option<ProvenanceRecord>, StoreError>;

    /// Remove records created before `cutoff`; returns how many went
    async fn prune_provenance(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Short-lived keyed markers
#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Atomically store `value` unless a live entry exists. `true` when stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub type SharedPersonaStore = Arc<dyn PersonaStore>;
pub type SharedSessionStore = Arc<dyn SessionStore>;
pub type SharedProvenanceStore = Arc<dyn ProvenanceStore>;
pub type SharedTtlStore = Arc<dyn TtlStore>;

/// In-memory document store
#[derive(Default)]
pub struct MemoryStore {
    accounts: DashMap<AccountId, Account>,
    // kept in a list so lookups see declaration order
    groups: RwLock<Vec<Group>>,
    members: DashMap<MemberId, Member>,
    sessions: DashMap<(Snowflake, SessionScope), AutoproxySession>,
    provenance: DashMap<Snowflake, ProvenanceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_account(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    /// Insert or replace a group, keeping its original position
    pub fn put_group(&self, group: Group) {
        let mut groups = self.groups.write();
        match groups.iter_mut().find(|existing| existing.id == group.id) {
            Some(existing) => *existing = group,
            None => groups.push(group),
        }
    }

    pub fn remove_group(&self, id: GroupId) {
        self.groups.write().retain(|group| group.id != id);
    }

    pub fn put_member(&self, member: Member) {
        self.members.insert(member.id, member);
    }

    pub fn provenance_count(&self) -> usize {
        self.provenance.len()
    }
}

#[async_trait]
impl PersonaStore for MemoryStore {
    async fn account_for_user(&self, user_id: Snowflake) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .iter()
            .find(|entry| entry.users.contains(&user_id))
            .map(|entry| entry.value().clone()))
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&id).map(|entry| entry.value().clone()))
    }

    async fn groups_for_user(&self, user_id: Snowflake) -> Result<Vec<Group>, StoreError> {
        let account = self.account_for_user(user_id).await?.map(|account| account.id);
        Ok(self
            .groups
            .read()
            .iter()
            .filter(|group| {
                group.users.contains(&user_id)
                    || account.is_some_and(|id| group.accounts.contains(&id))
            })
            .cloned()
            .collect())
    }

    async fn members(&self, ids: &[MemberId]) -> Result<Vec<Member>, StoreError> {
        Ok(ids
            .iter()
            .filter_map(|id| self.members.get(id).map(|entry| entry.value().clone()))
            .collect())
    }

    async fn member(&self, id: MemberId) -> Result<Option<Member>, StoreError> {
        Ok(self.members.get(&id).map(|entry| entry.value().clone()))
    }

    async fn member_by_bot(&self, bot_id: Snowflake) -> Result<Option<Member>, StoreError> {
        Ok(self
            .members
            .iter()
            .find(|entry| entry.bot.as_ref().is_some_and(|bot| bot.bot_id == bot_id))
            .map(|entry| entry.value().clone()))
    }

    async fn group_of(&self, member: MemberId) -> Result<Option<Group>, StoreError> {
        Ok(self
            .groups
            .read()
            .iter()
            .find(|group| group.contains(member))
            .cloned())
    }

    async fn save_member(&self, member: &Member) -> Result<(), StoreError> {
        self.members.insert(member.id, member.clone());
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn session(
        &self,
        user_id: Snowflake,
        scope: SessionScope,
    ) -> Result<Option<AutoproxySession>, StoreError> {
        Ok(self
            .sessions
            .get(&(user_id, scope))
            .map(|entry| entry.value().clone()))
    }

    async fn put_session(&self, session: &AutoproxySession) -> Result<(), StoreError> {
        self.sessions
            .insert((session.user_id, session.scope), session.clone());
        Ok(())
    }

    async fn delete_session(&self, user_id: Snowflake, scope: SessionScope) -> Result<(), StoreError> {
        self.sessions.remove(&(user_id, scope));
        Ok(())
    }
}

#[async_trait]
impl ProvenanceStore for MemoryStore {
    async fn record_provenance(&self, record: &ProvenanceRecord) -> Result<(), StoreError> {
        // records are immutable once written
        self.provenance
            .entry(record.proxy_message_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn provenance(&self, proxy_message_id: Snowflake) -> Result<Option<ProvenanceRecord>, StoreError> {
        Ok(self
            .provenance
            .get(&proxy_message_id)
            .map(|entry| entry.value().clone()))
    }

    async fn prune_provenance(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let before = self.provenance.len();
        self.provenance.retain(|_, record| !record.is_older_than(cutoff));
        Ok(before - self.provenance.len())
    }
}

/// In-memory TTL store. `set_if_absent` is atomic per key.
#[derive(Default)]
pub struct MemoryTtlStore {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryTtlStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many went
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, expires)| *expires > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl TtlStore for MemoryTtlStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().1 > now {
                    return Ok(false);
                }
                entry.insert((value.to_string(), now + ttl));
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert((value.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let live = self
            .entries
            .get(key)
            .map(|entry| (entry.0.clone(), entry.1 > now));
        match live {
            Some((value, true)) => Ok(Some(value)),
            Some((_, false)) => {
                self.entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
