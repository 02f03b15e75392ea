//! Session-aware resolution against the stores
//!
//! Loads the author's candidate groups and autoproxy sessions, runs the pure
//! resolver and persists the latch write it asks for.

use chrono::{DateTime, Utc};
use tracing::debug;

use chorus_core::{
    resolve, Account, AutoproxySession, CandidateGroup, Resolution, ResolveRequest, SessionScope,
    SessionWrite, Snowflake,
};

use crate::{SharedPersonaStore, SharedSessionStore, StoreError};

/// What the resolver needs to know about a message
#[derive(Debug, Clone, Copy)]
pub struct MessageContext<'a> {
    pub author_id: Snowflake,
    /// Channel followed by its parents
    pub ancestry: &'a [Snowflake],
    pub guild_id: Option<Snowflake>,
    pub content: &'a str,
    pub has_attachments: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedMessage {
    pub resolution: Resolution,
    /// The author's account, for its reply and naming preferences
    pub account: Option<Account>,
}

pub struct ProxyResolver {
    personas: SharedPersonaStore,
    sessions: SharedSessionStore,
}

impl ProxyResolver {
    pub fn new(personas: SharedPersonaStore, sessions: SharedSessionStore) -> Self {
        Self { personas, sessions }
    }

    pub async fn resolve(&self, message: MessageContext<'_>, now: DateTime<Utc>) -> Result<ResolvedMessage, StoreError> {
        let account = self.personas.account_for_user(message.author_id).await?;

        let mut candidates = Vec::new();
        for group in self.personas.groups_for_user(message.author_id).await? {
            let members = self.personas.members(&group.members).await?;
            candidates.push(CandidateGroup::new(group, members));
        }

        let global = self
            .live_session(message.author_id, SessionScope::Global, now)
            .await?;
        let mut local = None;
        for scope_id in message.ancestry.iter().chain(message.guild_id.iter()) {
            local = self
                .live_session(message.author_id, SessionScope::Local(*scope_id), now)
                .await?;
            if local.is_some() {
                break;
            }
        }

        let resolution = resolve(&ResolveRequest {
            author_id: message.author_id,
            channel_ancestry: message.ancestry,
            content: message.content,
            has_attachments: message.has_attachments,
            candidates: &candidates,
            global_session: global.as_ref(),
            local_session: local.as_ref(),
            now,
        });

        if let Some(write) = resolution.session_write {
            let target = match write {
                SessionWrite::Select { scope, .. } | SessionWrite::ClearSelection { scope } => {
                    [global.as_ref(), local.as_ref()]
                        .into_iter()
                        .flatten()
                        .find(|session| session.scope == scope)
                }
            };
            if let Some(session) = target {
                self.apply(session.clone(), write).await?;
            }
        }

        Ok(ResolvedMessage { resolution, account })
    }

    /// A session that has not expired; expired ones are removed on sight
    async fn live_session(
        &self,
        user_id: Snowflake,
        scope: SessionScope,
        now: DateTime<Utc>,
    ) -> Result<Option<AutoproxySession>, StoreError> {
        match self.sessions.session(user_id, scope).await? {
            Some(session) if session.is_expired(now) => {
                debug!("Removing expired {:?} session of {}", scope, user_id);
                self.sessions.delete_session(user_id, scope).await?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn apply(&self, mut session: AutoproxySession, write: SessionWrite) -> Result<(), StoreError> {
        match write {
            SessionWrite::Select { member, .. } => {
                debug!("Latching {:?} session of {} to {}", session.scope, session.user_id, member);
                session.member = Some(member);
            }
            SessionWrite::ClearSelection { .. } => {
                debug!("Clearing {:?} session of {}", session.scope, session.user_id);
                session.member = None;
            }
        }
        self.sessions.put_session(&session).await
    }
}
