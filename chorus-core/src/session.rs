//! Autoproxy sessions
//!
//! A session is a per-user sticky "current speaker", either global or scoped
//! to one channel or guild.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MemberId, Snowflake};

/// How a session reacts to tag usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AutoproxyMode {
    /// Fixed speaker; tags proxy once without moving the selection
    Front,
    /// The last tag used becomes the speaker
    Latch,
    /// Fixed speaker; tags are not scanned while the speaker is available
    Locked,
    /// Autoproxy is off for this scope
    Disabled,
}

/// Where a session applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SessionScope {
    Global,
    /// A channel or guild id
    Local(#[serde(with = "crate::snowflake::as_str")] Snowflake),
}

impl SessionScope {
    pub fn is_local(&self) -> bool {
        matches!(self, SessionScope::Local(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoproxySession {
    #[serde(with = "crate::snowflake::as_str")]
    pub user_id: Snowflake,
    pub scope: SessionScope,
    /// Current speaker; `None` waits for the next tag
    pub member: Option<MemberId>,
    pub mode: AutoproxyMode,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AutoproxySession {
    pub fn new(user_id: Snowflake, scope: SessionScope, mode: AutoproxyMode) -> Self {
        Self {
            user_id,
            scope,
            member: None,
            mode,
            expires_at: None,
        }
    }

    pub fn with_member(mut self, member: MemberId) -> Self {
        self.member = Some(member);
        self
    }

    pub fn expiring_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_enabled(&self) -> bool {
        self.mode != AutoproxyMode::Disabled
    }

    /// Whether a tag match moves the selection
    pub fn latches(&self) -> bool {
        self.mode == AutoproxyMode::Latch
    }
}

/// Pick the session that governs a message.
///
/// A live local session wins over the global one, even when disabled, so a
/// user can switch autoproxy off for one channel. Expired sessions count as
/// absent.
pub fn effective_session<'a>(
    global: Option<&'a AutoproxySession>,
    local: Option<&'a AutoproxySession>,
    now: DateTime<Utc>,
) -> Option<&'a AutoproxySession> {
    let live = |session: Option<&'a AutoproxySession>| session.filter(|s| !s.is_expired(now));
    live(local).or_else(|| live(global))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_local_wins_over_global() {
        let now = Utc::now();
        let a = MemberId::new();
        let b = MemberId::new();
        let global = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Latch).with_member(a);
        let local = AutoproxySession::new(1, SessionScope::Local(9), AutoproxyMode::Front).with_member(b);

        let chosen = effective_session(Some(&global), Some(&local), now).unwrap();
        assert_eq!(chosen.member, Some(b));
    }

    #[test]
    fn test_expired_local_falls_back() {
        let now = Utc::now();
        let global = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Latch);
        let local = AutoproxySession::new(1, SessionScope::Local(9), AutoproxyMode::Front)
            .expiring_at(now - Duration::seconds(1));

        let chosen = effective_session(Some(&global), Some(&local), now).unwrap();
        assert_eq!(chosen.scope, SessionScope::Global);
        assert!(effective_session(None, Some(&local), now).is_none());
    }

    #[test]
    fn test_mode_flags() {
        let latch = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Latch);
        assert!(latch.latches() && latch.is_enabled());
        let front = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Front);
        assert!(!front.latches());
        let off = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Disabled);
        assert!(!off.is_enabled());
    }

    #[test]
    fn test_serde_shape() {
        let session = AutoproxySession::new(5, SessionScope::Local(7), AutoproxyMode::Locked);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["mode"], "LOCKED");
        assert_eq!(json["scope"]["id"], "7");
        let back: AutoproxySession = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }
}
