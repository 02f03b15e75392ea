//! Links between original messages and their proxied replacements

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{MemberId, Snowflake};

/// Why a message was proxied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyReason {
    /// Matched the member's tag at this index
    Tag { index: usize },
    /// An autoproxy session picked the member
    Autoproxy,
    /// A locked session picked the member
    Locked,
    /// Sent through the persona bot's slash command
    Command,
}

impl std::fmt::Display for ProxyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyReason::Tag { index } => write!(f, "matched proxy tag {}", index + 1),
            ProxyReason::Autoproxy => f.write_str("autoproxy"),
            ProxyReason::Locked => f.write_str("locked autoproxy"),
            ProxyReason::Command => f.write_str("slash command"),
        }
    }
}

/// Immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    #[serde(with = "crate::snowflake::as_str")]
    pub proxy_message_id: Snowflake,
    /// `None` when the message never existed as a user message
    #[serde(default, with = "crate::snowflake::option_str")]
    pub original_message_id: Option<Snowflake>,
    #[serde(with = "crate::snowflake::as_str")]
    pub author_id: Snowflake,
    pub member_id: MemberId,
    #[serde(with = "crate::snowflake::as_str")]
    pub channel_id: Snowflake,
    pub reason: ProxyReason,
    /// Relay endpoint that posted the replacement, if any
    #[serde(default, with = "crate::snowflake::option_str")]
    pub relay_endpoint_id: Option<Snowflake>,
    /// Persona bot that posted the replacement, if any
    #[serde(default, with = "crate::snowflake::option_str")]
    pub bot_id: Option<Snowflake>,
    pub created_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn is_older_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.created_at < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(ProxyReason::Tag { index: 0 }.to_string(), "matched proxy tag 1");
        assert_eq!(ProxyReason::Locked.to_string(), "locked autoproxy");
    }

    #[test]
    fn test_record_roundtrip_keeps_ids_as_strings() {
        let record = ProvenanceRecord {
            proxy_message_id: 2,
            original_message_id: None,
            author_id: 3,
            member_id: MemberId::new(),
            channel_id: 4,
            reason: ProxyReason::Autoproxy,
            relay_endpoint_id: Some(5),
            bot_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["proxy_message_id"], "2");
        assert_eq!(json["relay_endpoint_id"], "5");
        assert!(json["original_message_id"].is_null());
        assert_eq!(serde_json::from_value::<ProvenanceRecord>(json).unwrap(), record);
    }
}
