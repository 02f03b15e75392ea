//! Wire models for platform REST calls

use chorus_core::snowflake::{as_str, option_str, vec_str};
use chorus_core::{AllowedMentions, MessageReference, ReplyEmbed, Snowflake};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A relay endpoint (channel webhook)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    /// Execution secret; absent for endpoints we cannot execute
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default, with = "option_str")]
    pub channel_id: Option<Snowflake>,
    /// Creator application; `None` for endpoints created by users
    #[serde(default, with = "option_str")]
    pub application_id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
    /// 1 = incoming
    #[serde(rename = "type", default = "incoming")]
    pub kind: u8,
}

fn incoming() -> u8 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedMessage {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(with = "as_str")]
    pub channel_id: Snowflake,
    #[serde(default, with = "option_str")]
    pub webhook_id: Option<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotUser {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: Option<String>,
    /// Hex ed25519 key deliveries for this application are signed with
    #[serde(default)]
    pub verify_key: String,
    #[serde(default)]
    pub bot: Option<BotUser>,
    #[serde(default)]
    pub interactions_endpoint_url: Option<String>,
    #[serde(default)]
    pub event_webhooks_url: Option<String>,
    /// 1 = disabled, 2 = enabled
    #[serde(default)]
    pub event_webhooks_status: Option<u8>,
    #[serde(default)]
    pub event_webhooks_types: Option<Vec<String>>,
    #[serde(default)]
    pub integration_types_config: Option<Value>,
    #[serde(default)]
    pub install_params: Option<Value>,
}

/// Partial application update; `None` fields are left alone
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplicationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Data URI, or `Some(None)` to clear
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactions_endpoint_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_webhooks_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_webhooks_status: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_webhooks_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_types_config: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_params: Option<Value>,
}

impl ApplicationPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Partial bot user update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BotUserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppEmoji {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub animated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOption {
    #[serde(rename = "type")]
    pub kind: u8,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// An application command, as registered or as desired
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default, with = "option_str", skip_serializing_if = "Option::is_none")]
    pub id: Option<Snowflake>,
    pub name: String,
    /// 1 = slash, 2 = user, 3 = message
    #[serde(rename = "type", default = "slash")]
    pub kind: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub options: Vec<CommandOption>,
    #[serde(default)]
    pub integration_types: Vec<u8>,
    #[serde(default)]
    pub contexts: Vec<u8>,
}

fn slash() -> u8 {
    1
}

impl CommandSpec {
    /// Same definition, ignoring the server-assigned id
    pub fn same_shape(&self, other: &CommandSpec) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.description == other.description
            && self.options == other.options
            && self.integration_types == other.integration_types
            && self.contexts == other.contexts
    }
}

/// Guild entry from the bot's guild list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialGuild {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildMemberInfo {
    #[serde(default, with = "vec_str")]
    pub roles: Vec<Snowflake>,
}

/// Body of a relay endpoint execution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutePayload {
    pub content: String,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub allowed_mentions: AllowedMentions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<ReplyEmbed>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

/// Body of a relay message edit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EditPayload {
    pub content: String,
    pub allowed_mentions: AllowedMentions,
}

/// Body of a bot message create
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateMessagePayload {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<OutgoingReference>,
    pub allowed_mentions: AllowedMentions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingReference {
    #[serde(flatten)]
    pub reference: MessageReference,
    pub fail_if_not_exists: bool,
}
