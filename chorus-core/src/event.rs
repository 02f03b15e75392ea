//! Inbound event envelope
//!
//! Deliveries arrive as `{"type": <kind>, "application_id": <id>, "data": {...}}`.
//! The `type` field selects the payload shape. Older senders omit it, in
//! which case the payload shape is inferred from its fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::snowflake::{as_str, option_str, vec_str};
use crate::Snowflake;

/// Message flag marking a voice message
pub const VOICE_MESSAGE_FLAG: u64 = 1 << 13;

/// Message types eligible for proxying: default and reply
pub const PROXYABLE_MESSAGE_TYPES: [u8; 2] = [0, 19];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Body is not an event envelope")]
    Malformed,

    #[error("Unknown event type: {0}")]
    UnknownKind(String),

    #[error("Invalid {kind} payload: {source}")]
    Payload {
        kind: EventKind,
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Ping,
    MessageCreate,
    MessageUpdate,
    ReactionAdd,
    ApplicationAuthorized,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Ping,
        EventKind::MessageCreate,
        EventKind::MessageUpdate,
        EventKind::ReactionAdd,
        EventKind::ApplicationAuthorized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Ping => "PING",
            EventKind::MessageCreate => "MESSAGE_CREATE",
            EventKind::MessageUpdate => "MESSAGE_UPDATE",
            EventKind::ReactionAdd => "MESSAGE_REACTION_ADD",
            EventKind::ApplicationAuthorized => "APPLICATION_AUTHORIZED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DecodeError::UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
    /// Avatar hash
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl Author {
    pub fn display(&self) -> &str {
        self.global_name.as_deref().unwrap_or(&self.username)
    }

    /// Avatar URL on the CDN, or the default avatar for the user
    pub fn avatar_url(&self, cdn_base: &str) -> String {
        match &self.avatar {
            Some(hash) => format!("{cdn_base}/avatars/{}/{hash}.png", self.id),
            None => format!("{cdn_base}/embed/avatars/{}.png", (self.id >> 22) % 6),
        }
    }
}

/// Guild-specific part of a message author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMember {
    #[serde(default, with = "vec_str")]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    pub filename: String,
    pub size: u64,
    pub url: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(default)]
    pub waveform: Option<String>,
}

impl Attachment {
    pub fn is_spoiler(&self) -> bool {
        self.filename.starts_with("SPOILER_")
    }

    pub fn is_voice_message(&self) -> bool {
        self.duration_secs.is_some() && self.waveform.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum StickerFormat {
    Png,
    Apng,
    Lottie,
    Gif,
    Unknown(u8),
}

impl From<u8> for StickerFormat {
    fn from(value: u8) -> Self {
        match value {
            1 => StickerFormat::Png,
            2 => StickerFormat::Apng,
            3 => StickerFormat::Lottie,
            4 => StickerFormat::Gif,
            other => StickerFormat::Unknown(other),
        }
    }
}

impl From<StickerFormat> for u8 {
    fn from(value: StickerFormat) -> Self {
        match value {
            StickerFormat::Png => 1,
            StickerFormat::Apng => 2,
            StickerFormat::Lottie => 3,
            StickerFormat::Gif => 4,
            StickerFormat::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickerItem {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    pub name: String,
    pub format_type: StickerFormat,
}

impl StickerItem {
    /// File extension when the sticker can be sent as an image
    pub fn image_extension(&self) -> Option<&'static str> {
        match self.format_type {
            StickerFormat::Png | StickerFormat::Apng => Some("png"),
            StickerFormat::Gif => Some("gif"),
            StickerFormat::Lottie | StickerFormat::Unknown(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReference {
    #[serde(default, with = "option_str")]
    pub message_id: Option<Snowflake>,
    #[serde(default, with = "option_str")]
    pub channel_id: Option<Snowflake>,
    #[serde(default, with = "option_str")]
    pub guild_id: Option<Snowflake>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(with = "as_str")]
    pub id: Snowflake,
    #[serde(with = "as_str")]
    pub channel_id: Snowflake,
    #[serde(default, with = "option_str")]
    pub guild_id: Option<Snowflake>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default)]
    pub member: Option<MessageMember>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: u8,
    #[serde(default)]
    pub flags: u64,
    #[serde(default, with = "option_str")]
    pub webhook_id: Option<Snowflake>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub sticker_items: Vec<StickerItem>,
    #[serde(default)]
    pub mentions: Vec<Author>,
    #[serde(default, with = "vec_str")]
    pub mention_roles: Vec<Snowflake>,
    #[serde(default)]
    pub mention_everyone: bool,
    #[serde(default)]
    pub message_reference: Option<MessageReference>,
    #[serde(default)]
    pub referenced_message: Option<Box<InboundMessage>>,
}

impl InboundMessage {
    /// Whether this message is a candidate for proxying at all
    pub fn is_proxyable(&self) -> bool {
        let human = self.author.as_ref().is_some_and(|author| !author.bot);
        human
            && self.webhook_id.is_none()
            && self.guild_id.is_some()
            && PROXYABLE_MESSAGE_TYPES.contains(&self.kind)
    }

    pub fn is_voice_message(&self) -> bool {
        self.flags & VOICE_MESSAGE_FLAG != 0
    }

    pub fn author_id(&self) -> Option<Snowflake> {
        self.author.as_ref().map(|author| author.id)
    }

    pub fn role_ids(&self) -> &[Snowflake] {
        self.member.as_ref().map(|m| m.roles.as_slice()).unwrap_or(&[])
    }

    pub fn jump_url(&self, web_base: &str) -> String {
        let guild = self
            .guild_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "@me".to_string());
        format!("{web_base}/channels/{guild}/{}/{}", self.channel_id, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEmoji {
    #[serde(default, with = "option_str")]
    pub id: Option<Snowflake>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    #[serde(with = "as_str")]
    pub user_id: Snowflake,
    #[serde(with = "as_str")]
    pub channel_id: Snowflake,
    #[serde(with = "as_str")]
    pub message_id: Snowflake,
    #[serde(default, with = "option_str")]
    pub guild_id: Option<Snowflake>,
    #[serde(default, with = "option_str")]
    pub message_author_id: Option<Snowflake>,
    pub emoji: ReactionEmoji,
}

impl ReactionEvent {
    pub fn is_delete_request(&self) -> bool {
        self.emoji.id.is_none() && self.emoji.name.as_deref() == Some("\u{274C}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedGuild {
    #[serde(with = "as_str")]
    pub id: Snowflake,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedEvent {
    /// 0 = guild install, 1 = user install
    #[serde(default)]
    pub integration_type: Option<u8>,
    pub user: Author,
    #[serde(default)]
    pub guild: Option<AuthorizedGuild>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Ping,
    MessageCreate(InboundMessage),
    MessageUpdate(InboundMessage),
    ReactionAdd(ReactionEvent),
    ApplicationAuthorized(AuthorizedEvent),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Ping => EventKind::Ping,
            InboundEvent::MessageCreate(_) => EventKind::MessageCreate,
            InboundEvent::MessageUpdate(_) => EventKind::MessageUpdate,
            InboundEvent::ReactionAdd(_) => EventKind::ReactionAdd,
            InboundEvent::ApplicationAuthorized(_) => EventKind::ApplicationAuthorized,
        }
    }
}

/// A decoded delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Application the delivery was addressed to
    pub application_id: Option<Snowflake>,
    pub event: InboundEvent,
}

#[derive(Deserialize)]
struct Header {
    #[serde(default, with = "option_str")]
    application_id: Option<Snowflake>,
}

impl Envelope {
    /// Read only the addressed application id, before the body is trusted
    pub fn claimed_identity(raw: &[u8]) -> Result<Option<Snowflake>, DecodeError> {
        let header: Header = serde_json::from_slice(raw)?;
        Ok(header.application_id)
    }

    pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
        let mut body: Value = serde_json::from_slice(raw)?;
        let object = body.as_object_mut().ok_or(DecodeError::Malformed)?;

        let application_id = match object.get("application_id") {
            None | Some(Value::Null) => None,
            Some(value) => Some(as_str::deserialize(value).map_err(DecodeError::Json)?),
        };
        let data = object.remove("data").unwrap_or(Value::Null);

        let kind = match object.get("type") {
            Some(Value::String(name)) => name.parse()?,
            Some(Value::Number(n)) if n.as_u64() == Some(1) => EventKind::Ping,
            Some(Value::Number(n)) => return Err(DecodeError::UnknownKind(n.to_string())),
            Some(_) => return Err(DecodeError::Malformed),
            None => infer_kind(&data)?,
        };

        let event = match kind {
            EventKind::Ping => InboundEvent::Ping,
            EventKind::MessageCreate => InboundEvent::MessageCreate(payload(kind, data)?),
            EventKind::MessageUpdate => InboundEvent::MessageUpdate(payload(kind, data)?),
            EventKind::ReactionAdd => InboundEvent::ReactionAdd(payload(kind, data)?),
            EventKind::ApplicationAuthorized => {
                InboundEvent::ApplicationAuthorized(payload(kind, data)?)
            }
        };

        Ok(Envelope {
            application_id,
            event,
        })
    }
}

fn payload<T: DeserializeOwned>(kind: EventKind, data: Value) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|source| DecodeError::Payload { kind, source })
}

/// Shape-based detection for envelopes without a `type`
fn infer_kind(data: &Value) -> Result<EventKind, DecodeError> {
    match data {
        Value::Null => Ok(EventKind::Ping),
        Value::Object(fields) if fields.is_empty() => Ok(EventKind::Ping),
        Value::Object(fields) => {
            let has = |key: &str| fields.contains_key(key);
            if has("content") && has("channel_id") && has("author") {
                Ok(EventKind::MessageCreate)
            } else if has("emoji") && has("message_id") && has("user_id") {
                Ok(EventKind::ReactionAdd)
            } else if has("user") && (has("guild") || has("integration_type")) {
                Ok(EventKind::ApplicationAuthorized)
            } else {
                Err(DecodeError::Malformed)
            }
        }
        _ => Err(DecodeError::Malformed),
    }
}

/// Stable idempotency key for a raw delivery
pub fn event_fingerprint(raw: &[u8]) -> String {
    hex::encode(Sha256::digest(raw))
}
