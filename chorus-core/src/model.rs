//! Personas, groups and accounts
//!
//! A member is a named persona a user can speak as. Members live in groups,
//! groups are owned by accounts (the set of platform users that share one
//! identity) and may be shared with further users.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;
use uuid::Uuid;

use crate::{Snowflake, DISPLAY_NAME_LIMIT, MAX_PROXY_TAGS, MAX_TAG_AFFIX_LEN};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// Id of a persona
    MemberId
);
define_id!(
    /// Id of a group of personas
    GroupId
);
define_id!(
    /// Id of an account (one identity spanning several platform users)
    AccountId
);

/// Validation failures for persona records
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Proxy tag needs a prefix or a suffix")]
    EmptyTag,

    #[error("Proxy tag {field} is {len} characters (max {MAX_TAG_AFFIX_LEN})")]
    TagTooLong { field: &'static str, len: usize },

    #[error("Member has {0} proxy tags (max {MAX_PROXY_TAGS})")]
    TooManyTags(usize),

    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Display name is {0} characters (max {DISPLAY_NAME_LIMIT})")]
    DisplayNameTooLong(usize),

    #[error("Group references unknown member {0}")]
    UnknownMember(MemberId),

    #[error("Malformed bot token")]
    InvalidToken,
}

/// A bot credential. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw secret, for the authorization header only
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Application id encoded in the first segment of the token
    pub fn application_id(&self) -> Result<Snowflake, ModelError> {
        let head = self
            .0
            .split('.')
            .next()
            .map(|segment| segment.trim_end_matches('='))
            .filter(|segment| !segment.is_empty())
            .ok_or(ModelError::InvalidToken)?;

        let decoded = STANDARD_NO_PAD
            .decode(head)
            .or_else(|_| URL_SAFE_NO_PAD.decode(head))
            .map_err(|_| ModelError::InvalidToken)?;

        String::from_utf8(decoded)
            .ok()
            .and_then(|id| id.parse().ok())
            .ok_or(ModelError::InvalidToken)
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BotToken(***)")
    }
}

/// One way a member can be called: `prefix` text `suffix`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTag {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    /// Prefix and suffix are raw regular expressions
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub case_sensitive: bool,
    /// Avatar used instead of the member's when this tag matches
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ProxyTag {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            regex: false,
            case_sensitive: false,
            avatar_url: None,
        }
    }

    pub fn prefix(prefix: &str) -> Self {
        Self::new(prefix, "")
    }

    pub fn suffix(suffix: &str) -> Self {
        Self::new("", suffix)
    }

    pub fn with_regex(mut self) -> Self {
        self.regex = true;
        self
    }

    pub fn with_case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn with_avatar(mut self, url: &str) -> Self {
        self.avatar_url = Some(url.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.prefix.is_empty() && self.suffix.is_empty() {
            return Err(ModelError::EmptyTag);
        }

        for (field, value) in [("prefix", &self.prefix), ("suffix", &self.suffix)] {
            let len = value.chars().count();
            if len > MAX_TAG_AFFIX_LEN {
                return Err(ModelError::TagTooLong { field, len });
            }
        }

        Ok(())
    }

    /// Human-readable form, e.g. `s:`text
    pub fn label(&self) -> String {
        let mut label = String::new();
        if !self.prefix.is_empty() {
            label.push_str(&format!("`{}`", self.prefix));
        }
        label.push_str("`text`");
        if !self.suffix.is_empty() {
            label.push_str(&format!("`{}`", self.suffix));
        }
        label
    }
}

/// Avatar or banner state last written to a persona bot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedImage {
    /// Source the image was taken from (`None` when cleared)
    pub source: Option<String>,
    /// Hash the platform assigned after the patch
    pub hash: Option<String>,
}

/// A platform bot account bound to one member (a "userproxy")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaBot {
    pub bot_id: Snowflake,
    pub token: BotToken,
    /// Hex ed25519 key the platform signs this bot's deliveries with
    pub public_key: String,
    /// Name of the slash command used to proxy through the bot
    #[serde(default = "default_command")]
    pub command: String,
    /// Guilds the bot is installed in
    #[serde(default)]
    pub guilds: BTreeSet<Snowflake>,
    #[serde(default)]
    pub synced_avatar: Option<SyncedImage>,
    #[serde(default)]
    pub synced_banner: Option<SyncedImage>,
}

fn default_command() -> String {
    "proxy".to_string()
}

impl PersonaBot {
    pub fn new(bot_id: Snowflake, token: BotToken, public_key: &str) -> Self {
        Self {
            bot_id,
            token,
            public_key: public_key.to_string(),
            command: default_command(),
            guilds: BTreeSet::new(),
            synced_avatar: None,
            synced_banner: None,
        }
    }
}

/// A persona
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
    #[serde(default)]
    pub bio: String,
    /// Proxy tags in declaration order
    #[serde(default)]
    pub tags: Vec<ProxyTag>,
    #[serde(default)]
    pub bot: Option<PersonaBot>,
}

impl Member {
    pub fn new(name: &str) -> Self {
        Self {
            id: MemberId::new(),
            name: name.to_string(),
            avatar_url: None,
            banner_url: None,
            bio: String::new(),
            tags: Vec::new(),
            bot: None,
        }
    }

    pub fn with_tag(mut self, tag: ProxyTag) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_avatar(mut self, url: &str) -> Self {
        self.avatar_url = Some(url.to_string());
        self
    }

    pub fn with_bot(mut self, bot: PersonaBot) -> Self {
        self.bot = Some(bot);
        self
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }
        if self.tags.len() > MAX_PROXY_TAGS {
            return Err(ModelError::TooManyTags(self.tags.len()));
        }
        self.tags.iter().try_for_each(ProxyTag::validate)
    }

    /// The bot binding when the bot is installed in `guild_id`
    pub fn bot_in_guild(&self, guild_id: Snowflake) -> Option<&PersonaBot> {
        self.bot.as_ref().filter(|bot| bot.guilds.contains(&guild_id))
    }
}

/// A named collection of members
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    /// Appended to member names when proxying
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Channels the group may proxy in; empty means everywhere
    #[serde(default)]
    pub channels: BTreeSet<Snowflake>,
    /// Owning accounts
    #[serde(default)]
    pub accounts: BTreeSet<AccountId>,
    /// Platform users the group is shared with
    #[serde(default)]
    pub users: BTreeSet<Snowflake>,
    /// Members in declaration order
    #[serde(default)]
    pub members: Vec<MemberId>,
}

impl Group {
    pub fn new(name: &str, owner: AccountId) -> Self {
        Self {
            id: GroupId::new(),
            name: name.to_string(),
            tag: None,
            avatar_url: None,
            channels: BTreeSet::new(),
            accounts: BTreeSet::from([owner]),
            users: BTreeSet::new(),
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, member: MemberId) -> Self {
        if !self.members.contains(&member) {
            self.members.push(member);
        }
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    pub fn restricted_to(mut self, channel_id: Snowflake) -> Self {
        self.channels.insert(channel_id);
        self
    }

    /// Whether a channel (given with its ancestors) is open to this group
    pub fn allows_channel(&self, ancestry: &[Snowflake]) -> bool {
        self.channels.is_empty() || ancestry.iter().any(|id| self.channels.contains(id))
    }

    pub fn contains(&self, member: MemberId) -> bool {
        self.members.contains(&member)
    }

    /// Every member id must resolve, and every display name must fit
    pub fn validate(&self, members: &[Member]) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }

        for member_id in &self.members {
            let member = members
                .iter()
                .find(|member| member.id == *member_id)
                .ok_or(ModelError::UnknownMember(*member_id))?;

            let len = joined_name(&member.name, self.tag.as_deref()).chars().count();
            if len > DISPLAY_NAME_LIMIT {
                return Err(ModelError::DisplayNameTooLong(len));
            }
        }

        Ok(())
    }
}

/// How a reply to another message is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFormat {
    None,
    #[default]
    Inline,
    Embed,
}

/// Per-account preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    #[serde(default)]
    pub reply_format_guild: ReplyFormat,
    #[serde(default)]
    pub reply_format_dm: ReplyFormat,
    /// Append the group tag to persona bot usernames
    #[serde(default = "yes")]
    pub include_group_tag: bool,
    /// The user runs their own interaction endpoint for persona bots
    #[serde(default)]
    pub self_hosted: bool,
    /// Append the attribution footer to persona bot bios
    #[serde(default = "yes")]
    pub attribution: bool,
}

fn yes() -> bool {
    true
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            reply_format_guild: ReplyFormat::Inline,
            reply_format_dm: ReplyFormat::Inline,
            include_group_tag: true,
            self_hosted: false,
            attribution: true,
        }
    }
}

impl AccountConfig {
    pub fn reply_format(&self, direct_message: bool) -> ReplyFormat {
        if direct_message {
            self.reply_format_dm
        } else {
            self.reply_format_guild
        }
    }
}

/// One identity spanning one or more platform users
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub users: BTreeSet<Snowflake>,
    #[serde(default)]
    pub config: AccountConfig,
}

impl Account {
    pub fn new(user_id: Snowflake) -> Self {
        Self {
            id: AccountId::new(),
            users: BTreeSet::from([user_id]),
            config: AccountConfig::default(),
        }
    }
}

static RESERVED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(c)(lyde)").expect("static regex"));

fn joined_name(name: &str, group_tag: Option<&str>) -> String {
    match group_tag.map(str::trim).filter(|tag| !tag.is_empty()) {
        Some(tag) => format!("{name} {tag}"),
        None => name.to_string(),
    }
}

/// Name shown on a proxied message: member name plus group tag, with the
/// platform-reserved word broken up, clipped to the display limit
pub fn display_name(name: &str, group_tag: Option<&str>) -> String {
    let joined = joined_name(name, group_tag);
    RESERVED_NAME
        .replace_all(&joined, "${1}\u{200A}${2}")
        .chars()
        .take(DISPLAY_NAME_LIMIT)
        .collect()
}
