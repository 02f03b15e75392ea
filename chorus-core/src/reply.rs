//! Reply annotation and mention control for proxied messages
//!
//! Relay endpoints cannot post native replies, so a reply is rendered either
//! inline (a one-line quote above the content) or as an embed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::snowflake::vec_str;
use crate::{InboundMessage, ReplyFormat, Snowflake, MESSAGE_CONTENT_LIMIT, REPLY_PREVIEW_CHARS};

/// Side colour of reply embeds
pub const REPLY_EMBED_COLOR: u32 = 0x7289da;

static MARKDOWN_SPANS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\*([^*]+)\*",
        r"_([^_]+)_",
        r"\*\*([^*]+)\*\*",
        r"__([^_]+)__",
        r"~~([^~]+)~~",
        r"`([^`]+)`",
        r"```[\s\S]+?```",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("static regex"))
    .collect()
});

static USER_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@!?(\d+)>").expect("static regex"));

static ROLE_MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<@&(\d+)>").expect("static regex"));

static INLINE_REPLY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^-# \[\u{21AA}\]\(<https?://[^/]+/channels/(?:\d+|@me)/\d+/\d+>\)")
        .expect("static regex")
});

/// Base URLs used to build jump links and avatar links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkBases {
    pub web: String,
    pub cdn: String,
}

impl Default for LinkBases {
    fn default() -> Self {
        Self {
            web: "https://discord.com".to_string(),
            cdn: "https://cdn.discordapp.com".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedAuthor {
    pub name: String,
    pub icon_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEmbed {
    pub author: EmbedAuthor,
    pub color: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyAnnotation {
    /// Replacement content with the quote prepended. Users mentioned inside
    /// the quoted preview must not be pinged.
    Inline {
        content: String,
        quiet_users: Vec<Snowflake>,
    },
    Embed(ReplyEmbed),
}

/// Remove markdown spans, then escape the remaining markdown characters
pub fn escape_markdown(text: &str) -> String {
    let stripped = MARKDOWN_SPANS.iter().fold(text.to_string(), |acc, span| {
        span.replace_all(&acc, "$1").into_owned()
    });

    let mut escaped = String::with_capacity(stripped.len());
    let mut previous = None;
    for ch in stripped.chars() {
        if matches!(ch, '*' | '_' | '~' | '`') && previous != Some('\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
        previous = Some(ch);
    }
    escaped
}

fn preview(text: &str) -> String {
    if text.chars().count() <= REPLY_PREVIEW_CHARS {
        return text.to_string();
    }
    let head: String = text.chars().take(REPLY_PREVIEW_CHARS).collect();
    format!("{}\u{2026}", head.trim())
}

fn author_avatar(reference: &InboundMessage, cdn: &str) -> String {
    match &reference.author {
        Some(author) => match &author.avatar {
            Some(hash) => {
                let ext = if hash.starts_with("a_") { "gif" } else { "png" };
                format!("{cdn}/avatars/{}/{hash}.{ext}", author.id)
            }
            None => author.avatar_url(cdn),
        },
        None => format!("{cdn}/embed/avatars/0.png"),
    }
}

fn inline(content: &str, reference: &InboundMessage, links: &LinkBases) -> (String, Vec<Snowflake>) {
    let jump = reference.jump_url(&links.web);
    let mention = match (&reference.author, reference.webhook_id) {
        (Some(author), None) => format!("<@{}>", author.id),
        (Some(author), Some(_)) => format!("`@{}`", author.display()),
        (None, _) => String::new(),
    };

    let mut quoted = reference.content.clone();
    if INLINE_REPLY_HEADER.is_match(&quoted) {
        quoted = quoted.split('\n').skip(1).collect::<Vec<_>>().join("\n");
    }
    let quoted = escape_markdown(&preview(&quoted.replace('\n', " "))).replace("://", ":/\u{200B}/");

    let quoted = if !quoted.is_empty() {
        quoted
    } else if !reference.attachments.is_empty() {
        format!("[*Click to see attachment*](<{jump}>)")
    } else {
        format!("[*Click to see message*](<{jump}>)")
    };

    let quiet = mentioned_users(&quoted);
    (format!("-# [\u{21AA}](<{jump}>) {mention} {quoted}\n{content}"), quiet)
}

fn embed(reference: &InboundMessage, links: &LinkBases) -> ReplyEmbed {
    let jump = reference.jump_url(&links.web);
    let name = reference
        .author
        .as_ref()
        .map(|author| author.display().to_string())
        .unwrap_or_default();
    let quoted = preview(&reference.content);
    let attachments = reference.attachments.len();

    let description = if !quoted.trim().is_empty() {
        let clip = if attachments > 0 { "\u{2709}\u{FE0F} " } else { "" };
        format!("{clip}**[Reply to:]({jump})** {quoted}")
    } else if attachments > 0 {
        let plural = if attachments == 1 { "" } else { "s" };
        format!("*[click to see attachment{plural}]({jump})*")
    } else {
        format!("*[click to see message]({jump})*")
    };

    ReplyEmbed {
        author: EmbedAuthor {
            name: format!("{name} \u{21A9}\u{FE0F}"),
            icon_url: author_avatar(reference, &links.cdn),
        },
        color: REPLY_EMBED_COLOR,
        description,
    }
}

/// Render the reply to `reference` for a proxied message carrying `content`.
///
/// Inline is used unless disabled or unless the combined text would exceed
/// the message cap, in which case the embed form is returned.
pub fn annotate_reply(
    content: &str,
    reference: &InboundMessage,
    format: ReplyFormat,
    links: &LinkBases,
) -> Option<ReplyAnnotation> {
    match format {
        ReplyFormat::None => None,
        ReplyFormat::Inline => {
            let (combined, quiet_users) = inline(content, reference, links);
            if combined.chars().count() > MESSAGE_CONTENT_LIMIT {
                Some(ReplyAnnotation::Embed(embed(reference, links)))
            } else {
                Some(ReplyAnnotation::Inline {
                    content: combined,
                    quiet_users,
                })
            }
        }
        ReplyFormat::Embed => Some(ReplyAnnotation::Embed(embed(reference, links))),
    }
}

/// Mention rules attached to an outgoing message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedMentions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parse: Vec<String>,
    #[serde(default, with = "vec_str")]
    pub users: Vec<Snowflake>,
    #[serde(default, with = "vec_str")]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub replied_user: bool,
}

fn mentioned_users(text: &str) -> Vec<Snowflake> {
    let mut ids: Vec<Snowflake> = USER_MENTION
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Users and roles pinged by `content`, minus `quiet`.
///
/// `replied_author` is the author of the replied-to message when the original
/// pinged them; relay posts carry no native reply, so the ping goes through
/// `users`. `@everyone` and `@here` are parsed only when the content uses them.
pub fn allowed_mentions(content: &str, replied_author: Option<Snowflake>, quiet: &[Snowflake]) -> AllowedMentions {
    let mut roles: Vec<Snowflake> = ROLE_MENTION
        .captures_iter(content)
        .filter_map(|caps| caps[1].parse().ok())
        .collect();
    roles.sort_unstable();
    roles.dedup();

    let mut users = mentioned_users(content);
    users.retain(|id| !quiet.contains(id));
    roles.retain(|id| !quiet.contains(id));
    if let Some(author) = replied_author {
        if !users.contains(&author) {
            users.push(author);
            users.sort_unstable();
        }
    }

    let parse = if content.contains("@everyone") || content.contains("@here") {
        vec!["everyone".to_string()]
    } else {
        Vec::new()
    };

    AllowedMentions {
        parse,
        users,
        roles,
        replied_user: replied_author.is_some(),
    }
}

/// The replied-to author, when the original message pinged them
pub fn pinged_reply_author(message: &InboundMessage) -> Option<Snowflake> {
    let author = message.referenced_message.as_ref()?.author.as_ref()?;
    message
        .mentions
        .iter()
        .any(|user| user.id == author.id)
        .then_some(author.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Author;

    fn reference(content: &str) -> InboundMessage {
        serde_json::from_value(serde_json::json!({
            "id": "3",
            "channel_id": "2",
            "guild_id": "1",
            "author": {"id": "42", "username": "bob", "global_name": "Bobby"},
            "content": content,
        }))
        .unwrap()
    }

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("*bold* and _it_"), "bold and it");
        assert_eq!(escape_markdown("a*b"), "a\\*b");
        assert_eq!(escape_markdown("a\\*b"), "a\\*b");
    }

    #[test]
    fn test_inline_reply() {
        let links = LinkBases::default();
        let annotation =
            annotate_reply("my answer", &reference("see https://x.io <@7>"), ReplyFormat::Inline, &links)
                .unwrap();
        match annotation {
            ReplyAnnotation::Inline { content, quiet_users } => {
                assert_eq!(
                    content,
                    "-# [\u{21AA}](<https://discord.com/channels/1/2/3>) <@42> see https:/\u{200B}/x.io <@7>\nmy answer"
                );
                assert_eq!(quiet_users, vec![7]);
            }
            other => panic!("expected inline, got {other:?}"),
        }
    }

    #[test]
    fn test_inline_preview_is_clipped() {
        let long = "word ".repeat(40);
        let annotation =
            annotate_reply("x", &reference(&long), ReplyFormat::Inline, &LinkBases::default()).unwrap();
        let ReplyAnnotation::Inline { content, .. } = annotation else {
            panic!("expected inline");
        };
        assert!(content.contains('\u{2026}'));
        assert!(!content.contains(&long));
    }

    #[test]
    fn test_overflow_falls_back_to_embed() {
        let content = "a".repeat(1990);
        let annotation =
            annotate_reply(&content, &reference("hi"), ReplyFormat::Inline, &LinkBases::default()).unwrap();
        match annotation {
            ReplyAnnotation::Embed(embed) => {
                assert_eq!(embed.color, REPLY_EMBED_COLOR);
                assert_eq!(embed.author.name, "Bobby \u{21A9}\u{FE0F}");
                assert!(embed.description.starts_with("**[Reply to:]"));
            }
            other => panic!("expected embed, got {other:?}"),
        }
    }

    #[test]
    fn test_disabled_and_embed_formats() {
        let links = LinkBases::default();
        assert_eq!(annotate_reply("x", &reference("hi"), ReplyFormat::None, &links), None);
        let mut empty = reference("");
        empty.author = Some(Author {
            id: 42,
            username: "bob".into(),
            global_name: None,
            avatar: Some("a_abc".into()),
            bot: false,
        });
        let Some(ReplyAnnotation::Embed(embed)) = annotate_reply("x", &empty, ReplyFormat::Embed, &links) else {
            panic!("expected embed");
        };
        assert_eq!(embed.description, "*[click to see message](https://discord.com/channels/1/2/3)*");
        assert!(embed.author.icon_url.ends_with("/avatars/42/a_abc.gif"));
    }

    #[test]
    fn test_nested_inline_header_is_dropped() {
        let nested = reference("-# [\u{21AA}](<https://discord.com/channels/1/2/1>) <@9> old\nnew text");
        let Some(ReplyAnnotation::Inline { content, .. }) =
            annotate_reply("x", &nested, ReplyFormat::Inline, &LinkBases::default())
        else {
            panic!("expected inline");
        };
        assert!(content.contains("<@42> new text\nx"));
    }

    #[test]
    fn test_allowed_mentions() {
        let mentions = allowed_mentions("<@1> <@!2> <@&3> <@1>", None, &[2]);
        assert_eq!(mentions.users, vec![1]);
        assert_eq!(mentions.roles, vec![3]);
        assert!(mentions.parse.is_empty());
        assert!(!mentions.replied_user);

        let json = serde_json::to_value(&mentions).unwrap();
        assert_eq!(json["users"][0], "1");

        let everyone = allowed_mentions("hey @here", None, &[]);
        assert_eq!(everyone.parse, vec!["everyone".to_string()]);
    }

    #[test]
    fn test_pinged_reply_author_is_allowed() {
        let mut message = reference("agreed");
        message.referenced_message = Some(Box::new(reference("what do you think?")));
        assert_eq!(pinged_reply_author(&message), None);

        message.mentions = vec![Author {
            id: 42,
            username: "bob".into(),
            global_name: None,
            avatar: None,
            bot: false,
        }];
        assert_eq!(pinged_reply_author(&message), Some(42));

        // the author is quiet inside the quoted preview but still pinged by the reply
        let mentions = allowed_mentions("<@5> agreed", pinged_reply_author(&message), &[42]);
        assert_eq!(mentions.users, vec![5, 42]);
        assert!(mentions.replied_user);
    }
}
