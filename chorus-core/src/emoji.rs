//! Custom emoji tokens in message content

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use crate::Snowflake;

static CUSTOM_EMOJI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(a)?:(\w{2,32}):(\d+)>").expect("static regex"));

/// A `<:name:id>` or `<a:name:id>` token
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EmojiToken {
    pub id: Snowflake,
    pub name: String,
    pub animated: bool,
}

impl EmojiToken {
    pub fn cdn_url(&self, cdn_base: &str) -> String {
        let ext = if self.animated { "gif" } else { "png" };
        format!("{cdn_base}/emojis/{}.{ext}", self.id)
    }

    /// Name for a rehosted copy; `suffix` keeps copies unique
    pub fn rehost_name(&self, suffix: u32) -> String {
        let head: String = self.name.chars().take(28).collect();
        format!("{head}_{suffix:03}")
    }
}

impl fmt::Display for EmojiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.animated { "a" } else { "" };
        write!(f, "<{prefix}:{}:{}>", self.name, self.id)
    }
}

/// Distinct custom emoji in `content`, in order of first appearance
pub fn custom_emojis(content: &str) -> Vec<EmojiToken> {
    let mut seen = Vec::<EmojiToken>::new();
    for caps in CUSTOM_EMOJI.captures_iter(content) {
        let Ok(id) = caps[3].parse() else {
            continue;
        };
        if seen.iter().any(|token| token.id == id) {
            continue;
        }
        seen.push(EmojiToken {
            id,
            name: caps[2].to_string(),
            animated: caps.get(1).is_some(),
        });
    }
    seen
}

/// Replace every token whose id is a key of `replacements`
pub fn substitute(content: &str, replacements: &HashMap<Snowflake, EmojiToken>) -> String {
    CUSTOM_EMOJI
        .replace_all(content, |caps: &regex::Captures<'_>| {
            caps[3]
                .parse::<Snowflake>()
                .ok()
                .and_then(|id| replacements.get(&id))
                .map(|token| token.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finds_distinct_tokens() {
        let found = custom_emojis("hi <:wave:11> <a:party:22> <:wave:11> <:x:33>");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], EmojiToken { id: 11, name: "wave".into(), animated: false });
        assert!(found[1].animated);
        assert_eq!(found[1].cdn_url("https://cdn"), "https://cdn/emojis/22.gif");
    }

    #[test]
    fn test_substitute() {
        let replacements = HashMap::from([(
            11,
            EmojiToken { id: 99, name: "wave_001".into(), animated: false },
        )]);
        assert_eq!(
            substitute("<:wave:11> <:keep:12>", &replacements),
            "<:wave_001:99> <:keep:12>"
        );
    }

    #[test]
    fn test_rehost_name() {
        let token = EmojiToken { id: 1, name: "a".repeat(32), animated: false };
        let name = token.rehost_name(7);
        assert_eq!(name.len(), 32);
        assert!(name.ends_with("_007"));
    }
}
