//! Proxy tag matching

use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

use crate::{Member, ProxyTag};

/// Compiled program size cap for user-supplied tag patterns
pub const TAG_REGEX_SIZE_LIMIT: usize = 1 << 16;

/// Mentions, channel links, custom emoji, slash command links and
/// angle-bracketed URLs. A tag boundary may never cut through one of these.
pub static PROTECTED_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:(?:[@#]|sound:|:[\S_]+|/(?:\w+ ?){1,3}:)\d+|https?://[^\s]+)>")
        .expect("static regex")
});

/// A successful tag match on a member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMatch {
    /// Index into the member's tag list
    pub tag_index: usize,
    /// Message text with prefix and suffix removed
    pub content: String,
}

fn tag_pattern(tag: &ProxyTag) -> Option<Regex> {
    let (prefix, suffix) = if tag.regex {
        (tag.prefix.clone(), tag.suffix.clone())
    } else {
        (regex::escape(&tag.prefix), regex::escape(&tag.suffix))
    };

    RegexBuilder::new(&format!(r"^(?:{prefix})([\s\S]*)(?:{suffix})$"))
        .case_insensitive(!tag.case_sensitive)
        .size_limit(TAG_REGEX_SIZE_LIMIT)
        .build()
        .ok()
}

/// Match one tag against message text.
///
/// Empty inner text only counts when the message carries attachments.
pub fn match_tag(tag: &ProxyTag, text: &str, has_attachments: bool) -> Option<String> {
    if tag.prefix.is_empty() && tag.suffix.is_empty() {
        return None;
    }

    let captures = tag_pattern(tag)?.captures(text)?;
    let inner = captures.get(1)?;
    if inner.as_str().is_empty() && !has_attachments {
        return None;
    }

    let prefix_end = inner.start();
    let suffix_start = inner.end();
    let splits_token = PROTECTED_TOKEN.find_iter(text).any(|token| {
        (prefix_end > 0 && token.start() < prefix_end)
            || (suffix_start < text.len() && token.end() > suffix_start)
    });

    (!splits_token).then(|| inner.as_str().to_string())
}

/// First tag of `member` that matches, in declaration order
pub fn match_member(member: &Member, text: &str, has_attachments: bool) -> Option<TagMatch> {
    member.tags.iter().enumerate().find_map(|(tag_index, tag)| {
        match_tag(tag, text, has_attachments).map(|content| TagMatch { tag_index, content })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_and_suffix() {
        assert_eq!(match_tag(&ProxyTag::prefix("s:"), "s:hello there", false).as_deref(), Some("hello there"));
        assert_eq!(match_tag(&ProxyTag::suffix("-s"), "hi-s", false).as_deref(), Some("hi"));
        assert_eq!(match_tag(&ProxyTag::new("[", "]"), "[both]", false).as_deref(), Some("both"));
        assert_eq!(match_tag(&ProxyTag::prefix("s:"), "hello s:", false), None);
    }

    #[test]
    fn test_case_sensitivity() {
        assert!(match_tag(&ProxyTag::prefix("S:"), "s:hi", false).is_some());
        assert!(match_tag(&ProxyTag::prefix("S:").with_case_sensitive(), "s:hi", false).is_none());
    }

    #[test]
    fn test_literal_tags_are_escaped() {
        assert!(match_tag(&ProxyTag::prefix("."), "xhi", false).is_none());
        assert!(match_tag(&ProxyTag::prefix("."), ".hi", false).is_some());
    }

    #[test]
    fn test_regex_tags() {
        let tag = ProxyTag::prefix(r"s\d:").with_regex();
        assert_eq!(match_tag(&tag, "s4:yo", false).as_deref(), Some("yo"));
        let broken = ProxyTag::prefix("(").with_regex();
        assert_eq!(match_tag(&broken, "(yo", false), None);
    }

    #[test]
    fn test_empty_content_needs_attachments() {
        let tag = ProxyTag::prefix("s:");
        assert_eq!(match_tag(&tag, "s:", false), None);
        assert_eq!(match_tag(&tag, "s:", true).as_deref(), Some(""));
    }

    #[test]
    fn test_never_splits_mentions() {
        assert_eq!(match_tag(&ProxyTag::prefix("<@123"), "<@123>text", false), None);
        assert_eq!(match_tag(&ProxyTag::suffix("456>"), "hey <@456>", false), None);
        assert_eq!(match_tag(&ProxyTag::prefix("<"), "<https://example.com>", false), None);
        // whole tokens inside the content are fine
        assert_eq!(
            match_tag(&ProxyTag::prefix("s:"), "s:<@123> hi", false).as_deref(),
            Some("<@123> hi")
        );
    }

    #[test]
    fn test_member_first_tag_wins() {
        let member = Member::new("Steve")
            .with_tag(ProxyTag::prefix("s"))
            .with_tag(ProxyTag::prefix("s:"));
        let matched = match_member(&member, "s:hi", false).unwrap();
        assert_eq!(matched.tag_index, 0);
        assert_eq!(matched.content, ":hi");
    }
}
