//! Picks the persona that speaks for a message
//!
//! Resolution is pure: it reads candidates and sessions and returns both the
//! outcome and the session write the caller must persist (latching, or a
//! cleared selection).

use chrono::{DateTime, Utc};
use std::fmt;

use crate::session::effective_session;
use crate::{
    match_member, AutoproxyMode, AutoproxySession, Group, Member, MemberId, ProxyReason,
    ProxyTag, SessionScope, Snowflake, ESCAPE_MARKER,
};

/// A group the author may proxy with, together with its members in
/// declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateGroup {
    pub group: Group,
    pub members: Vec<Member>,
}

impl CandidateGroup {
    pub fn new(group: Group, mut members: Vec<Member>) -> Self {
        members.retain(|member| group.contains(member.id));
        members.sort_by_key(|member| {
            group
                .members
                .iter()
                .position(|id| *id == member.id)
                .unwrap_or(usize::MAX)
        });
        Self { group, members }
    }
}

#[derive(Debug, Clone)]
pub struct ResolveRequest<'a> {
    pub author_id: Snowflake,
    /// The channel followed by its parents (thread, channel, category)
    pub channel_ancestry: &'a [Snowflake],
    pub content: &'a str,
    pub has_attachments: bool,
    pub candidates: &'a [CandidateGroup],
    pub global_session: Option<&'a AutoproxySession>,
    pub local_session: Option<&'a AutoproxySession>,
    pub now: DateTime<Utc>,
}

/// The chosen speaker
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub member: Member,
    pub group: Group,
    /// Content to post, tags stripped when a tag matched
    pub content: String,
    pub reason: ProxyReason,
}

impl Selection {
    /// Matched tag, when the selection came from one
    pub fn tag(&self) -> Option<&ProxyTag> {
        match self.reason {
            ProxyReason::Tag { index } => self.member.tags.get(index),
            _ => None,
        }
    }

    /// Tag avatar, then member avatar, then group avatar
    pub fn avatar_url(&self) -> Option<&str> {
        self.tag()
            .and_then(|tag| tag.avatar_url.as_deref())
            .or(self.member.avatar_url.as_deref())
            .or(self.group.avatar_url.as_deref())
    }

    pub fn display_name(&self) -> String {
        crate::display_name(&self.member.name, self.group.tag.as_deref())
    }
}

/// Why nothing was proxied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCandidate {
    Escaped,
    NoGroups,
    RestrictedChannel,
    NoTagMatch,
    AutoproxyDisabled,
    SessionAwaitingSpeaker,
    SessionMemberUnavailable,
}

impl fmt::Display for NoCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NoCandidate::Escaped => "message starts with the escape marker",
            NoCandidate::NoGroups => "author has no groups",
            NoCandidate::RestrictedChannel => "every group is restricted to other channels",
            NoCandidate::NoTagMatch => "no proxy tag matched and no autoproxy is active",
            NoCandidate::AutoproxyDisabled => "autoproxy is disabled here",
            NoCandidate::SessionAwaitingSpeaker => "autoproxy is waiting for a tag to pick a speaker",
            NoCandidate::SessionMemberUnavailable => "autoproxy member is not available in this channel",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Proxy(Box<Selection>),
    Skip(NoCandidate),
}

/// Session mutation requested by a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionWrite {
    Select { scope: SessionScope, member: MemberId },
    ClearSelection { scope: SessionScope },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub outcome: Outcome,
    pub session_write: Option<SessionWrite>,
    /// Human-readable trace for the diagnostic log
    pub notes: Vec<String>,
}

impl Resolution {
    fn skip(reason: NoCandidate, notes: Vec<String>) -> Self {
        Self {
            outcome: Outcome::Skip(reason),
            session_write: None,
            notes,
        }
    }

    pub fn selection(&self) -> Option<&Selection> {
        match &self.outcome {
            Outcome::Proxy(selection) => Some(selection),
            Outcome::Skip(_) => None,
        }
    }
}

fn find_member<'a>(
    candidates: &[&'a CandidateGroup],
    member_id: MemberId,
) -> Option<(&'a Group, &'a Member)> {
    candidates.iter().copied().find_map(|candidate| {
        candidate
            .members
            .iter()
            .find(|member| member.id == member_id)
            .map(|member| (&candidate.group, member))
    })
}

fn selected(group: &Group, member: &Member, content: &str, reason: ProxyReason) -> Outcome {
    Outcome::Proxy(Box::new(Selection {
        member: member.clone(),
        group: group.clone(),
        content: content.to_string(),
        reason,
    }))
}

pub fn resolve(request: &ResolveRequest<'_>) -> Resolution {
    let mut notes = Vec::new();
    let session = effective_session(request.global_session, request.local_session, request.now);

    if let Some(session) = session {
        notes.push(format!(
            "{} autoproxy in {:?} mode",
            if session.scope.is_local() { "Local" } else { "Global" },
            session.mode
        ));
    }

    if let Some(rest) = request.content.strip_prefix(ESCAPE_MARKER) {
        notes.push("Escape marker present".to_string());
        let mut resolution = Resolution::skip(NoCandidate::Escaped, notes);

        if rest.starts_with(ESCAPE_MARKER) {
            if let Some(session) = session.filter(|s| s.is_enabled() && s.member.is_some()) {
                resolution
                    .notes
                    .push("Double escape marker clears the autoproxy speaker".to_string());
                resolution.session_write = Some(SessionWrite::ClearSelection {
                    scope: session.scope,
                });
            }
        }
        return resolution;
    }

    if request.candidates.is_empty() {
        notes.push("Author has no groups".to_string());
        return Resolution::skip(NoCandidate::NoGroups, notes);
    }

    let candidates: Vec<&CandidateGroup> = request
        .candidates
        .iter()
        .filter(|candidate| {
            let open = candidate.group.allows_channel(request.channel_ancestry);
            if !open {
                notes.push(format!(
                    "Group `{}` is restricted to other channels",
                    candidate.group.name
                ));
            }
            open
        })
        .collect();

    if candidates.is_empty() {
        return Resolution::skip(NoCandidate::RestrictedChannel, notes);
    }

    if let Some(session) = session.filter(|s| s.mode == AutoproxyMode::Locked) {
        if let Some((group, member)) = session.member.and_then(|id| find_member(&candidates, id)) {
            notes.push(format!("Locked to `{}`", member.name));
            return Resolution {
                outcome: selected(group, member, request.content, ProxyReason::Locked),
                session_write: None,
                notes,
            };
        }
    }

    for candidate in &candidates {
        for member in &candidate.members {
            let Some(matched) = match_member(member, request.content, request.has_attachments) else {
                continue;
            };

            notes.push(format!(
                "Matched proxy tag {} of `{}`",
                member.tags[matched.tag_index].label(),
                member.name
            ));

            let session_write = session
                .filter(|s| s.latches() && s.member != Some(member.id))
                .map(|s| SessionWrite::Select {
                    scope: s.scope,
                    member: member.id,
                });

            return Resolution {
                outcome: selected(
                    &candidate.group,
                    member,
                    &matched.content,
                    ProxyReason::Tag {
                        index: matched.tag_index,
                    },
                ),
                session_write,
                notes,
            };
        }
    }

    let Some(session) = session else {
        return Resolution::skip(NoCandidate::NoTagMatch, notes);
    };

    if !session.is_enabled() {
        return Resolution::skip(NoCandidate::AutoproxyDisabled, notes);
    }

    let Some(member_id) = session.member else {
        return Resolution::skip(NoCandidate::SessionAwaitingSpeaker, notes);
    };

    match find_member(&candidates, member_id) {
        Some((group, member)) if !request.content.is_empty() || request.has_attachments => {
            Resolution {
                outcome: selected(group, member, request.content, ProxyReason::Autoproxy),
                session_write: None,
                notes,
            }
        }
        Some(_) => Resolution::skip(NoCandidate::NoTagMatch, notes),
        None => Resolution::skip(NoCandidate::SessionMemberUnavailable, notes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AccountId, AutoproxyMode};

    struct Fixture {
        candidates: Vec<CandidateGroup>,
        steve: Member,
        alex: Member,
        cleo: Member,
    }

    fn fixture() -> Fixture {
        let steve = Member::new("Steve").with_tag(ProxyTag::prefix("s:"));
        let alex = Member::new("Alex").with_tag(ProxyTag::prefix("a:"));
        let cleo = Member::new("Cleo").with_tag(ProxyTag::suffix("-c"));
        let group = Group::new("System", AccountId::new())
            .with_member(steve.id)
            .with_member(alex.id)
            .with_member(cleo.id);
        let candidates = vec![CandidateGroup::new(
            group,
            vec![cleo.clone(), alex.clone(), steve.clone()],
        )];
        Fixture { candidates, steve, alex, cleo }
    }

    fn request<'a>(
        candidates: &'a [CandidateGroup],
        content: &'a str,
        global: Option<&'a AutoproxySession>,
        local: Option<&'a AutoproxySession>,
    ) -> ResolveRequest<'a> {
        ResolveRequest {
            author_id: 1,
            channel_ancestry: &[10, 20],
            content,
            has_attachments: false,
            candidates,
            global_session: global,
            local_session: local,
            now: Utc::now(),
        }
    }

    fn speaker(resolution: &Resolution) -> Option<(&str, &str)> {
        resolution
            .selection()
            .map(|s| (s.member.name.as_str(), s.content.as_str()))
    }

    #[test]
    fn test_tag_match_strips_content() {
        let f = fixture();
        let resolution = resolve(&request(&f.candidates, "s:hello there", None, None));
        assert_eq!(speaker(&resolution), Some(("Steve", "hello there")));
        assert_eq!(resolution.selection().unwrap().reason, ProxyReason::Tag { index: 0 });
        assert_eq!(resolution.session_write, None);
    }

    #[test]
    fn test_first_match_in_declaration_order_is_stable() {
        let first = Member::new("First").with_tag(ProxyTag::prefix("x"));
        let second = Member::new("Second").with_tag(ProxyTag::prefix("x:"));
        let group = Group::new("G", AccountId::new())
            .with_member(first.id)
            .with_member(second.id);

        for members in [vec![first.clone(), second.clone()], vec![second.clone(), first.clone()]] {
            let candidates = vec![CandidateGroup::new(group.clone(), members)];
            for _ in 0..3 {
                let resolution = resolve(&request(&candidates, "x:hi", None, None));
                assert_eq!(speaker(&resolution), Some(("First", ":hi")));
            }
        }
    }

    #[test]
    fn test_mention_split_is_rejected() {
        let member = Member::new("Mention").with_tag(ProxyTag::prefix("<@123"));
        let group = Group::new("G", AccountId::new()).with_member(member.id);
        let candidates = vec![CandidateGroup::new(group, vec![member])];
        let resolution = resolve(&request(&candidates, "<@123>text", None, None));
        assert_eq!(resolution.outcome, Outcome::Skip(NoCandidate::NoTagMatch));
    }

    #[test]
    fn test_local_session_overrides_global() {
        let f = fixture();
        let global = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Front)
            .with_member(f.alex.id);
        let local = AutoproxySession::new(1, SessionScope::Local(10), AutoproxyMode::Front)
            .with_member(f.cleo.id);

        let resolution = resolve(&request(&f.candidates, "just talking", Some(&global), Some(&local)));
        assert_eq!(speaker(&resolution), Some(("Cleo", "just talking")));
        assert_eq!(resolution.selection().unwrap().reason, ProxyReason::Autoproxy);
    }

    #[test]
    fn test_latch_follows_last_tag() {
        let f = fixture();
        let mut session = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Latch)
            .with_member(f.alex.id);

        let resolution = resolve(&request(&f.candidates, "hi-c", Some(&session), None));
        assert_eq!(speaker(&resolution), Some(("Cleo", "hi")));
        assert_eq!(
            resolution.session_write,
            Some(SessionWrite::Select { scope: SessionScope::Global, member: f.cleo.id })
        );

        session.member = Some(f.cleo.id);
        let next = resolve(&request(&f.candidates, "and again", Some(&session), None));
        assert_eq!(speaker(&next), Some(("Cleo", "and again")));
        assert_eq!(next.session_write, None);
    }

    #[test]
    fn test_front_does_not_latch() {
        let f = fixture();
        let session = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Front)
            .with_member(f.alex.id);
        let resolution = resolve(&request(&f.candidates, "s:yo", Some(&session), None));
        assert_eq!(speaker(&resolution), Some(("Steve", "yo")));
        assert_eq!(resolution.session_write, None);
    }

    #[test]
    fn test_locked_skips_tags() {
        let f = fixture();
        let session = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Locked)
            .with_member(f.alex.id);
        let resolution = resolve(&request(&f.candidates, "s:yo", Some(&session), None));
        assert_eq!(speaker(&resolution), Some(("Alex", "s:yo")));
        assert_eq!(resolution.selection().unwrap().reason, ProxyReason::Locked);
    }

    #[test]
    fn test_escape_markers() {
        let f = fixture();
        let session = AutoproxySession::new(1, SessionScope::Local(10), AutoproxyMode::Latch)
            .with_member(f.steve.id);

        let single = resolve(&request(&f.candidates, "\\text", None, Some(&session)));
        assert_eq!(single.outcome, Outcome::Skip(NoCandidate::Escaped));
        assert_eq!(single.session_write, None);

        let double = resolve(&request(&f.candidates, "\\\\text", None, Some(&session)));
        assert_eq!(double.outcome, Outcome::Skip(NoCandidate::Escaped));
        assert_eq!(
            double.session_write,
            Some(SessionWrite::ClearSelection { scope: SessionScope::Local(10) })
        );

        let tagged = resolve(&request(&f.candidates, "\\s:hi", None, None));
        assert_eq!(tagged.outcome, Outcome::Skip(NoCandidate::Escaped));
    }

    #[test]
    fn test_session_edge_cases() {
        let f = fixture();
        let waiting = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Latch);
        let resolution = resolve(&request(&f.candidates, "hello", Some(&waiting), None));
        assert_eq!(resolution.outcome, Outcome::Skip(NoCandidate::SessionAwaitingSpeaker));

        let ghost = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Front)
            .with_member(MemberId::new());
        let resolution = resolve(&request(&f.candidates, "hello", Some(&ghost), None));
        assert_eq!(resolution.outcome, Outcome::Skip(NoCandidate::SessionMemberUnavailable));

        let global = AutoproxySession::new(1, SessionScope::Global, AutoproxyMode::Front)
            .with_member(f.alex.id);
        let off = AutoproxySession::new(1, SessionScope::Local(10), AutoproxyMode::Disabled);
        let resolution = resolve(&request(&f.candidates, "hello", Some(&global), Some(&off)));
        assert_eq!(resolution.outcome, Outcome::Skip(NoCandidate::AutoproxyDisabled));

        // tags still work while autoproxy is off
        let resolution = resolve(&request(&f.candidates, "s:hello", Some(&global), Some(&off)));
        assert_eq!(speaker(&resolution), Some(("Steve", "hello")));
    }

    #[test]
    fn test_channel_restrictions() {
        let member = Member::new("Steve").with_tag(ProxyTag::prefix("s:"));
        let group = Group::new("G", AccountId::new())
            .with_member(member.id)
            .restricted_to(20);
        let candidates = vec![CandidateGroup::new(group.clone(), vec![member.clone()])];
        // 20 is the parent of thread 10
        assert!(resolve(&request(&candidates, "s:hi", None, None)).selection().is_some());

        let elsewhere = vec![CandidateGroup::new(group.restricted_to(30), vec![member])];
        let mut req = request(&elsewhere, "s:hi", None, None);
        req.channel_ancestry = &[40];
        assert_eq!(resolve(&req).outcome, Outcome::Skip(NoCandidate::RestrictedChannel));

        assert_eq!(resolve(&request(&[], "s:hi", None, None)).outcome, Outcome::Skip(NoCandidate::NoGroups));
    }

    #[test]
    fn test_avatar_precedence() {
        let member = Member::new("Steve")
            .with_avatar("member.png")
            .with_tag(ProxyTag::prefix("s:").with_avatar("tag.png"))
            .with_tag(ProxyTag::prefix("st:"));
        let mut group = Group::new("G", AccountId::new()).with_member(member.id);
        group.avatar_url = Some("group.png".into());
        let candidates = vec![CandidateGroup::new(group, vec![member])];

        let tagged = resolve(&request(&candidates, "s:hi", None, None));
        assert_eq!(tagged.selection().unwrap().avatar_url(), Some("tag.png"));
        let plain = resolve(&request(&candidates, "st:hi", None, None));
        assert_eq!(plain.selection().unwrap().avatar_url(), Some("member.png"));
    }
}
