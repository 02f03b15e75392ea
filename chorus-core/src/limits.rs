//! Size limits enforced before a message is touched

use crate::{Attachment, MESSAGE_CONTENT_LIMIT};

const MIB: u64 = 1024 * 1024;

/// Most attachment bytes moved for a single proxied message
pub const MAX_PROXY_BYTES: u64 = 20 * MIB;

/// Upload limit of a guild by boost tier
pub fn upload_limit(premium_tier: u8) -> u64 {
    match premium_tier {
        2 => 50 * MIB,
        3 => 100 * MIB,
        _ => 10 * MIB,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitViolation {
    ContentTooLong { chars: usize },
    AttachmentsOverGuildLimit { total: u64, limit: u64 },
    AttachmentsOverProxyLimit { total: u64 },
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mb = |bytes: u64| bytes as f64 / MIB as f64;
        match self {
            LimitViolation::ContentTooLong { chars } => write!(
                f,
                "content is {chars} characters (max {MESSAGE_CONTENT_LIMIT})"
            ),
            LimitViolation::AttachmentsOverGuildLimit { total, limit } => write!(
                f,
                "attachments exceed {:.0} MB ({:.2} MB)",
                mb(*limit),
                mb(*total)
            ),
            LimitViolation::AttachmentsOverProxyLimit { total } => write!(
                f,
                "only {:.0} MB of attachments can be proxied at a time ({:.2} MB)",
                mb(MAX_PROXY_BYTES),
                mb(*total)
            ),
        }
    }
}

pub fn check_content(content: &str) -> Result<(), LimitViolation> {
    let chars = content.chars().count();
    if chars > MESSAGE_CONTENT_LIMIT {
        return Err(LimitViolation::ContentTooLong { chars });
    }
    Ok(())
}

pub fn check_attachments(attachments: &[Attachment], premium_tier: u8) -> Result<(), LimitViolation> {
    let total: u64 = attachments.iter().map(|a| a.size).sum();
    let limit = upload_limit(premium_tier);
    if total > limit {
        return Err(LimitViolation::AttachmentsOverGuildLimit { total, limit });
    }
    if total > MAX_PROXY_BYTES {
        return Err(LimitViolation::AttachmentsOverProxyLimit { total });
    }
    Ok(())
}
