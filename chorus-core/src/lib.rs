//! Chorus Core - domain model and pure routing logic
//!
//! This crate provides the foundational primitives:
//! - Personas (members), groups and accounts with their proxy tags
//! - Autoproxy sessions and provenance records
//! - The inbound event envelope and its explicit-discriminant decoder
//! - Tag matching and the session-aware resolver
//! - Reply annotation, mention and emoji token handling
//! - Channel permissions and upload limits

pub mod snowflake;
pub mod model;
pub mod session;
pub mod provenance;
pub mod event;
pub mod tags;
pub mod resolver;
pub mod reply;
pub mod emoji;
pub mod channel;
pub mod limits;

pub use snowflake::{created_at, Snowflake};
pub use model::*;
pub use session::*;
pub use provenance::*;
pub use event::*;
pub use tags::*;
pub use resolver::*;
pub use reply::*;
pub use emoji::*;
pub use channel::*;
pub use limits::*;

/// Platform cap on message content, in characters
pub const MESSAGE_CONTENT_LIMIT: usize = 2000;

/// Platform cap on a display name, in characters
pub const DISPLAY_NAME_LIMIT: usize = 80;

/// Maximum proxy tags a member may declare
pub const MAX_PROXY_TAGS: usize = 15;

/// Maximum length of a tag prefix or suffix
pub const MAX_TAG_AFFIX_LEN: usize = 50;

/// Characters of the referenced message shown in an inline reply
pub const REPLY_PREVIEW_CHARS: usize = 75;

/// Leading marker that suppresses proxying for one message
pub const ESCAPE_MARKER: char = '\\';
