//! Chorus HTTP Layer
//!
//! Talks to the chat platform's REST API:
//! - Bot-token authenticated client with capped, jittered exponential backoff
//! - Typed errors for 4xx responses
//! - Wire models and typed calls for relay endpoints, messages, emoji,
//!   applications, bot users and commands

pub mod client;
pub mod error;
pub mod models;
pub mod api;

pub use client::*;
pub use error::*;
pub use models::*;
