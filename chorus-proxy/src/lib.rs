//! Chorus Proxy
//!
//! The asynchronous components between a decoded event and its visible effect:
//! - **Stores**: persona, session, provenance and TTL stores behind traits
//! - **Platform**: the platform calls the components need, behind a trait
//! - **Directory**: cached channels, guilds and computed permissions
//! - **Registry**: discovers, creates and heals the relay endpoint per channel
//! - **Resolver**: loads candidates and sessions, applies latch writes
//! - **Dispatcher**: delete plus recreate through a relay endpoint or a persona bot
//! - **Sync**: reconciles persona bot configuration with the platform

pub mod store;
pub mod platform;
pub mod diagnostics;
pub mod directory;
pub mod registry;
pub mod resolve;
pub mod rehost;
pub mod dispatch;
pub mod commands;
pub mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use store::*;
pub use platform::*;
pub use diagnostics::*;
pub use directory::*;
pub use registry::*;
pub use resolve::*;
pub use rehost::*;
pub use dispatch::*;
pub use commands::*;
pub use sync::*;
