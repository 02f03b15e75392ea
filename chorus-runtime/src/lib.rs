//! Chorus Runtime
//!
//! Turns signed deliveries into proxy work:
//! - **Authenticator**: verifies each delivery against the addressed identity's key
//! - **Deduplicator**: at-most-once processing across replicas via set-if-absent
//! - **Router**: a routing table from event kind to handler, built once at startup
//! - **Handlers**: proxy on create and eligible edits, delete on the author's reaction, track installs
//! - **Supervisor**: owns background work spawned by handlers and drains it on shutdown
//! - **Server**: the HTTP intake that acknowledges within the delivery window

pub mod config;
pub mod auth;
pub mod dedup;
pub mod router;
pub mod handlers;
pub mod supervisor;
pub mod retention;
pub mod server;
pub mod runtime;

#[cfg(test)]
mod testbed;

pub use config::*;
pub use auth::*;
pub use dedup::*;
pub use router::*;
pub use handlers::*;
pub use supervisor::*;
pub use retention::*;
pub use server::*;
pub use runtime::*;

#[cfg(test)]
pub(crate) use testbed::TestBed;
