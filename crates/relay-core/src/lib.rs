//! ============================================================================
//! RELAY-CORE: X Account Authorization Relay
//! ============================================================================
//! Sends a browser through X's authorization flow, exchanges the returned
//! code for credentials and uses them to act on the authorizing account:
//! - OAuth 2.0 + PKCE or OAuth 1.0a (HMAC-SHA1) initiator and callback
//! - Single-use, time-limited state store
//! - Profile, avatar and tweet actions with chunked media upload
//! - Optional recurring like/retweet job on the stored credentials
//! ============================================================================

pub mod actions;
pub mod auth;
pub mod config;
pub mod engage;
pub mod executor;
pub mod pages;
pub mod poll;
pub mod relay;
pub mod server;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use types::*;
pub use actions::{DownstreamAction, FailurePolicy, FlowReport};
pub use config::{Protocol, RelayConfig};
pub use engage::{EngagementJob, TokenVault};
pub use relay::{Relay, RelayRequest, RelayResponse};
pub use server::serve;
pub use session::{MemorySessionStore, SessionStore};
