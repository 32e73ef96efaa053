//! TeraBox leech bot: relays files behind TeraBox share links to Telegram.
//!
//! A share link is resolved to a direct download URL through an external
//! resolver API, streamed to a local staging file with progress reporting,
//! re-uploaded to the requesting chat, and the staging file is removed.

/// Telegram handlers, upload sink and resilient messaging
pub mod bot;
/// Configuration and settings management
pub mod config;
/// Liveness HTTP endpoint
pub mod health;
/// Long-poll connection supervisor
pub mod poll;
/// Download/upload/cleanup pipeline
pub mod relay;
/// Share-link resolver adapter
pub mod resolver;
/// Retry and formatting helpers
pub mod utils;
