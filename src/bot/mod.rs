//! Telegram-facing layer: request dispatch, upload sink and resilient
//! messaging helpers.

/// Command and message routing
pub mod handlers;
/// Retry wrappers for Telegram API operations
pub mod resilient;
/// Upload sink and progress reporter backed by Telegram
pub mod sink;

pub use handlers::RequestDispatcher;
