//! Long-poll connection supervisor.
//!
//! Keeps the bot's update stream alive despite transient conflicts with
//! other running instances of the same bot identity. A conflict is an HTTP
//! 409 from the backend, surfaced by teloxide as a typed
//! [`ApiError::TerminatedByOtherGetUpdates`] — the supervisor never parses
//! error text. Conflicts are retried with bounded exponential backoff; a
//! permanent conflict (two instances running) cannot self-resolve, so after
//! the budget is exhausted the supervisor reports fatal failure and stops.
//! Any non-conflict error is fatal immediately.

use crate::bot::RequestDispatcher;
use futures_util::StreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::update_listeners::{AsUpdateStream, Polling};
use teloxide::{ApiError, RequestError};
use thiserror::Error;
use tracing::{info, warn};

/// Error classification for one polling session.
#[derive(Debug, Error)]
pub enum PollError {
    /// Another consumer holds the same long-poll identity (HTTP 409)
    #[error("Connection conflict: {0}")]
    Conflict(String),
    /// Any other failure; not retried by the supervisor
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

/// Terminal supervisor failures.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Conflict persisted through every allowed attempt
    #[error("Gave up after {attempts} conflicting connection attempts")]
    RetriesExhausted {
        /// Number of conflicting attempts made
        attempts: u32,
    },
    /// A non-conflict error ended polling
    #[error("Polling failed: {0}")]
    Fatal(#[source] anyhow::Error),
}

/// Handle a session uses to signal that its connection was established.
///
/// Establishment resets the supervisor's attempt counter and backoff, so a
/// later transient conflict gets the full retry budget again.
#[derive(Clone, Debug, Default)]
pub struct SessionHandle(Arc<AtomicBool>);

impl SessionHandle {
    /// Mark the connection as successfully established.
    pub fn mark_established(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_established(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives polling sessions with bounded conflict retries.
pub struct PollSupervisor {
    base_backoff: Duration,
    max_attempts: u32,
}

impl PollSupervisor {
    /// Create a supervisor with the given backoff base and attempt budget.
    #[must_use]
    pub const fn new(base_backoff: Duration, max_attempts: u32) -> Self {
        Self {
            base_backoff,
            max_attempts,
        }
    }

    /// Run `connect` until it finishes cleanly, a non-conflict error occurs,
    /// or the conflict budget is exhausted.
    ///
    /// Each attempt receives a fresh [`SessionHandle`]; the backoff doubles
    /// after every conflict and resets when a session reports establishment.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::RetriesExhausted`] after `max_attempts` conflicting
    /// attempts; [`SupervisorError::Fatal`] for any other session failure.
    pub async fn run<F, Fut>(&self, mut connect: F) -> Result<(), SupervisorError>
    where
        F: FnMut(SessionHandle) -> Fut,
        Fut: Future<Output = Result<(), PollError>>,
    {
        let mut attempt = 0u32;
        let mut backoff = self.base_backoff;

        loop {
            let handle = SessionHandle::default();
            let result = connect(handle.clone()).await;

            if handle.is_established() {
                attempt = 0;
                backoff = self.base_backoff;
            }

            match result {
                Ok(()) => return Ok(()),
                Err(PollError::Conflict(detail)) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(SupervisorError::RetriesExhausted { attempts: attempt });
                    }
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_secs = backoff.as_secs(),
                        "Connection conflict, retrying: {detail}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(PollError::Fatal(e)) => return Err(SupervisorError::Fatal(e)),
            }
        }
    }
}

/// One long-poll session against the Telegram backend.
///
/// Clears any stale connection registration (dropping queued updates), then
/// consumes the update stream, spawning an independent task per inbound
/// update so one slow relay never blocks delivery of other messages.
/// Returns when the stream errors; runs until shutdown otherwise.
///
/// # Errors
///
/// [`PollError::Conflict`] on an identity conflict, [`PollError::Fatal`]
/// for everything else.
pub async fn poll_session(
    bot: Bot,
    dispatcher: Arc<RequestDispatcher>,
    handle: SessionHandle,
) -> Result<(), PollError> {
    bot.delete_webhook()
        .drop_pending_updates(true)
        .await
        .map_err(classify_request_error)?;

    // Probe getUpdates once so establishment is confirmed before the
    // supervisor's retry counter is reset. No offset is committed, so any
    // update seen here is re-delivered by the listener below.
    bot.get_updates()
        .limit(1)
        .await
        .map_err(classify_request_error)?;
    handle.mark_established();
    info!("Long-poll connection established");

    let mut listener = Polling::builder(bot)
        .timeout(Duration::from_secs(crate::config::POLL_TIMEOUT_SECS))
        .build();
    let stream = listener.as_stream();
    let mut stream = std::pin::pin!(stream);

    while let Some(item) = stream.next().await {
        match item {
            Ok(update) => {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    dispatcher.handle_update(update).await;
                });
            }
            Err(e) => return Err(classify_request_error(e)),
        }
    }

    Ok(())
}

/// Map a transport error onto the supervisor's taxonomy.
fn classify_request_error(e: RequestError) -> PollError {
    match e {
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => {
            PollError::Conflict("another getUpdates consumer is running".to_string())
        }
        other => PollError::Fatal(other.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_classification_is_typed() {
        let conflict = classify_request_error(RequestError::Api(
            ApiError::TerminatedByOtherGetUpdates,
        ));
        assert!(matches!(conflict, PollError::Conflict(_)));

        let fatal = classify_request_error(RequestError::Api(ApiError::BotBlocked));
        assert!(matches!(fatal, PollError::Fatal(_)));
    }
}
