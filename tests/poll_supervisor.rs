use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use teraleech::poll::{PollError, PollSupervisor, SupervisorError};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn conflict_four_times_then_success() {
    let supervisor = PollSupervisor::new(Duration::from_secs(2), 5);
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result = supervisor
        .run(|handle| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n <= 4 {
                    Err(PollError::Conflict("simulated conflict".to_string()))
                } else {
                    handle.mark_established();
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    // Backoff doubles from the 2s base: 2 + 4 + 8 + 16
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn persistent_conflict_is_fatal_after_budget() {
    let supervisor = PollSupervisor::new(Duration::from_secs(2), 5);
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result = supervisor
        .run(|_handle| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PollError::Conflict("simulated conflict".to_string())) }
        })
        .await;

    match result {
        Err(SupervisorError::RetriesExhausted { attempts }) => assert_eq!(attempts, 5),
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    // Exactly 5 attempts, never a 6th
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    // Sleeps happen between attempts only: 2 + 4 + 8 + 16
    assert_eq!(start.elapsed(), Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn establishment_resets_retry_budget() {
    let supervisor = PollSupervisor::new(Duration::from_secs(2), 5);
    let calls = AtomicU32::new(0);

    // 4 conflicts, then a session that connects before conflicting again,
    // then 3 more conflicts, then clean shutdown. Without the reset the
    // budget would already be exhausted on the 5th conflicting attempt.
    let result = supervisor
        .run(|handle| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                match n {
                    1..=4 => Err(PollError::Conflict("early conflict".to_string())),
                    5 => {
                        handle.mark_established();
                        Err(PollError::Conflict("conflict after connect".to_string()))
                    }
                    6..=8 => Err(PollError::Conflict("late conflict".to_string())),
                    _ => {
                        handle.mark_established();
                        Ok(())
                    }
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 9);
}

#[tokio::test(start_paused = true)]
async fn non_conflict_error_is_immediately_fatal() {
    let supervisor = PollSupervisor::new(Duration::from_secs(2), 5);
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    let result = supervisor
        .run(|_handle| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PollError::Fatal(anyhow::anyhow!("invalid token"))) }
        })
        .await;

    assert!(matches!(result, Err(SupervisorError::Fatal(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    // No backoff sleep before a fatal error propagates
    assert_eq!(start.elapsed(), Duration::ZERO);
}
