//! Guarded invocation of old/new implementations.
//!
//! [`safe_invoke`] turns a panicking implementation into an
//! [`OperationError::Panicked`] so a misbehaving origin can never unwind
//! through the migration. [`timed_invoke`] additionally measures wall-clock
//! time around a single run of the operation.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures::FutureExt;

use crate::error::{MethodResult, OperationError};

/// Awaits `op`, converting a panic into a failed result.
///
/// Never panics itself.
pub async fn safe_invoke<T, F>(op: F) -> MethodResult<T>
where
    F: Future<Output = MethodResult<T>>,
{
    match AssertUnwindSafe(op).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(OperationError::panicked(panic_message(payload.as_ref()))),
    }
}

/// Runs `op` exactly once through [`safe_invoke`] and reports how long it
/// took.
pub async fn timed_invoke<T, F>(op: F) -> (MethodResult<T>, Duration)
where
    F: Future<Output = MethodResult<T>>,
{
    let start = Instant::now();
    let result = safe_invoke(op).await;
    (result, start.elapsed())
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_safe_invoke_passes_success_through() {
        let result = safe_invoke(async { Ok::<_, OperationError>(7) }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_safe_invoke_passes_failure_through() {
        let result: MethodResult<u8> =
            safe_invoke(async { Err(OperationError::failed("boom")) }).await;
        assert_eq!(result, Err(OperationError::failed("boom")));
    }

    #[tokio::test]
    async fn test_safe_invoke_captures_panic() {
        let result: MethodResult<u8> = safe_invoke(async { panic!("exploded") }).await;
        assert_eq!(result, Err(OperationError::panicked("exploded")));
    }

    #[tokio::test]
    async fn test_safe_invoke_captures_formatted_panic() {
        let id = 42;
        let result: MethodResult<u8> = safe_invoke(async move { panic!("row {id} missing") }).await;
        assert_eq!(result, Err(OperationError::panicked("row 42 missing")));
    }

    #[tokio::test]
    async fn test_timed_invoke_runs_once() {
        let calls = AtomicUsize::new(0);
        let (result, elapsed) = timed_invoke(async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, OperationError>("done")
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(elapsed >= Duration::from_millis(5));
    }
}
