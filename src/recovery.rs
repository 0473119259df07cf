//! Panic recovery for handler boundaries.
//!
//! A malformed downstream event or a bug in one RPC handler must not take
//! down the event loop — every dispatch entry point wraps its handler body
//! in `with_recovery`/`with_recovery_async` so a panic becomes a logged
//! `Error::Internal` instead of unwinding through the loop.

use crate::types::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};

pub fn with_recovery<F, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(operation)) {
        Ok(result) => result,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(operation = operation_name, panic = %panic_msg, "panic recovered");
            Err(Error::internal(format!(
                "panic in {operation_name}: {panic_msg}"
            )))
        }
    }
}

pub async fn with_recovery_async<F, Fut, T>(operation: F, operation_name: &str) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let future = operation();

    match catch_unwind(AssertUnwindSafe(|| future)) {
        Ok(fut) => fut.await,
        Err(panic_payload) => {
            let panic_msg = extract_panic_message(&panic_payload);
            tracing::error!(operation = operation_name, panic = %panic_msg, "async panic recovered");
            Err(Error::internal(format!(
                "async panic in {operation_name}: {panic_msg}"
            )))
        }
    }
}

fn extract_panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_passes_through() {
        let result = with_recovery(|| Ok(42), "test_op");
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn error_passes_through() {
        let result: Result<()> = with_recovery(|| Err(Error::internal("boom")), "test_op");
        assert!(result.is_err());
    }

    #[test]
    fn panic_becomes_internal_error() {
        let result: Result<()> = with_recovery(
            || {
                panic!("kaboom");
            },
            "test_op",
        );
        let err = result.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("test_op"));
        assert!(msg.contains("kaboom"));
    }

    #[tokio::test]
    async fn async_success_passes_through() {
        let result = with_recovery_async(|| async { Ok(7) }, "async_op").await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn async_panic_becomes_internal_error() {
        let result: Result<()> = with_recovery_async(
            || async {
                panic!("async kaboom");
            },
            "async_op",
        )
        .await;
        assert!(result.unwrap_err().to_string().contains("async kaboom"));
    }
}
