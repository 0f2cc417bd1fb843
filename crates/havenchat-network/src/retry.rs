//! Bounded retry wrapper for RPC calls.
//!
//! Every outermost RPC — storage-RPC invocations and open-group REST
//! calls alike — runs through [`with_retries`]. Errors that are fatal
//! to the call ([`HavenchatError::is_fatal_for_call`]) surface
//! immediately: their side effects (swarm eviction, difficulty
//! update, token clear) have already been applied, and the caller
//! must react before re-entering.

use std::future::Future;

use havenchat_types::{HavenchatError, Result};

/// Runs `call` up to `max_attempts` times, returning the first
/// success or the last error. Fatal errors short-circuit.
pub async fn with_retries<T, F, Fut>(operation: &str, max_attempts: u32, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal_for_call() => {
                tracing::debug!(operation, attempt, %e, "fatal error, not retrying");
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(operation, attempt, max_attempts, %e, "attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        HavenchatError::generic(format!("{operation}: retry wrapper made no attempts"))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn returns_first_success() {
        let calls = AtomicU32::new(0);
        let result = with_retries("op", 8, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(HavenchatError::HttpRequestFailed {
                        status: 500,
                        body: None,
                    })
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.expect("succeeds on third attempt"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("op", 3, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HavenchatError::generic("still down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("op", 8, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HavenchatError::SnodeMigrated) }
        })
        .await;
        assert!(matches!(result, Err(HavenchatError::SnodeMigrated)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn token_expired_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("op", 8, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(HavenchatError::TokenExpired) }
        })
        .await;
        assert!(matches!(result, Err(HavenchatError::TokenExpired)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
