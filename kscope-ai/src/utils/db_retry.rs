//! Retry on SQLite lock contention
//!
//! Every stream worker and the stream log share one SQLite file, so a write
//! occasionally meets `SQLITE_BUSY` / `SQLITE_LOCKED` for a few milliseconds.
//! [`retry_on_lock`] re-runs the whole operation with exponential backoff.

use kscope_common::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Default total wait before a locked write gives up
pub const DEFAULT_MAX_LOCK_WAIT_MS: u64 = 5000;

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// SQLite primary result codes for busy and locked, plus extended BUSY_SNAPSHOT
const LOCK_CODES: [&str; 3] = ["5", "6", "517"];

/// Run `operation` until it succeeds, fails with a non-lock error, or `max_wait_ms` runs out
///
/// Backoff starts at 10ms and doubles up to one second. `operation` must be
/// safe to repeat: each call should open and commit its own transaction.
pub async fn retry_on_lock<F, Fut, T>(label: &str, max_wait_ms: u64, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let budget = Duration::from_millis(max_wait_ms);
    let mut backoff = Duration::from_millis(INITIAL_BACKOFF_MS);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;

        let err = match operation().await {
            Ok(value) => {
                if attempts > 1 {
                    debug!(label, attempts, waited_ms = started.elapsed().as_millis() as u64, "Lock cleared");
                }
                return Ok(value);
            }
            Err(err) if is_lock_error(&err) => err,
            Err(err) => return Err(err),
        };

        let waited = started.elapsed();
        if waited >= budget {
            error!(label, attempts, waited_ms = waited.as_millis() as u64, "Gave up waiting for database lock");
            return Err(Error::Internal(format!(
                "{}: database still locked after {} attempts over {} ms ({})",
                label,
                attempts,
                waited.as_millis(),
                err
            )));
        }

        warn!(label, attempts, backoff_ms = backoff.as_millis() as u64, "Database locked, backing off");
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
    }
}

/// `SQLITE_BUSY` / `SQLITE_LOCKED` surfaced through sqlx
pub fn is_lock_error(err: &Error) -> bool {
    let Error::Database(db_err) = err else {
        return false;
    };

    if let Some(code) = db_err.as_database_error().and_then(|e| e.code()) {
        return LOCK_CODES.contains(&code.as_ref());
    }
    db_err.to_string().contains("database is locked")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn locked() -> Error {
        Error::Database(sqlx::Error::Protocol("database is locked".to_string()))
    }

    #[tokio::test]
    async fn test_lock_error_is_retried_until_success() {
        let calls = AtomicU32::new(0);

        let result = retry_on_lock("append", 1000, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(locked())
                } else {
                    Ok("1-0")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "1-0");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_on_lock("ack", 1000, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::NotFound("group".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let result: Result<()> = retry_on_lock("claim", 30, || async { Err(locked()) }).await;

        match result {
            Err(Error::Internal(reason)) => assert!(reason.starts_with("claim: database still locked")),
            other => panic!("expected lock timeout, got {:?}", other),
        }
    }

    #[test]
    fn test_lock_error_detection() {
        assert!(is_lock_error(&locked()));
        assert!(!is_lock_error(&Error::Database(sqlx::Error::RowNotFound)));
        assert!(!is_lock_error(&Error::Internal("database is locked".into())));
    }
}
