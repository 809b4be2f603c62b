//! LLM clients: a local model for bulk per-file work and a remote
//! reasoning model for the organization plan. Both share the retry
//! capability below.

pub mod json;
pub mod local;
pub mod remote;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{PipelineError, Result};

pub use local::LocalLlm;
pub use remote::RemoteLlm;

/// Backoff for the given 1-based attempt: exponential with a cap, plus a
/// sub-second jitter derived from the clock.
pub fn retry_backoff(attempt: u32, base_ms: u64, cap_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let backoff = base_ms
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(cap_ms);
    let jitter_seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    let jitter = jitter_seed % base_ms.max(1);
    Duration::from_millis(backoff + jitter)
}

/// Sleep that wakes early when the cancel flag flips.
pub fn sleep_with_cancellation(cancel: &Arc<AtomicBool>, delay: Duration) -> Result<()> {
    let started = std::time::Instant::now();
    while started.elapsed() < delay {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::cancelled());
        }
        let remaining = delay.saturating_sub(started.elapsed());
        std::thread::sleep(remaining.min(Duration::from_millis(100)));
    }
    Ok(())
}

/// Run `op` up to `max_attempts` times, backing off between attempts.
/// Only transient errors are retried; everything else surfaces at once.
/// The final transient failure degrades to `unavailable`.
pub fn with_retries<T, F>(
    max_attempts: u32,
    base_ms: u64,
    cap_ms: u64,
    cancel: &Arc<AtomicBool>,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = max_attempts.max(1);
    let mut last: Option<PipelineError> = None;

    for attempt in 1..=attempts {
        if cancel.load(Ordering::Relaxed) {
            return Err(PipelineError::cancelled());
        }

        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %err,
                    "transient LLM failure, backing off"
                );
                let delay = retry_backoff(attempt, base_ms, cap_ms);
                sleep_with_cancellation(cancel, delay)?;
                last = Some(err);
            }
            Err(err) if err.is_transient() => {
                return Err(PipelineError::unavailable(format!(
                    "gave up after {attempts} attempts: {err}"
                )));
            }
            Err(err) => return Err(err),
        }
    }

    Err(last.unwrap_or_else(|| PipelineError::unavailable("retry loop exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, 1, 10, &no_cancel(), || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(PipelineError::network("flaky"))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries(5, 1, 10, &no_cancel(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(PipelineError::malformed("bad json"))
        });
        assert_eq!(result.unwrap_err().kind, crate::error::ErrorKind::Malformed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhausted_retries_become_unavailable() {
        let result: Result<()> =
            with_retries(2, 1, 10, &no_cancel(), || Err(PipelineError::network("down")));
        assert_eq!(
            result.unwrap_err().kind,
            crate::error::ErrorKind::Unavailable
        );
    }

    #[test]
    fn test_cancel_short_circuits() {
        let cancel = Arc::new(AtomicBool::new(true));
        let result: Result<()> = with_retries(3, 1, 10, &cancel, || Ok(()));
        assert_eq!(result.unwrap_err().kind, crate::error::ErrorKind::Cancelled);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        // Jitter is below base_ms, so the bounds are tight.
        let first = retry_backoff(1, 100, 1000).as_millis();
        let third = retry_backoff(3, 100, 1000).as_millis();
        let capped = retry_backoff(6, 100, 1000).as_millis();
        assert!(first >= 100 && first < 200);
        assert!(third >= 400 && third < 500);
        assert!(capped >= 1000 && capped < 1100);
    }
}
