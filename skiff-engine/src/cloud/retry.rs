use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ProviderError;

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Retries `op` on transient provider errors with exponential backoff
///
/// Delays start at one second and double up to thirty. The last transient
/// error is returned once the next attempt would start past `deadline`.
pub async fn with_backoff<T, F, Fut>(
    what: &str,
    deadline: Instant,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 0;
    let mut delay = INITIAL_DELAY;

    loop {
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} succeeded after {} attempt(s)", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() => {
                if Instant::now() + delay > deadline {
                    warn!("{} failed after {} attempt(s): {}", what, attempt, e);
                    return Err(e);
                }

                warn!("{} failed (attempt {}): {}, retrying in {:?}", what, attempt, e, delay);

                tokio::select! {
                    _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    _ = sleep(delay) => {}
                }

                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let result = with_backoff(
            "create",
            Instant::now() + Duration::from_secs(60),
            &CancellationToken::new(),
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                        Err(ProviderError::Transient("rate limited".to_string()))
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(7) && elapsed < Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = with_backoff(
            "create",
            Instant::now() + Duration::from_secs(60),
            &CancellationToken::new(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::Permanent("bad token".to_string())) }
            },
        )
        .await;

        assert!(matches!(result, Err(ProviderError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_at_deadline() {
        let result: Result<(), _> = with_backoff(
            "create",
            Instant::now() + Duration::from_secs(5),
            &CancellationToken::new(),
            || async { Err(ProviderError::Transient("503".to_string())) },
        )
        .await;

        assert!(matches!(result, Err(ProviderError::Transient(_))));
    }
}
