use std::future::Future;
use std::time::Duration;

pub const DEFAULT_RETRY_COUNT: usize = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Delay before the retry that follows attempt `attempt_index` (0-based):
/// `base_delay_ms * 2^attempt_index`, saturating.
pub fn backoff_delay(base_delay_ms: u64, attempt_index: usize) -> Duration {
    let shift = u32::try_from(attempt_index.min(63)).unwrap_or(63);
    let multiplier = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
    Duration::from_millis(base_delay_ms.saturating_mul(multiplier))
}

/// Runs `operation` up to `attempts` times (at least once). The result of the
/// last attempt is returned as-is; `should_retry` decides whether an earlier
/// result is retried. `sleep` receives each backoff delay.
pub(crate) async fn retry_with_backoff<T, F, Fut, R, S, SFut>(
    attempts: usize,
    base_delay_ms: u64,
    mut operation: F,
    should_retry: R,
    mut sleep: S,
) -> T
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = T>,
    R: Fn(&T) -> bool,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let attempts = attempts.max(1);
    let mut attempt_index = 0usize;
    loop {
        let result = operation(attempt_index).await;
        let is_last = attempt_index + 1 >= attempts;
        if is_last || !should_retry(&result) {
            if is_last && attempts > 1 && should_retry(&result) {
                tracing::warn!(attempts, "transport retries exhausted");
            }
            return result;
        }

        let delay = backoff_delay(base_delay_ms, attempt_index);
        tracing::debug!(
            attempt = attempt_index + 1,
            attempts,
            delay_ms = delay.as_millis() as u64,
            "retrying transport operation"
        );
        sleep(delay).await;
        attempt_index += 1;
    }
}

pub(crate) async fn tokio_sleep(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
