use crate::config::RetryConfig;
use crate::error::{Result, SyncError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Delay before retry number `retry` (1-based), doubling by the configured multiplier and capped
pub fn backoff_delay(retry_config: &RetryConfig, retry: u32) -> Duration {
    let factor = retry_config.backoff_multiplier.powi(retry.saturating_sub(1) as i32);
    let initial = retry_config.initial_delay().as_millis() as f64;
    let cap = retry_config.max_delay().as_millis() as f64;
    Duration::from_millis((initial * factor).min(cap) as u64)
}

/// Run a source request with bounded retries and exponential backoff.
///
/// Every failure except the last is logged once as a retry. The final failure is returned as
/// `SourceUnavailable` carrying the number of attempts made. Configuration errors are
/// returned immediately without retrying.
pub async fn run_with_retry<F, Fut, T>(label: &str, retry_config: &RetryConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = retry_config.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e @ SyncError::Configuration { .. }) => return Err(e),
            Err(e) => {
                if attempt == max_attempts {
                    let message = match e {
                        SyncError::SourceUnavailable { message, .. } => message,
                        other => other.to_string(),
                    };
                    return Err(SyncError::SourceUnavailable { attempts: attempt, message });
                }

                let delay = backoff_delay(retry_config, attempt);
                warn!("{} attempt {} failed: {}, retrying in {:?}", label, attempt, e, delay);
                sleep(delay).await;
            }
        }
    }

    unreachable!()
}
