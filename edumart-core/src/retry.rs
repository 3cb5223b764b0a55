use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::CoreError;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-transient error, or the attempt budget
/// is spent. Only [`CoreError::is_transient`] errors are retried.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut delay = config.initial_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!("{} succeeded after {} attempts", operation_name, attempts);
                }
                return Ok(result);
            }
            Err(error) => {
                if attempts >= config.max_attempts || !error.is_transient() {
                    warn!("{} failed after {} attempts: {}", operation_name, attempts, error);
                    return Err(error);
                }

                warn!(
                    "{} attempt {} failed: {}. Retrying in {:?}",
                    operation_name, attempts, error, delay
                );
                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_factor).min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
