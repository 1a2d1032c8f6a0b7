//! Bounded polling for provider-side asynchronous operations.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::PollSettings;
use crate::error::{FerraformError, ProviderError, Result};

/// Interval and overall timeout of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two checks.
    pub interval: Duration,
    /// Time after which the wait fails.
    pub timeout: Duration,
}

impl PollConfig {
    /// Creates a poll configuration.
    #[must_use]
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::from(PollSettings::default())
    }
}

impl From<PollSettings> for PollConfig {
    fn from(settings: PollSettings) -> Self {
        Self::new(
            Duration::from_secs(settings.interval_secs),
            Duration::from_secs(settings.timeout_secs),
        )
    }
}

/// Calls `check` until it yields a value, an error, or the timeout passes.
///
/// The check always runs at least once.
///
/// # Errors
///
/// Returns the check's error, or [`ProviderError::Timeout`] naming
/// `resource` and `expected_state`.
pub async fn poll_until<T, F, Fut>(
    config: PollConfig,
    resource: &str,
    expected_state: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();

    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }

        if start.elapsed() >= config.timeout {
            return Err(FerraformError::Provider(ProviderError::Timeout {
                resource: resource.to_string(),
                expected_state: expected_state.to_string(),
            }));
        }

        trace!("{resource} not yet {expected_state}, sleeping {:?}", config.interval);
        tokio::time::sleep(config.interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_returns_once_ready() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = poll_until(fast(), "droplet 1", "active", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Ok((n >= 2).then_some(n))
        })
        .await
        .expect("should become ready");

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out() {
        let config = PollConfig::new(Duration::from_millis(1), Duration::from_millis(10));
        let result: Result<()> = poll_until(config, "droplet 1", "active", || async { Ok(None) }).await;

        assert!(matches!(
            result,
            Err(FerraformError::Provider(ProviderError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_check_error_stops_polling() {
        let result: Result<()> = poll_until(fast(), "droplet 1", "active", || async {
            Err(FerraformError::internal("boom"))
        })
        .await;

        assert!(matches!(result, Err(FerraformError::Internal(_))));
    }

    #[test]
    fn test_from_settings() {
        let config = PollConfig::from(PollSettings {
            interval_secs: 2,
            timeout_secs: 60,
        });
        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.timeout, Duration::from_secs(60));
    }
}
