//! Retry mechanism for handling transient move failures
//!
//! Locked files and permission races usually clear up on their own (an antivirus
//! scan finishing, a browser releasing its handle). The retry manager re-runs an
//! operation with a delay between attempts and gives up with
//! [`MoveError::RetryExhausted`] once the configured ceiling is reached.

use crate::pipeline::MoveError;
use crate::shutdown::Shutdown;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
	/// Maximum number of retries after the first attempt
	pub max_retries: u32,
	/// Delay before the first retry
	pub initial_retry_delay: Duration,
	/// Upper bound for the grown delay
	pub max_retry_delay: Duration,
	/// Factor applied to the delay after each retry; 1.0 keeps it fixed
	pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_retry_delay: Duration::from_secs(2),
			max_retry_delay: Duration::from_secs(60),
			backoff_multiplier: 1.0,
		}
	}
}

impl RetryConfig {
	/// Calculate the delay for a given retry attempt
	pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
		if self.initial_retry_delay.is_zero() {
			return Duration::ZERO;
		}
		let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
		let delay = Duration::try_from_secs_f64(self.initial_retry_delay.as_secs_f64() * factor)
			.unwrap_or(self.max_retry_delay);
		std::cmp::min(delay, self.max_retry_delay)
	}
}

/// Retry manager that re-runs retryable operations
#[derive(Debug, Default, Clone)]
pub struct RetryManager {
	config: RetryConfig,
}

impl RetryManager {
	pub fn new(config: RetryConfig) -> Self {
		Self { config }
	}

	pub fn config(&self) -> &RetryConfig {
		&self.config
	}

	/// Execute an async closure with retry logic.
	///
	/// Non-retryable errors are returned unchanged. A stop request during a
	/// retry delay ends the loop with [`MoveError::Cancelled`].
	pub async fn execute<T, F, Fut>(
		&self, operation_name: &str, shutdown: &mut Shutdown, mut operation_fn: F,
	) -> Result<T, MoveError>
	where
		F: FnMut() -> Fut + Send,
		Fut: Future<Output = Result<T, MoveError>> + Send,
	{
		let mut attempt = 0;
		let start_time = std::time::Instant::now();

		loop {
			match operation_fn().await {
				Ok(result) => {
					if attempt > 0 {
						debug!(
							"Operation '{}' succeeded after {} attempts in {:?}",
							operation_name,
							attempt + 1,
							start_time.elapsed()
						);
					}
					return Ok(result);
				}
				Err(error) => {
					if !error.is_retryable() {
						debug!(
							"Operation '{}' failed with non-retryable error: {}",
							operation_name, error
						);
						return Err(error);
					}

					if attempt >= self.config.max_retries {
						warn!(
							"Operation '{}' failed after {} attempts over {:?}, giving up",
							operation_name,
							attempt + 1,
							start_time.elapsed()
						);
						return Err(MoveError::RetryExhausted {
							operation: operation_name.to_string(),
							attempts: attempt + 1,
							last_error: error.to_string(),
						});
					}

					let delay = self.config.delay_for_attempt(attempt);
					warn!(
						"Operation '{}' failed (attempt {}), retrying in {:?}: {}",
						operation_name,
						attempt + 1,
						delay,
						error
					);

					if !shutdown.sleep(delay).await {
						return Err(MoveError::Cancelled { path: operation_name.to_string() });
					}
					attempt += 1;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::shutdown;
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::sync::Arc;

	fn config(max_retries: u32, delay: Duration) -> RetryConfig {
		RetryConfig { max_retries, initial_retry_delay: delay, ..Default::default() }
	}

	fn locked() -> MoveError {
		MoveError::FileLocked { path: "/t/setup.exe".to_string() }
	}

	#[tokio::test]
	async fn test_retry_success_after_failures() {
		let retry_manager = RetryManager::new(config(3, Duration::from_millis(1)));
		let counter = Arc::new(AtomicU32::new(0));
		let mut shutdown = Shutdown::never();

		let result = retry_manager
			.execute("move", &mut shutdown, || {
				let counter = counter.clone();
				async move {
					let count = counter.fetch_add(1, Ordering::SeqCst);
					if count < 2 {
						Err(locked())
					} else {
						Ok(count + 1)
					}
				}
			})
			.await;

		assert_eq!(result.unwrap(), 3);
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_retry_max_attempts_exceeded() {
		let retry_manager = RetryManager::new(config(2, Duration::from_millis(1)));
		let counter = Arc::new(AtomicU32::new(0));
		let mut shutdown = Shutdown::never();

		let result: Result<(), MoveError> = retry_manager
			.execute("move", &mut shutdown, || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Err(locked()) }
			})
			.await;

		match result.unwrap_err() {
			MoveError::RetryExhausted { attempts, last_error, .. } => {
				assert_eq!(attempts, 3); // Initial attempt + 2 retries
				assert!(last_error.contains("locked"));
			}
			other => panic!("Expected RetryExhausted error, got {other:?}"),
		}
		assert_eq!(counter.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn test_retry_non_retryable_error() {
		let retry_manager = RetryManager::new(config(3, Duration::from_millis(1)));
		let counter = Arc::new(AtomicU32::new(0));
		let mut shutdown = Shutdown::never();

		let result: Result<(), MoveError> = retry_manager
			.execute("move", &mut shutdown, || {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Err(MoveError::DestinationCollision { path: "/t/a".to_string() }) }
			})
			.await;

		assert!(matches!(result, Err(MoveError::DestinationCollision { .. })));
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn test_retry_cancelled_by_shutdown() {
		let retry_manager = RetryManager::new(config(10, Duration::from_secs(30)));
		let (trigger, mut shutdown) = shutdown::channel();
		trigger.trigger();

		let result: Result<(), MoveError> =
			retry_manager.execute("move", &mut shutdown, || async { Err(locked()) }).await;

		assert!(matches!(result, Err(MoveError::Cancelled { .. })));
	}

	#[test]
	fn test_delay_calculation() {
		let config = RetryConfig {
			initial_retry_delay: Duration::from_millis(100),
			max_retry_delay: Duration::from_millis(500),
			backoff_multiplier: 2.0,
			..Default::default()
		};

		assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
		assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
		assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
		assert_eq!(config.delay_for_attempt(3), Duration::from_millis(500)); // Capped
		assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(500));

		let fixed = RetryConfig::default();
		assert_eq!(fixed.delay_for_attempt(5), Duration::from_secs(2));
	}
}
