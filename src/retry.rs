//! Generic retry executor with separate backoff schedules for quota and transient failures.
//!
//! [`BackoffRetrier::run`] re-invokes an async operation until it succeeds, the retry budget
//! is spent, or the stop predicate declines. Quota errors wait for the server's
//! `Retry-After` hint when one was supplied and otherwise follow a long doubling schedule
//! (5s, 10s, 20s, capped at 30s). Every other retryable error uses exponential backoff with
//! up to 30% jitter, capped at `max_delay`. The final error is returned verbatim so callers
//! can still tell quota exhaustion apart from other failures.

// crates.io
use rand::Rng;
// self
use crate::_prelude::*;

const QUOTA_BASE_DELAY: Duration = Duration::from_secs(5);
const QUOTA_MAX_DELAY: Duration = Duration::from_secs(30);
const JITTER_RATIO: f64 = 0.3;

/// Stop predicate consulted after each failed attempt with the error and attempt index.
pub type RetryPredicate = Arc<dyn Fn(&Error, u32) -> bool + Send + Sync>;

/// Tunables for a [`BackoffRetrier`].
#[derive(Clone)]
pub struct RetryOptions {
	/// Attempt index at which the last error is returned without further retries.
	pub max_retries: u32,
	/// Base delay for the transient schedule.
	pub initial_delay: Duration,
	/// Upper bound for the transient schedule.
	pub max_delay: Duration,
	/// Custom stop predicate; [`Error::is_retryable`] when unset.
	pub should_retry: Option<RetryPredicate>,
}
impl RetryOptions {
	/// Overrides the retry budget.
	pub fn with_max_retries(mut self, max_retries: u32) -> Self {
		self.max_retries = max_retries;

		self
	}

	/// Overrides the transient schedule's base and cap.
	pub fn with_delays(mut self, initial_delay: Duration, max_delay: Duration) -> Self {
		self.initial_delay = initial_delay;
		self.max_delay = max_delay;

		self
	}

	/// Installs a custom stop predicate.
	pub fn with_should_retry(
		mut self,
		should_retry: impl Fn(&Error, u32) -> bool + Send + Sync + 'static,
	) -> Self {
		self.should_retry = Some(Arc::new(should_retry));

		self
	}

	fn allows(&self, error: &Error, attempt: u32) -> bool {
		match &self.should_retry {
			Some(predicate) => predicate(error, attempt),
			None => error.is_retryable(),
		}
	}
}
impl Default for RetryOptions {
	fn default() -> Self {
		Self {
			max_retries: 3,
			initial_delay: Duration::from_millis(1000),
			max_delay: Duration::from_millis(10_000),
			should_retry: None,
		}
	}
}
impl Debug for RetryOptions {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RetryOptions")
			.field("max_retries", &self.max_retries)
			.field("initial_delay", &self.initial_delay)
			.field("max_delay", &self.max_delay)
			.field("custom_predicate", &self.should_retry.is_some())
			.finish()
	}
}

/// Bookkeeping for one scheduled retry; logged and then dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryState {
	/// Index of the attempt that just failed.
	pub attempt: u32,
	/// Delay before the next attempt.
	pub delay: Duration,
	/// Whether the quota schedule was used.
	pub quota: bool,
}

/// Retry executor parameterized by [`RetryOptions`].
#[derive(Clone, Debug, Default)]
pub struct BackoffRetrier {
	options: RetryOptions,
}
impl BackoffRetrier {
	/// Creates a retrier with the provided options.
	pub fn new(options: RetryOptions) -> Self {
		Self { options }
	}

	/// Runs `operation` until it succeeds or retrying is no longer allowed.
	pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 0;

		loop {
			let error = match operation().await {
				Ok(value) => return Ok(value),
				Err(error) => error,
			};

			if attempt >= self.options.max_retries || !self.options.allows(&error, attempt) {
				return Err(error);
			}

			let state = RetryState {
				attempt,
				delay: self.delay_for(&error, attempt),
				quota: error.is_quota(),
			};

			tracing::warn!(
				attempt = state.attempt + 1,
				max_retries = self.options.max_retries,
				delay_ms = state.delay.as_millis() as u64,
				quota = state.quota,
				error = %error,
				"Retrying upstream call."
			);
			tokio::time::sleep(state.delay).await;

			attempt += 1;
		}
	}

	/// Delay before retrying after `error` failed attempt `attempt`.
	pub fn delay_for(&self, error: &Error, attempt: u32) -> Duration {
		if error.is_quota() {
			return error.retry_after().unwrap_or_else(|| quota_backoff(attempt));
		}

		let exponential = exponential(self.options.initial_delay, attempt);
		let jitter = exponential.mul_f64(rand::rng().random_range(0.0..JITTER_RATIO));

		exponential.saturating_add(jitter).min(self.options.max_delay)
	}
}

/// Quota schedule used when the server gave no hint.
pub fn quota_backoff(attempt: u32) -> Duration {
	exponential(QUOTA_BASE_DELAY, attempt).min(QUOTA_MAX_DELAY)
}

fn exponential(base: Duration, attempt: u32) -> Duration {
	base.saturating_mul(2_u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicU32, Ordering};
	// crates.io
	use tokio::time::Instant;
	// self
	use super::*;
	use crate::error::TransientError;

	fn server_error() -> Error {
		TransientError::Server { status: 503 }.into()
	}

	#[test]
	fn quota_schedule_doubles_and_caps() {
		assert_eq!(quota_backoff(0), Duration::from_secs(5));
		assert_eq!(quota_backoff(1), Duration::from_secs(10));
		assert_eq!(quota_backoff(2), Duration::from_secs(20));
		assert_eq!(quota_backoff(3), Duration::from_secs(30));
		assert_eq!(quota_backoff(40), Duration::from_secs(30));
	}

	#[test]
	fn transient_delay_stays_within_jitter_band() {
		let retrier = BackoffRetrier::default();

		for attempt in 0..3 {
			let base = Duration::from_millis(1000) * 2_u32.pow(attempt);

			for _ in 0..50 {
				let delay = retrier.delay_for(&server_error(), attempt);

				assert!(delay >= base);
				assert!(delay < base.mul_f64(1.31));
			}
		}

		assert_eq!(retrier.delay_for(&server_error(), 4), Duration::from_millis(10_000));
	}

	#[test]
	fn quota_delay_prefers_server_hint() {
		let retrier = BackoffRetrier::default();
		let hinted =
			Error::QuotaExceeded { remaining: 0, retry_after: Some(Duration::from_secs(120)) };
		let unhinted = Error::QuotaExceeded { remaining: 0, retry_after: None };

		assert_eq!(retrier.delay_for(&hinted, 0), Duration::from_secs(120));
		assert_eq!(retrier.delay_for(&unhinted, 1), Duration::from_secs(10));
	}

	#[tokio::test(start_paused = true)]
	async fn gives_up_after_max_retries_with_last_error() {
		let calls = AtomicU32::new(0);
		let retrier = BackoffRetrier::default();
		let err = retrier
			.run(|| {
				let call = calls.fetch_add(1, Ordering::SeqCst);

				async move { Err::<(), Error>(TransientError::Server { status: 500 + call as u16 }.into()) }
			})
			.await
			.expect_err("A permanently failing operation should surface its error.");

		assert_eq!(calls.load(Ordering::SeqCst), 4);
		assert!(matches!(err, Error::Transient(TransientError::Server { status: 503 })));
	}

	#[tokio::test(start_paused = true)]
	async fn quota_retries_wait_for_the_hint() {
		let calls = AtomicU32::new(0);
		let retrier = BackoffRetrier::new(
			RetryOptions::default().with_should_retry(|err, attempt| err.is_quota() && attempt < 1),
		);
		let started = Instant::now();
		let err = retrier
			.run(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async {
					Err::<(), Error>(Error::QuotaExceeded {
						remaining: 0,
						retry_after: Some(Duration::from_secs(120)),
					})
				}
			})
			.await
			.expect_err("Quota exhaustion should surface once retries are declined.");

		assert_eq!(calls.load(Ordering::SeqCst), 2);
		assert_eq!(started.elapsed(), Duration::from_secs(120));
		assert!(err.is_quota());
	}

	#[tokio::test(start_paused = true)]
	async fn quota_retries_follow_aggressive_schedule_without_hint() {
		let calls = AtomicU32::new(0);
		let retrier = BackoffRetrier::default();
		let started = Instant::now();
		let _ = retrier
			.run(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err::<(), Error>(Error::QuotaExceeded { remaining: 0, retry_after: None }) }
			})
			.await;

		assert_eq!(calls.load(Ordering::SeqCst), 4);
		assert_eq!(started.elapsed(), Duration::from_secs(5 + 10 + 20));
	}

	#[tokio::test(start_paused = true)]
	async fn non_retryable_errors_return_immediately() {
		let calls = AtomicU32::new(0);
		let started = Instant::now();
		let err = BackoffRetrier::default()
			.run(|| {
				calls.fetch_add(1, Ordering::SeqCst);

				async { Err::<(), Error>(Error::InvalidResponse { reason: "missing rows".into() }) }
			})
			.await
			.expect_err("Validation failures should not be retried.");

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(started.elapsed(), Duration::ZERO);
		assert!(matches!(err, Error::InvalidResponse { .. }));
	}

	#[tokio::test(start_paused = true)]
	async fn recovers_after_transient_failure() {
		let calls = AtomicU32::new(0);
		let value = BackoffRetrier::new(RetryOptions::default().with_max_retries(2))
			.run(|| {
				let call = calls.fetch_add(1, Ordering::SeqCst);

				async move { if call == 0 { Err(server_error()) } else { Ok(42) } }
			})
			.await
			.expect("The second attempt should succeed.");

		assert_eq!(value, 42);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}
}
