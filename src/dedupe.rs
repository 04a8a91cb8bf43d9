//! In-flight request deduplication keyed by logical request identity.
//!
//! Concurrent callers that share a key join one spawned execution and observe the same
//! outcome, error included. Entries expire after a window (60 seconds by default) even if they
//! are still resident, settled executions remove their own entry and never a newer one, and each
//! call has a small chance of sweeping expired entries so the map stays bounded without a
//! background task. The map is process-local and only an optimization: losing it never affects
//! correctness.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures_util::future::{BoxFuture, FutureExt, Shared};
use rand::Rng;
use tokio::time::Instant;
// self
use crate::_prelude::*;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
const DEFAULT_SWEEP_PROBABILITY: f64 = 0.01;

type SharedOutcome<T> = Shared<BoxFuture<'static, Result<T>>>;
type PendingMap<T> = Arc<Mutex<HashMap<String, PendingEntry<T>>>>;

struct PendingEntry<T>
where
	T: Clone,
{
	id: u64,
	outcome: SharedOutcome<T>,
	created_at: Instant,
}

/// Collapses concurrent calls sharing a key into one in-flight operation.
pub struct RequestDeduplicator<T>
where
	T: Clone,
{
	pending: PendingMap<T>,
	next_id: Arc<AtomicU64>,
	window: Duration,
	sweep_probability: f64,
}
impl<T> RequestDeduplicator<T>
where
	T: 'static + Clone + Send + Sync,
{
	/// Creates an empty deduplicator with the default 60-second window and 1% sweep chance.
	pub fn new() -> Self {
		Self {
			pending: Default::default(),
			next_id: Default::default(),
			window: DEFAULT_WINDOW,
			sweep_probability: DEFAULT_SWEEP_PROBABILITY,
		}
	}

	/// Overrides the age after which an entry is ignored.
	pub fn with_window(mut self, window: Duration) -> Self {
		self.window = window;

		self
	}

	/// Overrides the per-call probability of sweeping expired entries (clamped to `0..=1`).
	pub fn with_sweep_probability(mut self, probability: f64) -> Self {
		self.sweep_probability = probability.clamp(0.0, 1.0);

		self
	}

	/// Runs `operation` unless a live execution for `key` exists, in which case its outcome is
	/// shared.
	///
	/// The operation is spawned, so it runs to completion even if every caller stops waiting.
	pub async fn dedupe<F, Fut>(&self, key: impl Into<String>, operation: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<T>>,
	{
		if self.sweep_probability > 0.0 && rand::rng().random_bool(self.sweep_probability) {
			self.sweep_expired();
		}

		let key = key.into();
		let outcome = {
			let mut pending = self.pending.lock();
			let now = Instant::now();

			match pending.get(&key) {
				Some(entry) if now.duration_since(entry.created_at) < self.window => {
					tracing::debug!(key = %key, "Joining in-flight request.");

					entry.outcome.clone()
				},
				_ => {
					let id = self.next_id.fetch_add(1, Ordering::Relaxed);
					let outcome = self.spawn(key.clone(), id, operation());

					pending.insert(key, PendingEntry { id, outcome: outcome.clone(), created_at: now });

					outcome
				},
			}
		};

		outcome.await
	}

	/// Drops every entry older than the window, returning how many were removed.
	pub fn sweep_expired(&self) -> usize {
		let mut pending = self.pending.lock();
		let before = pending.len();
		let now = Instant::now();

		pending.retain(|_, entry| now.duration_since(entry.created_at) < self.window);

		before - pending.len()
	}

	/// Number of resident entries, expired ones included.
	pub fn len(&self) -> usize {
		self.pending.lock().len()
	}

	/// Returns `true` when no entries are resident.
	pub fn is_empty(&self) -> bool {
		self.pending.lock().is_empty()
	}

	fn spawn<Fut>(&self, key: String, id: u64, future: Fut) -> SharedOutcome<T>
	where
		Fut: 'static + Send + Future<Output = Result<T>>,
	{
		let task_map = self.pending.clone();
		let task_key = key.clone();
		let handle = tokio::spawn(async move {
			let result = future.await;

			release(&task_map, &task_key, id);

			result
		});
		let abort_map = self.pending.clone();

		async move {
			match handle.await {
				Ok(result) => result,
				Err(e) => {
					release(&abort_map, &key, id);

					Err(Error::Interrupted { reason: e.to_string() })
				},
			}
		}
		.boxed()
		.shared()
	}
}
impl<T> Clone for RequestDeduplicator<T>
where
	T: Clone,
{
	fn clone(&self) -> Self {
		Self {
			pending: self.pending.clone(),
			next_id: self.next_id.clone(),
			window: self.window,
			sweep_probability: self.sweep_probability,
		}
	}
}
impl<T> Default for RequestDeduplicator<T>
where
	T: 'static + Clone + Send + Sync,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<T> Debug for RequestDeduplicator<T>
where
	T: Clone,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestDeduplicator")
			.field("pending", &self.pending.lock().len())
			.field("window", &self.window)
			.field("sweep_probability", &self.sweep_probability)
			.finish()
	}
}

// Removes the entry only while it is still the one registered under `key`.
fn release<T>(map: &Mutex<HashMap<String, PendingEntry<T>>>, key: &str, id: u64)
where
	T: Clone,
{
	let mut pending = map.lock();

	if pending.get(key).is_some_and(|entry| entry.id == id) {
		pending.remove(key);
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::AtomicU32;
	// crates.io
	use futures_util::future;
	use tokio::sync::oneshot;
	// self
	use super::*;
	use crate::error::TransientError;

	fn deduplicator() -> RequestDeduplicator<u64> {
		RequestDeduplicator::new().with_sweep_probability(0.0)
	}

	#[tokio::test]
	async fn concurrent_callers_share_one_execution() {
		let dedupe = deduplicator();
		let calls = Arc::new(AtomicU32::new(0));
		let results = future::join_all((0..10).map(|_| {
			let calls = calls.clone();

			dedupe.dedupe("stats-online", move || {
				calls.fetch_add(1, Ordering::SeqCst);

				async {
					tokio::time::sleep(Duration::from_millis(20)).await;

					Ok(42)
				}
			})
		}))
		.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(results.iter().all(|r| matches!(r, Ok(42))));
		assert!(dedupe.is_empty());
	}

	#[tokio::test]
	async fn joined_callers_observe_the_same_error() {
		let dedupe = deduplicator();
		let calls = Arc::new(AtomicU32::new(0));
		let results = future::join_all((0..3).map(|_| {
			let calls = calls.clone();

			dedupe.dedupe("stats-total", move || {
				calls.fetch_add(1, Ordering::SeqCst);

				async {
					tokio::time::sleep(Duration::from_millis(20)).await;

					Err(Error::from(TransientError::Server { status: 503 }))
				}
			})
		}))
		.await;

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert!(
			results
				.iter()
				.all(|r| matches!(r, Err(Error::Transient(TransientError::Server { status: 503 }))))
		);
	}

	#[tokio::test]
	async fn settled_keys_run_fresh() {
		let dedupe = deduplicator();
		let first = dedupe.dedupe("k", || async { Ok(1) }).await.expect("First run should succeed.");
		let second = dedupe.dedupe("k", || async { Ok(2) }).await.expect("Second run should succeed.");

		assert_eq!((first, second), (1, 2));
		assert!(dedupe.is_empty());
	}

	#[tokio::test]
	async fn distinct_keys_do_not_share() {
		let dedupe = deduplicator();
		let (online, total) = tokio::join!(
			dedupe.dedupe("stats-online", || async { Ok(5) }),
			dedupe.dedupe("stats-total", || async { Ok(1000) }),
		);

		assert_eq!(online.expect("Online run should succeed."), 5);
		assert_eq!(total.expect("Total run should succeed."), 1000);
	}

	#[tokio::test(start_paused = true)]
	async fn stale_entry_is_replaced_and_never_evicts_its_replacement() {
		let dedupe = deduplicator();
		let (release_first, first_gate) = oneshot::channel::<()>();
		let (release_second, second_gate) = oneshot::channel::<()>();
		let first = tokio::spawn({
			let dedupe = dedupe.clone();

			async move {
				dedupe
					.dedupe("k", move || async move {
						let _ = first_gate.await;

						Ok(1)
					})
					.await
			}
		});

		tokio::task::yield_now().await;
		assert_eq!(dedupe.len(), 1);

		tokio::time::advance(Duration::from_secs(61)).await;

		let second = tokio::spawn({
			let dedupe = dedupe.clone();

			async move {
				dedupe
					.dedupe("k", move || async move {
						let _ = second_gate.await;

						Ok(2)
					})
					.await
			}
		});

		tokio::task::yield_now().await;
		assert_eq!(dedupe.len(), 1);

		release_first.send(()).expect("First gate should still be open.");

		let first = first.await.expect("First caller should not panic.");

		assert_eq!(first.expect("First run should succeed."), 1);
		assert_eq!(dedupe.len(), 1, "The replacement entry must survive the stale settlement.");

		release_second.send(()).expect("Second gate should still be open.");

		let second = second.await.expect("Second caller should not panic.");

		assert_eq!(second.expect("Second run should succeed."), 2);
		assert!(dedupe.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn sweep_drops_only_expired_entries() {
		let dedupe = deduplicator();
		let stuck = tokio::spawn({
			let dedupe = dedupe.clone();

			async move { dedupe.dedupe("stuck", || future::pending::<Result<u64>>()).await }
		});

		tokio::task::yield_now().await;
		tokio::time::advance(Duration::from_secs(30)).await;

		let fresh = tokio::spawn({
			let dedupe = dedupe.clone();

			async move { dedupe.dedupe("fresh", || future::pending::<Result<u64>>()).await }
		});

		tokio::task::yield_now().await;
		assert_eq!(dedupe.sweep_expired(), 0);

		tokio::time::advance(Duration::from_secs(31)).await;

		assert_eq!(dedupe.sweep_expired(), 1);
		assert_eq!(dedupe.len(), 1);

		stuck.abort();
		fresh.abort();
	}

	#[tokio::test(start_paused = true)]
	async fn shorter_window_expires_entries_sooner() {
		let dedupe = deduplicator().with_window(Duration::from_secs(5));
		let stuck = tokio::spawn({
			let dedupe = dedupe.clone();

			async move { dedupe.dedupe("stuck", || future::pending::<Result<u64>>()).await }
		});

		tokio::task::yield_now().await;
		tokio::time::advance(Duration::from_secs(4)).await;

		assert_eq!(dedupe.sweep_expired(), 0);

		tokio::time::advance(Duration::from_secs(2)).await;

		assert_eq!(dedupe.sweep_expired(), 1);
		assert!(dedupe.is_empty());

		stuck.abort();
	}
}
