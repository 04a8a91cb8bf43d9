//! Thread-safe in-memory [`CacheStore`] with per-entry expiry.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	store::{CacheStore, StoreError, StoreFuture},
};

type StoreMap = Arc<Mutex<HashMap<String, CachedValue>>>;

#[derive(Clone, Debug)]
struct CachedValue {
	value: String,
	expires_at: Instant,
}

/// Storage backend that keeps values in-process; expired entries are dropped on read.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of resident entries, including expired ones not yet read.
	pub fn len(&self) -> usize {
		self.0.lock().len()
	}

	/// Returns `true` when no entries are resident.
	pub fn is_empty(&self) -> bool {
		self.0.lock().is_empty()
	}

	fn get_now(map: StoreMap, key: &str) -> Option<String> {
		let mut guard = map.lock();

		match guard.get(key) {
			Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
			Some(_) => {
				guard.remove(key);

				None
			},
			None => None,
		}
	}

	fn put_now(map: StoreMap, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
		let expires_at = Instant::now().checked_add(ttl).ok_or_else(|| StoreError::Backend {
			message: format!("TTL {ttl:?} for `{key}` overflows the clock"),
		})?;

		map.lock().insert(key.to_owned(), CachedValue { value, expires_at });

		Ok(())
	}
}
impl CacheStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::get_now(map, key)) })
	}

	fn put<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::put_now(map, key, value, ttl) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test(start_paused = true)]
	async fn values_expire_after_ttl() {
		let store = MemoryStore::default();

		store
			.put("access_token", "token-1".into(), Duration::from_secs(3300))
			.await
			.expect("Saving a value into the memory store should succeed.");

		assert_eq!(
			store.get("access_token").await.expect("Memory store reads should succeed."),
			Some("token-1".into())
		);

		tokio::time::advance(Duration::from_secs(3299)).await;

		assert!(
			store.get("access_token").await.expect("Memory store reads should succeed.").is_some()
		);

		tokio::time::advance(Duration::from_secs(1)).await;

		assert_eq!(store.get("access_token").await.expect("Memory store reads should succeed."), None);
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn put_replaces_existing_value() {
		let store = MemoryStore::default();

		store.put("k", "old".into(), Duration::from_secs(60)).await.expect("First put should succeed.");
		store.put("k", "new".into(), Duration::from_secs(60)).await.expect("Second put should succeed.");

		assert_eq!(store.get("k").await.expect("Read should succeed."), Some("new".into()));
		assert_eq!(store.len(), 1);
	}

	#[tokio::test]
	async fn overflowing_ttl_is_rejected() {
		let store = MemoryStore::default();
		let err = store
			.put("k", "v".into(), Duration::MAX)
			.await
			.expect_err("An unrepresentable expiry should be rejected.");

		assert!(matches!(err, StoreError::Backend { .. }));
	}
}
