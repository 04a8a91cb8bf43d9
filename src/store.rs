//! Keyed cache-store contract and the built-in in-memory implementation.
//!
//! The proxy only needs `get` and `put`-with-TTL semantics: freshness is decided by the
//! store, never by inspecting the cached value. Any expiring key-value backend satisfies the
//! contract.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Boxed future returned by [`CacheStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend contract for process-external shared values such as the bearer token.
pub trait CacheStore
where
	Self: Send + Sync,
{
	/// Fetches the value stored under `key` if it has not expired.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores `value` under `key`, replacing any previous value, expiring after `ttl`.
	fn put<'a>(&'a self, key: &'a str, value: String, ttl: Duration) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`CacheStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
