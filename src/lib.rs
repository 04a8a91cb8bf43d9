//! Quota-aware edge proxy for aggregate analytics metrics: service-account token exchange,
//! retry/backoff that treats quota exhaustion apart from transient failure, in-flight request
//! deduplication, and cache directives that widen as upstream quota runs low.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache_control;
pub mod config;
pub mod dedupe;
pub mod error;
pub mod http;
pub mod obs;
pub mod report;
pub mod retry;
pub mod server;
pub mod stats;
pub mod store;
pub mod token;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::ServiceAccountCredential,
		config::Settings,
		stats::StatsService,
		store::{CacheStore, MemoryStore},
	};

	/// PKCS#8 RSA key used to sign test assertions.
	pub const TEST_PRIVATE_KEY_PEM: &str =
		include_str!("../tests/fixtures/service_account_key.pem");
	/// Public half of [`TEST_PRIVATE_KEY_PEM`] for signature verification.
	pub const TEST_PUBLIC_KEY_PEM: &str = include_str!("../tests/fixtures/service_account_pub.pem");
	/// Numeric property identifier used by test settings.
	pub const TEST_PROPERTY_ID: &str = "123456789";

	/// Builds a credential backed by the test key pair.
	pub fn test_credential() -> ServiceAccountCredential {
		ServiceAccountCredential::new(
			"stats-proxy@test-project.iam.gserviceaccount.com",
			TEST_PRIVATE_KEY_PEM,
			"test-key-id",
		)
	}

	/// Builds settings that route every upstream call to `base_url` (an `httpmock` server)
	/// and shrink transient backoff so retry tests finish quickly.
	pub fn test_settings(base_url: &str) -> Settings {
		let api_base = Url::parse(&format!("{base_url}/v1beta"))
			.expect("Mock API base URL should parse successfully.");
		let token_url = Url::parse(&format!("{base_url}/token"))
			.expect("Mock token URL should parse successfully.");

		Settings::new(TEST_PROPERTY_ID)
			.expect("Test property identifier should be valid.")
			.with_api_base(api_base)
			.with_token_url(token_url)
			.with_retry_delays(
				std::time::Duration::from_millis(1),
				std::time::Duration::from_millis(5),
			)
	}

	/// Constructs a [`StatsService`] backed by an in-memory store and the test credential.
	pub fn build_test_service(base_url: &str) -> (StatsService, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn CacheStore> = store_backend.clone();
		let service = StatsService::new(test_settings(base_url), test_credential(), store)
			.expect("Test stats service should build successfully.");

		(service, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
		time::Duration,
	};

	pub use parking_lot::Mutex;
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::OffsetDateTime;
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {analytics_stats_proxy as _, base64 as _, color_eyre as _, httpmock as _, tower as _};
