//! Proxy-level error taxonomy shared by the signer, token provider, report fetcher, and
//! HTTP boundary.
//!
//! Every upstream failure is classified where it is detected (status inspection, timeout
//! signal, response validation) so retry decisions and client-facing dispositions never
//! depend on error message text.

// self
use crate::_prelude::*;

/// Proxy-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedSource = Arc<dyn StdError + Send + Sync>;

/// Canonical proxy error exposed by public APIs.
///
/// The type is `Clone` so one deduplicated failure can be observed by every joined caller.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Service-account key material cannot be used.
	#[error(transparent)]
	Credential(#[from] CredentialError),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Cache-store failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),

	/// Token endpoint rejected the assertion or returned an unusable payload.
	#[error("Token exchange failed{}: {message}.", fmt_status(*status))]
	TokenExchange {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Upstream- or proxy-supplied message summarizing the failure.
		message: String,
	},
	/// Reporting quota is exhausted.
	#[error("Reporting API quota exceeded. Remaining tokens: {remaining}.")]
	QuotaExceeded {
		/// Tokens left in the current quota window.
		remaining: u64,
		/// Server-supplied `Retry-After` hint, if any.
		retry_after: Option<Duration>,
	},
	/// Upstream payload failed structural validation.
	#[error("Reporting API returned an invalid response: {reason}.")]
	InvalidResponse {
		/// What the validation rejected.
		reason: String,
	},
	/// Upstream rejected the request with a non-retryable status.
	#[error("Reporting API error{}: {message}.", fmt_status(*status))]
	Upstream {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Upstream-supplied message or body text.
		message: String,
	},
	/// In-flight request ended without producing an outcome (panicked or was aborted).
	#[error("In-flight request was interrupted: {reason}.")]
	Interrupted {
		/// Runtime-supplied reason.
		reason: String,
	},
	/// Client asked for a metric the proxy does not serve.
	#[error("Invalid metric type `{value}`.")]
	InvalidMetricKind {
		/// Raw query value.
		value: String,
	},
}
impl Error {
	/// Returns `true` when the failure is caused by upstream quota or rate limiting.
	pub fn is_quota(&self) -> bool {
		matches!(self, Self::QuotaExceeded { .. })
	}

	/// Returns `true` when repeating the same call may succeed.
	///
	/// Covers transport timeouts and network failures, upstream 5xx, quota exhaustion (any
	/// 429, including one from the token endpoint), and token exchanges that failed with 5xx.
	/// Validation failures and other 4xx responses are final.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::Transient(_) | Self::QuotaExceeded { .. } => true,
			Self::TokenExchange { status: Some(status), .. } => *status >= 500,
			_ => false,
		}
	}

	/// Server-supplied retry hint carried by quota errors.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::QuotaExceeded { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// Maps the error to the response class rendered by the HTTP boundary.
	pub fn disposition(&self) -> Disposition {
		match self {
			Self::InvalidMetricKind { .. } => Disposition::BadRequest,
			Self::QuotaExceeded { .. } => Disposition::QuotaExhausted,
			Self::Credential(_) | Self::Config(_) => Disposition::Misconfigured,
			Self::Storage(_)
			| Self::Transient(_)
			| Self::TokenExchange { .. }
			| Self::InvalidResponse { .. }
			| Self::Upstream { .. }
			| Self::Interrupted { .. } => Disposition::Unavailable,
		}
	}
}

/// Client-facing failure classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
	/// Request parameters are invalid (400).
	BadRequest,
	/// Upstream quota is exhausted (429).
	QuotaExhausted,
	/// Upstream is failing or returned unusable data (503).
	Unavailable,
	/// The proxy itself is misconfigured (500).
	Misconfigured,
}

/// Failures while turning service-account key material into a signature.
#[derive(Clone, Debug, ThisError)]
pub enum CredentialError {
	/// Private key PEM could not be parsed as an RSA key.
	#[error("Service account private key is not a valid RSA PEM.")]
	InvalidPrivateKey {
		/// Underlying key parsing failure.
		#[source]
		source: SharedSource,
	},
	/// Signing the assertion failed.
	#[error("Unable to sign the service account assertion.")]
	Signing {
		/// Underlying signing failure.
		#[source]
		source: SharedSource,
	},
}
impl CredentialError {
	/// Wraps a key parsing failure.
	pub fn invalid_private_key(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::InvalidPrivateKey { source: Arc::new(src) }
	}

	/// Wraps a signing failure.
	pub fn signing(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Signing { source: Arc::new(src) }
	}
}

/// Configuration and validation failures raised while assembling the proxy.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// Required environment variable is unset or empty.
	#[error("Required setting `{name}` is missing.")]
	MissingSetting {
		/// Environment variable name.
		name: &'static str,
	},
	/// Property identifier is not numeric.
	#[error("Property identifier `{value}` must be numeric.")]
	InvalidPropertyId {
		/// Rejected value.
		value: String,
	},
	/// Report start date is not `YYYY-MM-DD`.
	#[error("Start date `{value}` must use the YYYY-MM-DD format.")]
	InvalidStartDate {
		/// Rejected value.
		value: String,
	},
	/// Endpoint URL cannot be parsed.
	#[error("Setting `{name}` is not a valid URL.")]
	InvalidUrl {
		/// Setting name.
		name: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Listen address cannot be parsed.
	#[error("Listen address `{value}` is invalid.")]
	InvalidListenAddress {
		/// Rejected value.
		value: String,
	},
	/// Service-account JSON is malformed or misses required fields.
	#[error("Service account credential is invalid: {message}.")]
	InvalidCredential {
		/// Path-qualified parsing failure.
		message: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedSource,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Clone, Debug, ThisError)]
pub enum TransientError {
	/// Upstream answered with a 5xx status.
	#[error("Upstream server error (HTTP {status}).")]
	Server {
		/// HTTP status code.
		status: u16,
	},
	/// The attempt exceeded its deadline.
	#[error("Upstream request timed out after {timeout:?}.")]
	Timeout {
		/// Deadline applied to the attempt.
		timeout: Duration,
	},
	/// DNS, TCP, or TLS failure before a response arrived.
	#[error("Network error occurred while calling the upstream.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedSource,
	},
}
impl TransientError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}

fn fmt_status(status: Option<u16>) -> String {
	status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn retryable_classification_follows_variants() {
		assert!(Error::from(TransientError::Server { status: 502 }).is_retryable());
		assert!(
			Error::from(TransientError::Timeout { timeout: Duration::from_secs(30) })
				.is_retryable()
		);
		assert!(Error::QuotaExceeded { remaining: 0, retry_after: None }.is_retryable());
		assert!(
			Error::TokenExchange { status: Some(503), message: "unavailable".into() }
				.is_retryable()
		);
		assert!(
			!Error::TokenExchange { status: Some(401), message: "unauthorized".into() }
				.is_retryable()
		);
		assert!(!Error::InvalidResponse { reason: "missing rows".into() }.is_retryable());
		assert!(
			!Error::Upstream { status: Some(400), message: "bad request".into() }.is_retryable()
		);
	}

	#[test]
	fn dispositions_separate_quota_from_other_failures() {
		let quota =
			Error::QuotaExceeded { remaining: 0, retry_after: Some(Duration::from_secs(120)) };

		assert_eq!(quota.disposition(), Disposition::QuotaExhausted);
		assert_eq!(quota.retry_after(), Some(Duration::from_secs(120)));
		assert_eq!(
			Error::InvalidResponse { reason: "x".into() }.disposition(),
			Disposition::Unavailable
		);
		assert_eq!(
			Error::from(ConfigError::MissingSetting { name: "GA4_PROPERTY_ID" }).disposition(),
			Disposition::Misconfigured
		);
		assert_eq!(
			Error::InvalidMetricKind { value: "bogus".into() }.disposition(),
			Disposition::BadRequest
		);
	}

	#[test]
	fn status_is_rendered_only_when_known() {
		let with_status =
			Error::TokenExchange { status: Some(401), message: "invalid_grant".into() };
		let without_status = Error::Upstream { status: None, message: "reset".into() };

		assert_eq!(with_status.to_string(), "Token exchange failed (HTTP 401): invalid_grant.");
		assert_eq!(without_status.to_string(), "Reporting API error: reset.");
	}
}
