//! Access-token acquisition for the reporting API via the JWT-bearer grant.
//!
//! [`TokenProvider::access_token`] serves the token cached under [`TOKEN_CACHE_KEY`] while the
//! store still holds it. On a miss it signs one assertion and exchanges it at the token
//! endpoint through a [`BackoffRetrier`]; every retry resends that assertion. A 429 from the
//! token endpoint is quota exhaustion and waits out the server's `Retry-After` hint. The token
//! is handed back before the cache write finishes: the write runs on its own task and only
//! logs when it fails.

// std
use std::time::Instant;
// self
use crate::{
	_prelude::*,
	auth::{CryptoSigner, ServiceAccountCredential, SignedAssertion},
	config::Settings,
	http::{ReqwestHttpClient, UpstreamResponse},
	obs::{self, CallOutcome, UpstreamCall, UpstreamSpan},
	retry::{BackoffRetrier, RetryOptions},
	store::CacheStore,
};

/// Store key holding the bearer token.
pub const TOKEN_CACHE_KEY: &str = "access_token";
/// Cache lifetime for the bearer token, five minutes short of its upstream validity.
pub const TOKEN_CACHE_TTL: Duration = Duration::from_secs(55 * 60);
/// Grant type sent with every assertion.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const TOKEN_MAX_RETRIES: u32 = 2;

/// OAuth bearer token; never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerToken(String);
impl BearerToken {
	/// Wraps a raw token value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the raw token for the `Authorization` header.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("BearerToken(<redacted>)")
	}
}
impl Display for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[derive(Deserialize)]
struct TokenResponse {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct TokenErrorResponse {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

/// Caching token source for one service account.
#[derive(Clone)]
pub struct TokenProvider {
	store: Arc<dyn CacheStore>,
	http: ReqwestHttpClient,
	signer: CryptoSigner,
	credential: Arc<ServiceAccountCredential>,
	token_url: Url,
	timeout: Duration,
	retrier: BackoffRetrier,
}
impl TokenProvider {
	/// Creates a provider that exchanges assertions for `credential` at `settings.token_url`.
	pub fn new(
		settings: &Settings,
		credential: ServiceAccountCredential,
		store: Arc<dyn CacheStore>,
		http: ReqwestHttpClient,
	) -> Self {
		let retrier = BackoffRetrier::new(
			RetryOptions::default()
				.with_max_retries(TOKEN_MAX_RETRIES)
				.with_delays(settings.retry_initial_delay, settings.retry_max_delay),
		);

		Self {
			store,
			http,
			signer: CryptoSigner::new(&settings.scope, settings.token_url.as_str()),
			credential: Arc::new(credential),
			token_url: settings.token_url.clone(),
			timeout: settings.token_timeout,
			retrier,
		}
	}

	/// Returns a usable bearer token, exchanging a new assertion only on a cache miss.
	pub async fn access_token(&self) -> Result<BearerToken> {
		const CALL: UpstreamCall = UpstreamCall::TokenExchange;

		if let Some(cached) = self.store.get(TOKEN_CACHE_KEY).await?.filter(|v| !v.is_empty()) {
			tracing::debug!("Using cached access token.");

			return Ok(BearerToken(cached));
		}

		let span = UpstreamSpan::new(CALL, "access_token");

		obs::record_upstream_outcome(CALL, CallOutcome::Attempt);

		let started = Instant::now();
		let result = span
			.instrument(async {
				let assertion = self.signer.sign(&self.credential)?;

				self.exchange_with_retry(&assertion).await
			})
			.await;

		obs::record_upstream_latency(CALL, started.elapsed());

		match result {
			Ok(token) => {
				obs::record_upstream_outcome(CALL, CallOutcome::Success);
				self.persist(&token);

				Ok(token)
			},
			Err(e) => {
				obs::record_upstream_outcome(CALL, CallOutcome::Failure);
				tracing::error!(error = %e, "Token exchange failed.");

				Err(e)
			},
		}
	}

	async fn exchange_with_retry(&self, assertion: &SignedAssertion) -> Result<BearerToken> {
		self.retrier.run(|| self.exchange(assertion)).await
	}

	async fn exchange(&self, assertion: &SignedAssertion) -> Result<BearerToken> {
		let form = [("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())];
		let response = self.http.post_form(&self.token_url, &form, self.timeout).await?;

		parse_token_response(&response)
	}

	fn persist(&self, token: &BearerToken) {
		let store = self.store.clone();
		let value = token.expose().to_owned();

		tokio::spawn(async move {
			if let Err(e) = store.put(TOKEN_CACHE_KEY, value, TOKEN_CACHE_TTL).await {
				tracing::warn!(error = %e, "Failed to cache access token.");
			}
		});
	}
}
impl Debug for TokenProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenProvider")
			.field("client_email", &self.credential.client_email)
			.field("token_url", &self.token_url.as_str())
			.field("timeout", &self.timeout)
			.finish()
	}
}

fn parse_token_response(response: &UpstreamResponse) -> Result<BearerToken> {
	let status = Some(response.status);

	if response.status == 429 {
		return Err(Error::QuotaExceeded { remaining: 0, retry_after: response.retry_after });
	}
	if !response.is_success() {
		let message = serde_json::from_str::<TokenErrorResponse>(&response.body)
			.map(|body| match body.error_description {
				Some(description) => format!("{}: {description}", body.error),
				None => body.error,
			})
			.unwrap_or_else(|_| "token endpoint rejected the assertion".into());

		return Err(Error::TokenExchange { status, message });
	}

	let mut deserializer = serde_json::Deserializer::from_str(&response.body);
	let body: TokenResponse = serde_path_to_error::deserialize(&mut deserializer)
		.map_err(|e| Error::TokenExchange { status, message: e.to_string() })?;

	match body.access_token.filter(|token| !token.is_empty()) {
		Some(token) => {
			tracing::debug!(expires_in = body.expires_in, "Access token issued.");

			Ok(BearerToken(token))
		},
		None => Err(Error::TokenExchange { status, message: "response carried no access token".into() }),
	}
}
