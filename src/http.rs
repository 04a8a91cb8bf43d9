//! Outbound HTTP transport shared by the token exchange and the report fetcher.
//!
//! [`ReqwestHttpClient`] applies a per-attempt timeout to every call and captures the status,
//! `Retry-After` hint, and body text in an [`UpstreamResponse`]. Failures that happen before a
//! response arrives are classified on the spot: deadline overruns become
//! [`TransientError::Timeout`], everything else [`TransientError::Network`]. Status handling
//! is left to callers because the token endpoint and the reporting API classify statuses
//! differently.

// crates.io
use reqwest::{
	Client as ReqwestClient, Error as ReqwestError, RequestBuilder,
	header::{HeaderMap, RETRY_AFTER},
	redirect::Policy,
};
use time::format_description::well_known::Rfc2822;
// self
use crate::{
	_prelude::*,
	error::{ConfigError, TransientError},
};

/// Status, retry hint, and body captured from one upstream response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpstreamResponse {
	/// HTTP status code.
	pub status: u16,
	/// Retry-After hint expressed as a relative duration.
	pub retry_after: Option<Duration>,
	/// Response body decoded as text.
	pub body: String,
}
impl UpstreamResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
///
/// Upstream endpoints answer directly, so the default client never follows redirects.
#[derive(Clone, Debug)]
pub struct ReqwestHttpClient(ReqwestClient);
impl ReqwestHttpClient {
	/// Builds a client with redirects disabled.
	pub fn new() -> Result<Self, ConfigError> {
		let client = ReqwestClient::builder()
			.redirect(Policy::none())
			.build()
			.map_err(ConfigError::http_client_build)?;

		Ok(Self(client))
	}

	/// Sends a form-encoded `POST`.
	pub async fn post_form(
		&self,
		url: &Url,
		form: &[(&str, &str)],
		timeout: Duration,
	) -> Result<UpstreamResponse> {
		self.execute(self.0.post(url.clone()).form(form), timeout).await
	}

	/// Sends a JSON `POST` authorized with `bearer`.
	pub async fn post_json(
		&self,
		url: &Url,
		bearer: &str,
		body: &serde_json::Value,
		timeout: Duration,
	) -> Result<UpstreamResponse> {
		let request = self
			.0
			.post(url.clone())
			.bearer_auth(bearer)
			.header(reqwest::header::CONTENT_TYPE, "application/json")
			.body(body.to_string());

		self.execute(request, timeout).await
	}

	async fn execute(&self, request: RequestBuilder, timeout: Duration) -> Result<UpstreamResponse> {
		let response = request
			.timeout(timeout)
			.send()
			.await
			.map_err(|e| map_transport_error(e, timeout))?;
		let status = response.status().as_u16();
		let retry_after = parse_retry_after(response.headers());
		let body = response.text().await.map_err(|e| map_transport_error(e, timeout))?;

		Ok(UpstreamResponse { status, retry_after, body })
	}
}

fn map_transport_error(err: ReqwestError, timeout: Duration) -> Error {
	if err.is_timeout() {
		TransientError::Timeout { timeout }.into()
	} else {
		TransientError::network(err).into()
	}
}

/// Parses `Retry-After` as delta-seconds or an RFC 2822 date in the future.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
	let value = headers.get(RETRY_AFTER)?;
	let raw = value.to_str().ok()?.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::from_secs(secs));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Duration::try_from(delta).ok();
		}
	}

	None
}
