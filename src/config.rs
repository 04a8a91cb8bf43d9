//! Runtime settings for the proxy and their environment-variable loader.

// std
use std::{env, net::SocketAddr};
// crates.io
use time::{Date, macros::format_description};
// self
use crate::{_prelude::*, auth::ServiceAccountCredential, error::ConfigError};

/// Default report start date used when `GA_START_DATE` is unset.
pub const DEFAULT_START_DATE: &str = "2025-07-12";
/// Default reporting API base URL.
pub const DEFAULT_API_BASE: &str = "https://analyticsdata.googleapis.com/v1beta";
/// Default OAuth token endpoint; also the assertion audience.
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Read-only analytics scope requested for every token.
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/analytics.readonly";
/// Default bind address for the HTTP boundary.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
/// Origins allowed by CORS in production deployments.
pub const PRODUCTION_ORIGINS: &[&str] = &["https://aiheadline.news"];
/// Origins allowed by CORS outside production.
pub const DEVELOPMENT_ORIGINS: &[&str] = &["https://aiheadline.news", "http://localhost:1313"];

/// Environment variable carrying the service-account JSON.
pub const ENV_SERVICE_KEY: &str = "GA4_SERVICE_KEY";
/// Environment variable carrying the numeric property identifier.
pub const ENV_PROPERTY_ID: &str = "GA4_PROPERTY_ID";
/// Environment variable carrying the optional report start date.
pub const ENV_START_DATE: &str = "GA_START_DATE";

/// Validated proxy settings.
#[derive(Clone, Debug)]
pub struct Settings {
	/// Numeric reporting property identifier.
	pub property_id: String,
	/// First day (`YYYY-MM-DD`) included in the cumulative total.
	pub start_date: String,
	/// Reporting API base URL; report paths are appended to it.
	pub api_base: Url,
	/// OAuth token endpoint; also used as the assertion audience.
	pub token_url: Url,
	/// Scope requested in assertions.
	pub scope: String,
	/// Socket address the HTTP boundary binds to.
	pub listen: SocketAddr,
	/// Origins echoed back by CORS; the first one is the fallback.
	pub allowed_origins: Vec<String>,
	/// Base delay for transient retry backoff.
	pub retry_initial_delay: Duration,
	/// Cap for transient retry backoff.
	pub retry_max_delay: Duration,
	/// Per-attempt timeout for report calls.
	pub report_timeout: Duration,
	/// Per-attempt timeout for token exchanges.
	pub token_timeout: Duration,
}
impl Settings {
	/// Creates settings for `property_id` with every other value at its default.
	pub fn new(property_id: impl Into<String>) -> Result<Self, ConfigError> {
		let property_id = validate_property_id(property_id.into())?;

		Ok(Self {
			property_id,
			start_date: DEFAULT_START_DATE.into(),
			api_base: parse_url("STATS_API_BASE", DEFAULT_API_BASE)?,
			token_url: parse_url("STATS_TOKEN_URL", DEFAULT_TOKEN_URL)?,
			scope: DEFAULT_SCOPE.into(),
			listen: parse_listen(DEFAULT_LISTEN)?,
			allowed_origins: DEVELOPMENT_ORIGINS.iter().map(|o| o.to_string()).collect(),
			retry_initial_delay: Duration::from_millis(1000),
			retry_max_delay: Duration::from_millis(10_000),
			report_timeout: Duration::from_secs(30),
			token_timeout: Duration::from_secs(15),
		})
	}

	/// Loads settings and the service-account credential from the process environment.
	///
	/// | Variable | Meaning |
	/// | --- | --- |
	/// | `GA4_SERVICE_KEY` | service-account JSON (required) |
	/// | `GA4_PROPERTY_ID` | numeric property id (required) |
	/// | `GA_START_DATE` | report start date, `YYYY-MM-DD` |
	/// | `STATS_LISTEN` | bind address |
	/// | `STATS_ALLOWED_ORIGINS` | comma-separated CORS allow-list |
	/// | `STATS_API_BASE` / `STATS_TOKEN_URL` | upstream overrides |
	/// | `NODE_ENV` | `production` narrows the default CORS allow-list |
	pub fn from_env() -> Result<(Self, ServiceAccountCredential), ConfigError> {
		Self::from_lookup(|name| env::var(name).ok())
	}

	/// Same as [`Settings::from_env`] but reads values through `lookup`.
	pub fn from_lookup(
		lookup: impl Fn(&str) -> Option<String>,
	) -> Result<(Self, ServiceAccountCredential), ConfigError> {
		let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
		let raw_key = get(ENV_SERVICE_KEY)
			.ok_or(ConfigError::MissingSetting { name: ENV_SERVICE_KEY })?;
		let property_id = get(ENV_PROPERTY_ID)
			.ok_or(ConfigError::MissingSetting { name: ENV_PROPERTY_ID })?;
		let credential = ServiceAccountCredential::from_json(&raw_key)?;
		let mut settings = Self::new(property_id.trim())?;

		if let Some(date) = get(ENV_START_DATE) {
			settings = settings.with_start_date(date.trim())?;
		}
		if let Some(listen) = get("STATS_LISTEN") {
			settings.listen = parse_listen(listen.trim())?;
		}
		if let Some(base) = get("STATS_API_BASE") {
			settings.api_base = parse_url("STATS_API_BASE", base.trim())?;
		}
		if let Some(token_url) = get("STATS_TOKEN_URL") {
			settings.token_url = parse_url("STATS_TOKEN_URL", token_url.trim())?;
		}

		settings.allowed_origins = match get("STATS_ALLOWED_ORIGINS") {
			Some(list) => list
				.split(',')
				.map(str::trim)
				.filter(|o| !o.is_empty())
				.map(str::to_owned)
				.collect(),
			None if get("NODE_ENV").as_deref() == Some("production") =>
				PRODUCTION_ORIGINS.iter().map(|o| o.to_string()).collect(),
			None => settings.allowed_origins,
		};

		Ok((settings, credential))
	}

	/// Overrides the report start date after validating its format.
	pub fn with_start_date(mut self, date: impl Into<String>) -> Result<Self, ConfigError> {
		let date = date.into();

		Date::parse(&date, format_description!("[year]-[month]-[day]"))
			.map_err(|_| ConfigError::InvalidStartDate { value: date.clone() })?;

		self.start_date = date;

		Ok(self)
	}

	/// Overrides the reporting API base URL.
	pub fn with_api_base(mut self, api_base: Url) -> Self {
		self.api_base = api_base;

		self
	}

	/// Overrides the token endpoint (and assertion audience).
	pub fn with_token_url(mut self, token_url: Url) -> Self {
		self.token_url = token_url;

		self
	}

	/// Overrides the transient retry schedule.
	pub fn with_retry_delays(mut self, initial: Duration, max: Duration) -> Self {
		self.retry_initial_delay = initial;
		self.retry_max_delay = max;

		self
	}

	/// Overrides the per-attempt timeouts for report calls and token exchanges.
	pub fn with_timeouts(mut self, report: Duration, token: Duration) -> Self {
		self.report_timeout = report;
		self.token_timeout = token;

		self
	}
}

fn validate_property_id(value: String) -> Result<String, ConfigError> {
	if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
		Ok(value)
	} else {
		Err(ConfigError::InvalidPropertyId { value })
	}
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { name, source })
}

fn parse_listen(raw: &str) -> Result<SocketAddr, ConfigError> {
	raw.parse().map_err(|_| ConfigError::InvalidListenAddress { value: raw.into() })
}
