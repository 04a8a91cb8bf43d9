//! Reporting API calls: request construction, per-attempt status classification, response
//! validation, metric extraction, and quota telemetry.

// std
use std::{str::FromStr, time::Instant};
// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	config::Settings,
	error::{ConfigError, TransientError},
	http::{ReqwestHttpClient, UpstreamResponse},
	obs::{self, CallOutcome, UpstreamCall, UpstreamSpan},
	retry::{BackoffRetrier, RetryOptions},
	token::BearerToken,
};

/// Remaining-token level under which quota is reported as low.
pub const LOW_QUOTA_THRESHOLD: u64 = 200;

const RESERVED_TOTAL: &str = "RESERVED_TOTAL";
const QUOTA_RETRY_LIMIT: u32 = 1;
const TRANSIENT_RETRY_LIMIT: u32 = 3;
const MESSAGE_SNIPPET_LEN: usize = 200;

/// Aggregate metric served by the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricKind {
	/// Users active right now (realtime endpoint, `activeUsers`).
	Online,
	/// Cumulative page views since the start date (core endpoint, `screenPageViews`).
	Total,
}
impl MetricKind {
	/// Parses the `t` query value; absent or empty selects [`MetricKind::Total`].
	pub fn parse(raw: Option<&str>) -> Result<Self> {
		match raw {
			None | Some("") => Ok(Self::Total),
			Some(value) => value.parse(),
		}
	}

	/// Field name used in the response body.
	pub const fn field_name(self) -> &'static str {
		match self {
			Self::Online => "online",
			Self::Total => "total",
		}
	}

	/// Key under which concurrent requests for this metric are collapsed.
	pub const fn dedupe_key(self) -> &'static str {
		match self {
			Self::Online => "stats-online",
			Self::Total => "stats-total",
		}
	}

	/// Upstream metric name.
	pub const fn metric_name(self) -> &'static str {
		match self {
			Self::Online => "activeUsers",
			Self::Total => "screenPageViews",
		}
	}

	/// Upstream endpoint label.
	pub const fn endpoint(self) -> UpstreamCall {
		match self {
			Self::Online => UpstreamCall::RealtimeReport,
			Self::Total => UpstreamCall::CoreReport,
		}
	}

	const fn method(self) -> &'static str {
		match self {
			Self::Online => "runRealtimeReport",
			Self::Total => "runReport",
		}
	}
}
impl FromStr for MetricKind {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s {
			"online" => Ok(Self::Online),
			"total" => Ok(Self::Total),
			other => Err(Error::InvalidMetricKind { value: other.into() }),
		}
	}
}
impl Display for MetricKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.field_name())
	}
}

/// Quota telemetry returned alongside a report.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
	/// Tokens charged for this request.
	#[serde(default)]
	pub tokens_consumed: Option<u64>,
	/// Tokens left in the current window.
	#[serde(default)]
	pub tokens_remaining: Option<u64>,
	/// Concurrent requests in flight for the property.
	#[serde(default)]
	pub concurrent_requests: Option<u64>,
}
impl QuotaSnapshot {
	/// Remaining tokens when they are known to be under [`LOW_QUOTA_THRESHOLD`].
	pub fn low_remaining(&self) -> Option<u64> {
		self.tokens_remaining.filter(|remaining| *remaining < LOW_QUOTA_THRESHOLD)
	}
}

/// One metric value extracted from a validated report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricReport {
	/// Metric that was fetched.
	pub kind: MetricKind,
	/// Coerced value; never negative.
	pub value: u64,
	/// Quota telemetry, when the upstream returned a recognizable one.
	pub quota: Option<QuotaSnapshot>,
}

/// Issues report requests for one property.
#[derive(Clone, Debug)]
pub struct ReportFetcher {
	http: ReqwestHttpClient,
	realtime_url: Url,
	core_url: Url,
	start_date: String,
	timeout: Duration,
	retrier: BackoffRetrier,
}
impl ReportFetcher {
	/// Builds a fetcher for `settings.property_id` against `settings.api_base`.
	pub fn new(settings: &Settings, http: ReqwestHttpClient) -> Result<Self, ConfigError> {
		let retrier = BackoffRetrier::new(
			RetryOptions::default()
				.with_max_retries(TRANSIENT_RETRY_LIMIT)
				.with_delays(settings.retry_initial_delay, settings.retry_max_delay)
				.with_should_retry(should_retry_report),
		);

		Ok(Self {
			http,
			realtime_url: report_url(settings, MetricKind::Online)?,
			core_url: report_url(settings, MetricKind::Total)?,
			start_date: settings.start_date.clone(),
			timeout: settings.report_timeout,
			retrier,
		})
	}

	/// Fetches `kind` with `token`, retrying quota and transient failures.
	pub async fn fetch_metric(&self, kind: MetricKind, token: &BearerToken) -> Result<MetricReport> {
		let call = kind.endpoint();
		let span = UpstreamSpan::new(call, "fetch_metric");

		obs::record_upstream_outcome(call, CallOutcome::Attempt);

		let started = Instant::now();
		let result = span
			.instrument(async {
				let url = self.url_for(kind);
				let body = self.request_body(kind);
				let response = self.retrier.run(|| self.attempt(url, token, &body)).await?;

				interpret(kind, &response.body)
			})
			.await;

		obs::record_upstream_latency(call, started.elapsed());

		match result {
			Ok(report) => {
				obs::record_upstream_outcome(call, CallOutcome::Success);

				let quota = report.quota.unwrap_or_default();

				if let Some(remaining) = quota.tokens_remaining {
					obs::record_quota_remaining(call, remaining);
				}

				tracing::info!(
					endpoint = call.as_str(),
					metric = kind.metric_name(),
					response_time_ms = started.elapsed().as_millis() as u64,
					tokens_consumed = quota.tokens_consumed,
					tokens_remaining = quota.tokens_remaining,
					"Reporting API request completed."
				);

				if let Some(remaining) = quota.low_remaining() {
					tracing::warn!(
						endpoint = call.as_str(),
						tokens_remaining = remaining,
						"Reporting API quota running low."
					);
				}

				Ok(report)
			},
			Err(e) => {
				obs::record_upstream_outcome(call, CallOutcome::Failure);

				Err(e)
			},
		}
	}

	/// JSON body sent for `kind`.
	pub fn request_body(&self, kind: MetricKind) -> Value {
		match kind {
			MetricKind::Online => serde_json::json!({
				"metrics": [{ "name": kind.metric_name() }],
				"returnPropertyQuota": true,
			}),
			MetricKind::Total => serde_json::json!({
				"dateRanges": [{ "startDate": self.start_date, "endDate": "today" }],
				"metrics": [{ "name": kind.metric_name() }],
				"metricAggregations": ["TOTAL"],
				"returnPropertyQuota": true,
			}),
		}
	}

	fn url_for(&self, kind: MetricKind) -> &Url {
		match kind {
			MetricKind::Online => &self.realtime_url,
			MetricKind::Total => &self.core_url,
		}
	}

	async fn attempt(
		&self,
		url: &Url,
		token: &BearerToken,
		body: &Value,
	) -> Result<UpstreamResponse> {
		let response = self.http.post_json(url, token.expose(), body, self.timeout).await?;

		if response.is_success() {
			return Ok(response);
		}

		tracing::warn!(status = response.status, "Reporting API returned an error status.");

		Err(classify_failure(&response))
	}
}

fn report_url(settings: &Settings, kind: MetricKind) -> Result<Url, ConfigError> {
	let raw = format!(
		"{}/properties/{}:{}",
		settings.api_base.as_str().trim_end_matches('/'),
		settings.property_id,
		kind.method()
	);

	Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { name: "STATS_API_BASE", source })
}

fn should_retry_report(error: &Error, attempt: u32) -> bool {
	match error {
		Error::QuotaExceeded { .. } => attempt < QUOTA_RETRY_LIMIT,
		Error::Transient(_) => attempt < TRANSIENT_RETRY_LIMIT,
		_ => false,
	}
}

/// Maps a non-2xx report response to its error class.
pub fn classify_failure(response: &UpstreamResponse) -> Error {
	match response.status {
		429 => Error::QuotaExceeded { remaining: 0, retry_after: response.retry_after },
		status if status >= 500 => TransientError::Server { status }.into(),
		_ if mentions_quota(&response.body) =>
			Error::QuotaExceeded { remaining: 0, retry_after: None },
		status => Error::Upstream { status: Some(status), message: snippet(&response.body) },
	}
}

fn interpret(kind: MetricKind, body: &str) -> Result<MetricReport> {
	let value: Value = serde_json::from_str(body)
		.map_err(|e| Error::InvalidResponse { reason: format!("body is not JSON ({e})") })?;

	if let Some(envelope) = value.get("error").filter(|e| e.is_object()) {
		return Err(envelope_error(envelope));
	}

	validate_report(&value)?;

	Ok(MetricReport {
		kind,
		value: parse_metric_value(extract_value(kind, &value)),
		quota: decode_quota(value.get("propertyQuota")),
	})
}

fn envelope_error(envelope: &Value) -> Error {
	let code = envelope.get("code").and_then(Value::as_u64);
	let message = envelope.get("message").and_then(Value::as_str).unwrap_or_default();

	if code == Some(429) || mentions_quota(message) {
		Error::QuotaExceeded { remaining: 0, retry_after: None }
	} else {
		Error::Upstream {
			status: code.and_then(|c| u16::try_from(c).ok()),
			message: snippet(message),
		}
	}
}

/// Checks the structural shape of a report before any value is read.
pub fn validate_report(value: &Value) -> Result<()> {
	let invalid = |reason: &str| Err(Error::InvalidResponse { reason: reason.into() });
	let rows = value.get("rows").and_then(Value::as_array);
	let totals = value.get("totals").and_then(Value::as_array);

	if rows.is_none() && totals.is_none() {
		return invalid("neither rows nor totals is an array");
	}

	for row in rows.into_iter().flatten() {
		let Some(metric_values) = row.get("metricValues").and_then(Value::as_array) else {
			return invalid("row without a metricValues array");
		};

		if !metric_values.iter().all(|mv| mv.get("value").is_some_and(Value::is_string)) {
			return invalid("metric value without a string value");
		}
	}

	if !totals.into_iter().flatten().all(|total| total.get("metricValues").is_some_and(Value::is_array)) {
		return invalid("totals entry without a metricValues array");
	}

	Ok(())
}

/// Reads the raw metric string from a validated report.
///
/// Online reads the first row. Total prefers the `RESERVED_TOTAL` aggregation row, then the
/// first totals entry, then the first row. Anything missing reads as `"0"`.
pub fn extract_value(kind: MetricKind, value: &Value) -> &str {
	let rows = value.get("rows").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
	let first_row = || rows.first().and_then(first_metric);
	let raw = match kind {
		MetricKind::Online => first_row(),
		MetricKind::Total => rows
			.iter()
			.find(|row| {
				row.pointer("/dimensionValues/0/value")
					.and_then(Value::as_str)
					.is_some_and(|v| v.contains(RESERVED_TOTAL))
			})
			.and_then(first_metric)
			.or_else(|| value.pointer("/totals/0").and_then(first_metric))
			.or_else(first_row),
	};

	raw.unwrap_or("0")
}

fn first_metric(row: &Value) -> Option<&str> {
	row.pointer("/metricValues/0/value").and_then(Value::as_str)
}

/// Reads the leading integer of a raw metric string (`"42.0"` is 42, `"12abc"` is 12).
///
/// Strings without a leading digit and negative values log a warning and become `0`.
/// Integers past `u64::MAX` saturate.
pub fn parse_metric_value(raw: &str) -> u64 {
	let trimmed = raw.trim_start();
	let (negative, unsigned) = match trimmed.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
	};
	let digits = &unsigned[..unsigned.bytes().take_while(u8::is_ascii_digit).count()];

	if digits.is_empty() || negative {
		tracing::warn!(raw, "Metric value has no non-negative integer prefix; using 0.");

		return 0;
	}

	digits.parse().unwrap_or(u64::MAX)
}

fn decode_quota(raw: Option<&Value>) -> Option<QuotaSnapshot> {
	let raw = raw.filter(|v| !v.is_null())?;

	match QuotaSnapshot::deserialize(raw) {
		Ok(quota) => Some(quota),
		Err(e) => {
			tracing::warn!(error = %e, "Ignoring unrecognized property quota payload.");

			None
		},
	}
}

fn mentions_quota(text: &str) -> bool {
	text.to_ascii_lowercase().contains("quota")
}

fn snippet(text: &str) -> String {
	text.chars().take(MESSAGE_SNIPPET_LEN).collect()
}
