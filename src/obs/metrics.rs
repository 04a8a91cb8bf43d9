//! Counters, latency histograms, and the quota gauge; all no-ops unless the `metrics`
//! feature is enabled and a global recorder is installed.

// self
use crate::{
	_prelude::*,
	obs::{CallOutcome, UpstreamCall},
};

/// Counter incremented once per attempt, success, and failure of an upstream call.
pub const UPSTREAM_TOTAL: &str = "stats_proxy_upstream_total";
/// Histogram of upstream call durations in seconds, retries and backoff included.
pub const UPSTREAM_DURATION_SECONDS: &str = "stats_proxy_upstream_duration_seconds";
/// Gauge holding the last `tokensRemaining` value reported by each report endpoint.
pub const QUOTA_TOKENS_REMAINING: &str = "stats_proxy_quota_tokens_remaining";

/// Records an upstream call outcome.
pub fn record_upstream_outcome(call: UpstreamCall, outcome: CallOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(UPSTREAM_TOTAL, "call" => call.as_str(), "outcome" => outcome.as_str())
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (call, outcome);
	}
}

/// Records how long an upstream call took end to end.
pub fn record_upstream_latency(call: UpstreamCall, elapsed: Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!(UPSTREAM_DURATION_SECONDS, "call" => call.as_str())
			.record(elapsed.as_secs_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (call, elapsed);
	}
}

/// Publishes the remaining quota tokens last seen on `call`.
pub fn record_quota_remaining(call: UpstreamCall, remaining: u64) {
	#[cfg(feature = "metrics")]
	{
		metrics::gauge!(QUOTA_TOKENS_REMAINING, "call" => call.as_str()).set(remaining as f64);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (call, remaining);
	}
}
