//! Observability helpers for upstream calls.
//!
//! - Spans named `stats_proxy.upstream` carry the `call` (token exchange or report endpoint)
//!   and `stage` (call site) fields.
//! - Enable the `metrics` feature to export the `stats_proxy_upstream_total` counter (labeled
//!   by `call` and `outcome`), the `stats_proxy_upstream_duration_seconds` histogram, and the
//!   `stats_proxy_quota_tokens_remaining` gauge.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Upstream call kinds observed by the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UpstreamCall {
	/// JWT-bearer token exchange.
	TokenExchange,
	/// Realtime report endpoint.
	RealtimeReport,
	/// Core report endpoint.
	CoreReport,
}
impl UpstreamCall {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			UpstreamCall::TokenExchange => "token_exchange",
			UpstreamCall::RealtimeReport => "realtime",
			UpstreamCall::CoreReport => "core",
		}
	}
}
impl Display for UpstreamCall {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to an upstream helper.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Installs the process-wide `tracing` subscriber: `RUST_LOG`-style filtering (default
/// `info`) and a fmt layer.
pub fn init_tracing() {
	// crates.io
	use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

	let _ = tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.with(tracing_subscriber::fmt::layer())
		.try_init();
}
