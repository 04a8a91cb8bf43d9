//! Quota-aware `Cache-Control` directives.
//!
//! Downstream caches are asked to hold responses longer as upstream quota runs out: below 200
//! remaining tokens the lifetimes grow, below 100 they grow again. Missing telemetry keeps
//! the base lifetimes.

// self
use crate::{
	_prelude::*,
	report::{LOW_QUOTA_THRESHOLD, MetricKind, QuotaSnapshot},
};

const CRITICAL_QUOTA_THRESHOLD: u64 = 100;

/// Shared-cache lifetimes for one response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheDirective {
	/// `s-maxage` in seconds.
	pub s_maxage: u64,
	/// `stale-while-revalidate` in seconds.
	pub stale_while_revalidate: u64,
}
impl CacheDirective {
	/// Base lifetimes for `kind` with healthy quota.
	pub const fn base(kind: MetricKind) -> Self {
		match kind {
			MetricKind::Online => Self { s_maxage: 5, stale_while_revalidate: 30 },
			MetricKind::Total => Self { s_maxage: 600, stale_while_revalidate: 3600 },
		}
	}

	/// Lifetimes for `kind` given the latest quota telemetry.
	pub fn for_quota(kind: MetricKind, quota: Option<&QuotaSnapshot>) -> Self {
		let base = Self::base(kind);

		match quota.and_then(|q| q.tokens_remaining) {
			Some(remaining) if remaining < CRITICAL_QUOTA_THRESHOLD => Self {
				s_maxage: base.s_maxage * 5,
				stale_while_revalidate: base.stale_while_revalidate * 2,
			},
			Some(remaining) if remaining < LOW_QUOTA_THRESHOLD => Self {
				s_maxage: base.s_maxage * 2,
				stale_while_revalidate: base.stale_while_revalidate * 3 / 2,
			},
			_ => base,
		}
	}
}
impl Display for CacheDirective {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "s-maxage={}, stale-while-revalidate={}", self.s_maxage, self.stale_while_revalidate)
	}
}

/// Renders the `Cache-Control` value for `kind` under `quota`.
pub fn compute_directive(kind: MetricKind, quota: Option<&QuotaSnapshot>) -> String {
	CacheDirective::for_quota(kind, quota).to_string()
}

/// Client-facing warning emitted while quota is low.
pub fn quota_warning(quota: Option<&QuotaSnapshot>) -> Option<String> {
	quota
		.and_then(QuotaSnapshot::low_remaining)
		.map(|remaining| format!("Low quota: {remaining} tokens remaining"))
}
