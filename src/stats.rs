//! Request orchestration: metric validation, deduplication, token acquisition, report fetch,
//! and cache directive selection.
//!
//! Deduplication is the outermost layer, so joined callers share one token lookup, one
//! retried report call, and one outcome. Retries live inside the report fetcher.

// self
use crate::{
	_prelude::*,
	auth::ServiceAccountCredential,
	cache_control,
	config::Settings,
	dedupe::RequestDeduplicator,
	http::ReqwestHttpClient,
	report::{MetricKind, MetricReport, QuotaSnapshot, ReportFetcher},
	store::CacheStore,
	token::TokenProvider,
};

/// Metric value plus the caching metadata the HTTP boundary renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stats {
	/// Metric served.
	pub kind: MetricKind,
	/// Metric value.
	pub value: u64,
	/// `Cache-Control` header value.
	pub cache_control: String,
	/// Quota telemetry from the upstream response.
	pub quota: Option<QuotaSnapshot>,
}
impl Stats {
	fn from_report(report: MetricReport) -> Self {
		Self {
			kind: report.kind,
			value: report.value,
			cache_control: cache_control::compute_directive(report.kind, report.quota.as_ref()),
			quota: report.quota,
		}
	}

	/// `X-Quota-Warning` header value, when quota is low.
	pub fn quota_warning(&self) -> Option<String> {
		cache_control::quota_warning(self.quota.as_ref())
	}
}

/// Serves aggregate metrics for one property.
#[derive(Clone, Debug)]
pub struct StatsService {
	tokens: TokenProvider,
	reports: ReportFetcher,
	dedupe: RequestDeduplicator<MetricReport>,
}
impl StatsService {
	/// Wires a service from validated settings, the service-account credential, and a token
	/// store.
	pub fn new(
		settings: Settings,
		credential: ServiceAccountCredential,
		store: Arc<dyn CacheStore>,
	) -> Result<Self> {
		let http = ReqwestHttpClient::new()?;

		Ok(Self {
			tokens: TokenProvider::new(&settings, credential, store, http.clone()),
			reports: ReportFetcher::new(&settings, http)?,
			dedupe: RequestDeduplicator::new(),
		})
	}

	/// Resolves the `t` query value and serves the matching metric.
	///
	/// Unknown metric names fail before any upstream work.
	pub async fn get_stats(&self, raw_kind: Option<&str>) -> Result<Stats> {
		let kind = MetricKind::parse(raw_kind)?;
		let tokens = self.tokens.clone();
		let reports = self.reports.clone();
		let report = self
			.dedupe
			.dedupe(kind.dedupe_key(), move || async move {
				let token = tokens.access_token().await?;

				reports.fetch_metric(kind, &token).await
			})
			.await?;

		Ok(Stats::from_report(report))
	}
}
