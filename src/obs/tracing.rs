// self
use crate::{_prelude::*, obs::UpstreamCall};

/// Future wrapped in an upstream span.
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;

/// A span builder used around upstream calls.
#[derive(Clone, Debug)]
pub struct UpstreamSpan {
	span: tracing::Span,
}
impl UpstreamSpan {
	/// Creates a new span tagged with the provided call kind + stage.
	pub fn new(call: UpstreamCall, stage: &'static str) -> Self {
		let span = tracing::info_span!("stats_proxy.upstream", call = call.as_str(), stage);

		Self { span }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		// crates.io
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = UpstreamSpan::new(UpstreamCall::TokenExchange, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}
}
