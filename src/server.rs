//! HTTP boundary: the `/stats` route, CORS handling, and error rendering.
//!
//! Every failure is rendered with a fixed client-facing message. Upstream text never reaches
//! the response body.

// crates.io
use axum::{
	Json, Router,
	extract::{RawQuery, State},
	http::{
		HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
		header::{
			ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE,
			CACHE_CONTROL, ORIGIN, RETRY_AFTER, VARY,
		},
	},
	response::{IntoResponse, Response},
	routing::get,
};
use serde_json::{Map, Value};
// self
use crate::{_prelude::*, error::Disposition, stats::StatsService};

/// Header carrying the low-quota notice.
pub const QUOTA_WARNING_HEADER: HeaderName = HeaderName::from_static("x-quota-warning");

const ALLOWED_METHODS: &str = "GET, OPTIONS";
const CORS_MAX_AGE_SECS: &str = "86400";

/// CORS allow-list; the first origin is returned for unknown or absent `Origin` headers.
#[derive(Clone, Debug)]
pub struct CorsPolicy {
	allowed_origins: Vec<String>,
}
impl CorsPolicy {
	/// Creates a policy from an ordered allow-list.
	pub fn new(allowed_origins: Vec<String>) -> Self {
		Self { allowed_origins }
	}

	/// Origin to echo for a request carrying `origin`.
	pub fn allow_origin<'a>(&'a self, origin: Option<&'a str>) -> Option<&'a str> {
		match origin {
			Some(origin) if self.allowed_origins.iter().any(|allowed| allowed == origin) =>
				Some(origin),
			_ => self.allowed_origins.first().map(String::as_str),
		}
	}

	fn apply(&self, request_headers: &HeaderMap, response: &mut Response) {
		let origin = request_headers.get(ORIGIN).and_then(|v| v.to_str().ok());
		let headers = response.headers_mut();

		if let Some(value) =
			self.allow_origin(origin).and_then(|o| HeaderValue::from_str(o).ok())
		{
			headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, value);
			headers.insert(VARY, HeaderValue::from_static("Origin"));
		}

		headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOWED_METHODS));
		headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(CORS_MAX_AGE_SECS));
	}
}

/// Shared router state.
///
/// When configuration failed to load, the load error is kept instead of a service and
/// `/stats` answers 500 while the process keeps serving.
#[derive(Clone, Debug)]
pub struct AppState {
	service: Result<Arc<StatsService>, Error>,
	cors: Arc<CorsPolicy>,
}
impl AppState {
	/// State backed by a working service.
	pub fn new(service: StatsService, cors: CorsPolicy) -> Self {
		Self { service: Ok(Arc::new(service)), cors: Arc::new(cors) }
	}

	/// State for a process whose configuration could not be loaded.
	pub fn misconfigured(error: impl Into<Error>, cors: CorsPolicy) -> Self {
		Self { service: Err(error.into()), cors: Arc::new(cors) }
	}
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/stats", get(stats).options(preflight))
		.fallback(fallback)
		.with_state(state)
}

async fn stats(
	State(state): State<AppState>,
	headers: HeaderMap,
	RawQuery(query): RawQuery,
) -> Response {
	let kind = metric_param(query.as_deref());
	let kind = kind.as_deref();
	let result = match &state.service {
		Ok(service) => service.get_stats(kind).await,
		Err(e) => Err(e.clone()),
	};
	let mut response = match result {
		Ok(stats) => {
			let body = Map::from_iter([(stats.kind.field_name().to_owned(), Value::from(stats.value))]);
			let mut response = Json(body).into_response();
			let response_headers = response.headers_mut();

			if let Ok(value) = HeaderValue::from_str(&stats.cache_control) {
				response_headers.insert(CACHE_CONTROL, value);
			}
			if let Some(value) = stats.quota_warning().and_then(|w| HeaderValue::from_str(&w).ok()) {
				response_headers.insert(QUOTA_WARNING_HEADER, value);
			}

			response
		},
		Err(e) => {
			tracing::error!(
				error = %e,
				quota = e.is_quota(),
				endpoint = kind.unwrap_or("unknown"),
				"Stats request failed."
			);

			render_error(&e)
		},
	};

	state.cors.apply(&headers, &mut response);

	response
}

async fn preflight(State(state): State<AppState>, headers: HeaderMap) -> Response {
	let mut response = StatusCode::OK.into_response();

	state.cors.apply(&headers, &mut response);

	response
}

async fn fallback(state: State<AppState>, method: Method, headers: HeaderMap) -> Response {
	if method == Method::OPTIONS {
		return preflight(state, headers).await;
	}

	StatusCode::NOT_FOUND.into_response()
}

/// First `t` value in `query`; later repeats are ignored.
fn metric_param(query: Option<&str>) -> Option<String> {
	url::form_urlencoded::parse(query?.as_bytes())
		.find(|(key, _)| key == "t")
		.map(|(_, value)| value.into_owned())
}

/// Renders `error` as a JSON body with the status and `Retry-After` of its disposition.
pub fn render_error(error: &Error) -> Response {
	let (status, retry_after, message) = match error.disposition() {
		Disposition::BadRequest => (StatusCode::BAD_REQUEST, None, "Invalid metric type"),
		Disposition::QuotaExhausted => (
			StatusCode::TOO_MANY_REQUESTS,
			Some("300"),
			"API quota exceeded, please try again later",
		),
		Disposition::Unavailable =>
			(StatusCode::SERVICE_UNAVAILABLE, Some("60"), "Service temporarily unavailable"),
		Disposition::Misconfigured =>
			(StatusCode::INTERNAL_SERVER_ERROR, None, "Service configuration error"),
	};
	let mut response = (status, Json(serde_json::json!({ "error": message }))).into_response();

	if let Some(seconds) = retry_after {
		response.headers_mut().insert(RETRY_AFTER, HeaderValue::from_static(seconds));
	}

	response
}

#[cfg(test)]
mod tests {
	// crates.io
	use axum::body::{self, Body};
	use axum::http::Request;
	use tower::ServiceExt;
	// self
	use super::*;
	use crate::{
		config::{DEVELOPMENT_ORIGINS, ENV_PROPERTY_ID},
		error::ConfigError,
	};

	fn misconfigured() -> AppState {
		AppState::misconfigured(ConfigError::MissingSetting { name: ENV_PROPERTY_ID }, cors())
	}

	fn cors() -> CorsPolicy {
		CorsPolicy::new(DEVELOPMENT_ORIGINS.iter().map(|o| o.to_string()).collect())
	}

	async fn body_json(response: Response) -> Value {
		let bytes = body::to_bytes(response.into_body(), usize::MAX)
			.await
			.expect("Response body should be readable.");

		serde_json::from_slice(&bytes).expect("Response body should be JSON.")
	}

	#[test]
	fn metric_param_takes_the_first_value() {
		assert_eq!(metric_param(Some("t=online&t=total")).as_deref(), Some("online"));
		assert_eq!(metric_param(Some("x=1&t=to%74al")).as_deref(), Some("total"));
		assert_eq!(metric_param(Some("t=")).as_deref(), Some(""));
		assert_eq!(metric_param(Some("tt=online")), None);
		assert_eq!(metric_param(None), None);
	}

	#[tokio::test]
	async fn malformed_queries_still_render_json_with_cors() {
		let response = router(misconfigured())
			.oneshot(
				Request::get("/stats?t=online&t=total&t")
					.header(ORIGIN, "http://localhost:1313")
					.body(Body::empty())
					.expect("Request should build."),
			)
			.await
			.expect("Router should respond.");

		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:1313");
		assert_eq!(body_json(response).await, serde_json::json!({ "error": "Service configuration error" }));
	}

	#[test]
	fn cors_echoes_only_allowed_origins() {
		let cors = cors();

		assert_eq!(cors.allow_origin(Some("http://localhost:1313")), Some("http://localhost:1313"));
		assert_eq!(cors.allow_origin(Some("https://evil.example")), Some("https://aiheadline.news"));
		assert_eq!(cors.allow_origin(None), Some("https://aiheadline.news"));
		assert_eq!(CorsPolicy::new(Vec::new()).allow_origin(None), None);
	}

	#[tokio::test]
	async fn errors_render_fixed_messages() {
		let quota = render_error(&Error::QuotaExceeded { remaining: 0, retry_after: None });

		assert_eq!(quota.status(), StatusCode::TOO_MANY_REQUESTS);
		assert_eq!(quota.headers()[RETRY_AFTER], "300");
		assert_eq!(
			body_json(quota).await,
			serde_json::json!({ "error": "API quota exceeded, please try again later" })
		);

		let unavailable = render_error(&Error::Upstream { status: Some(400), message: "secret".into() });

		assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
		assert_eq!(unavailable.headers()[RETRY_AFTER], "60");
		assert_eq!(
			body_json(unavailable).await,
			serde_json::json!({ "error": "Service temporarily unavailable" })
		);

		let bad = render_error(&Error::InvalidMetricKind { value: "x".into() });

		assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
		assert!(bad.headers().get(RETRY_AFTER).is_none());
	}

	#[tokio::test]
	async fn misconfigured_state_answers_500() {
		let response = router(misconfigured())
			.oneshot(Request::get("/stats?t=online").body(Body::empty()).expect("Request should build."))
			.await
			.expect("Router should respond.");

		assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
		assert_eq!(body_json(response).await, serde_json::json!({ "error": "Service configuration error" }));
	}

	#[tokio::test]
	async fn preflight_and_unknown_paths() {
		let app = router(misconfigured());
		let preflight = app
			.clone()
			.oneshot(
				Request::builder()
					.method(Method::OPTIONS)
					.uri("/anything")
					.header(ORIGIN, "http://localhost:1313")
					.body(Body::empty())
					.expect("Request should build."),
			)
			.await
			.expect("Router should respond.");

		assert_eq!(preflight.status(), StatusCode::OK);
		assert_eq!(preflight.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "http://localhost:1313");
		assert_eq!(preflight.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");
		assert_eq!(preflight.headers()[ACCESS_CONTROL_MAX_AGE], "86400");

		let missing = app
			.oneshot(Request::get("/index.html").body(Body::empty()).expect("Request should build."))
			.await
			.expect("Router should respond.");

		assert_eq!(missing.status(), StatusCode::NOT_FOUND);
	}
}
