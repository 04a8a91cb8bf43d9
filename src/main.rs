//! `analytics-stats-proxy` binary: loads settings from the environment and serves `/stats`.

// std
use std::{env, process::ExitCode, sync::Arc};
// crates.io
use tokio::net::TcpListener;
// self
use analytics_stats_proxy::{
	config::{DEFAULT_LISTEN, DEVELOPMENT_ORIGINS, PRODUCTION_ORIGINS, Settings},
	obs,
	server::{self, AppState, CorsPolicy},
	stats::StatsService,
	store::MemoryStore,
};

#[tokio::main]
async fn main() -> ExitCode {
	obs::init_tracing();

	match run().await {
		Ok(()) => ExitCode::SUCCESS,
		Err(e) => {
			tracing::error!(error = %e, "Server terminated.");

			ExitCode::FAILURE
		},
	}
}

async fn run() -> std::io::Result<()> {
	let (state, listen) = match Settings::from_env() {
		Ok((settings, credential)) => {
			let listen = settings.listen.to_string();
			let cors = CorsPolicy::new(settings.allowed_origins.clone());

			match StatsService::new(settings, credential, Arc::new(MemoryStore::default())) {
				Ok(service) => (AppState::new(service, cors), listen),
				Err(e) => {
					tracing::error!(error = %e, "Failed to build the stats service.");

					(AppState::misconfigured(e, cors), listen)
				},
			}
		},
		Err(e) => {
			tracing::error!(error = %e, "Missing or invalid configuration; /stats will answer 500.");

			let production = env::var("NODE_ENV").is_ok_and(|v| v == "production");
			let origins = if production { PRODUCTION_ORIGINS } else { DEVELOPMENT_ORIGINS };
			let listen = env::var("STATS_LISTEN").unwrap_or_else(|_| DEFAULT_LISTEN.into());

			(
				AppState::misconfigured(
					e,
					CorsPolicy::new(origins.iter().map(|o| o.to_string()).collect()),
				),
				listen,
			)
		},
	};
	let listener = TcpListener::bind(&listen).await?;

	tracing::info!("listening on {listen}");

	axum::serve(listener, server::router(state)).with_graceful_shutdown(shutdown_signal()).await
}

async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(e) = tokio::signal::ctrl_c().await {
			tracing::warn!(error = %e, "Failed to install the Ctrl+C handler.");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut signal) => {
				signal.recv().await;
			},
			Err(e) => {
				tracing::warn!(error = %e, "Failed to install the SIGTERM handler.");
				std::future::pending::<()>().await;
			},
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = ctrl_c => {},
		_ = terminate => {},
	}

	tracing::info!("signal received, starting graceful shutdown");
}
