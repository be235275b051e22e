//! Kiro Gateway
//!
//! Single-binary local HTTP gateway that presents OpenAI-, Anthropic-, and
//! Gemini-style chat completion surfaces and translates every request into
//! a call against a single upstream provider, Kiro. See `SPEC_FULL.md` in
//! this repository for the full protocol and operational surface.

mod admin;
mod config;
mod error;
mod flow;
mod http;
mod metrics;
mod orchestrator;
mod summarizer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{get, post};
use kiro_auth::{CredentialStore, Refresher};
use kiro_client::UpstreamClient;
use kiro_governor::Governor;
use kiro_pool::Selector;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::Config;
use crate::flow::FlowLog;
use crate::http::HttpState;
use crate::orchestrator::Orchestrator;

const SESSION_PRUNE_INTERVAL: Duration = Duration::from_secs(30);
const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting kiro-gateway");

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.listen_addr,
        accounts = config.document.accounts.len(),
        "configuration loaded"
    );

    let http_client = reqwest::Client::new();
    let store = Arc::new(CredentialStore::from_records(config_path.clone(), config.document.accounts.clone()));
    let selector = Arc::new(Selector::new(store.clone()));
    let upstream_client = Arc::new(UpstreamClient::new(http_client.clone()));
    let governor = Arc::new(Governor::new(config.document.governor.clone()));
    let flow_log = Arc::new(FlowLog::new());

    let refresher = Arc::new(Refresher::new(store.clone(), http_client.clone()));
    let refresher_handle = refresher.clone().spawn(REFRESH_INTERVAL);

    let pruner_selector = selector.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SESSION_PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            pruner_selector.prune_stale_bindings().await;
        }
    });

    let orchestrator = Arc::new(Orchestrator {
        store: store.clone(),
        selector: selector.clone(),
        client: upstream_client.clone(),
        governor: governor.clone(),
        refresher: refresher.clone(),
        summarizer: crate::summarizer::GatewaySummarizer {
            store: store.clone(),
            selector: selector.clone(),
            client: upstream_client.clone(),
        },
    });

    let metrics_handle = metrics::install_recorder();

    let http_state = HttpState { orchestrator: orchestrator.clone(), flow_log: flow_log.clone() };
    let admin_state = AdminState {
        store: store.clone(),
        selector: selector.clone(),
        refresher: refresher.clone(),
        flow_log: flow_log.clone(),
        http_client: http_client.clone(),
        started_at: std::time::Instant::now(),
        config_path: config_path.clone(),
        token_discovery_paths: config.document.token_discovery_paths.clone(),
    };

    let client_router = Router::new()
        .route("/v1/chat/completions", post(http::chat_completions))
        .route("/v1/models", get(http::list_models))
        .route("/v1/messages", post(http::messages))
        .route("/v1/messages/count_tokens", post(http::count_tokens))
        .route("/v1/models/{model}:generateContent", post(http::generate_content))
        .with_state(http_state);

    let admin_router = admin::build_admin_router(admin_state);

    let app = Router::new()
        .merge(client_router)
        .merge(admin_router)
        .route("/health", get(health_handler))
        .route(
            "/metrics",
            get({
                let handle = metrics_handle.clone();
                move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }
            }),
        )
        .layer(axum::Extension(selector.clone()));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.listen_addr))?;

    info!(addr = %config.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    refresher_handle.abort();
    info!("shutdown complete");
    Ok(())
}

async fn health_handler(axum::Extension(selector): axum::Extension<Arc<Selector>>) -> axum::Json<serde_json::Value> {
    axum::Json(selector.health().await)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
