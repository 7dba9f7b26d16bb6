//! Gateway process entrypoint.
//!
//! Boots tracing, loads [`r402_gateway::config::GatewayConfig`], wires every
//! component together behind a [`r402_gateway::mcp_proxy::GatewayState`], and
//! serves the `axum` router described in §6. Two background tasks run
//! alongside the HTTP server for the lifetime of the process: the pending-
//! payment janitor (§4.6, §9) and upstream session idle eviction (§4.8).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy_signer_local::PrivateKeySigner;
use axum::Router;
use axum::routing::{get, post};
use r402_gateway::auth::ApiKeyStore;
use r402_gateway::config::GatewayConfig;
use r402_gateway::facilitator::FacilitatorClient;
use r402_gateway::mcp_proxy::{self, GatewayState};
use r402_gateway::payments_core::PaymentsCore;
use r402_gateway::ping;
use r402_gateway::registry::ToolRegistry;
use r402_gateway::shutdown::ShutdownSignal;
use r402_gateway::signing::{ManagedWalletProvider, ManagedWalletStrategy, SigningStrategyChain};
use r402_gateway::store::PaymentStore;
use r402_gateway::token_registry::TokenRegistry;
use r402_gateway::upstream::UpstreamConnector;
use r402_gateway::validation;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Hands out the same process-wide managed-wallet signer to every
/// authenticated user. Delegated, per-user custodial key management is out
/// of scope for this crate (§4.7) — this provider exists to exercise the
/// [`ManagedWalletStrategy`] code path for local/dev wiring against a single
/// configured signer, not to model production custody.
struct ConfigManagedWalletProvider {
    signer: Option<PrivateKeySigner>,
}

impl ManagedWalletProvider for ConfigManagedWalletProvider {
    fn signer_for(&self, _user_id: &str) -> Option<PrivateKeySigner> {
        self.signer.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = GatewayConfig::load()?;
    tracing::info!(host = %config.host, port = config.port, "starting r402-gateway");

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.database_url)
        .await?;

    let registry = ToolRegistry::new(pool.clone());
    let store = PaymentStore::new(pool.clone());
    let api_keys = ApiKeyStore::new(pool.clone());
    let tokens = TokenRegistry::with_known_networks();

    let mut facilitator = FacilitatorClient::try_new(&config.facilitator_url)?
        .with_timeout(GatewayConfig::FACILITATOR_TIMEOUT);
    if let Some(api_key) = &config.facilitator_api_key {
        facilitator = facilitator.with_header("Authorization", &format!("Bearer {api_key}"));
    }

    let payments = Arc::new(PaymentsCore::new(store.clone(), facilitator, tokens));

    let managed_signer = config
        .managed_wallets
        .values()
        .next()
        .and_then(|wallet| PrivateKeySigner::from_str(&wallet.signer_private_key).ok());
    let signing = Arc::new(
        SigningStrategyChain::new().with_strategy(Box::new(ManagedWalletStrategy::new(
            ConfigManagedWalletProvider { signer: managed_signer },
        ))),
    );

    let upstream = UpstreamConnector::new()
        .with_concurrency(config.upstream_concurrency)
        .with_idle_timeout(Duration::from_secs(config.upstream_idle_secs));

    let state = GatewayState {
        registry,
        store: store.clone(),
        payments,
        upstream: upstream.clone(),
        signing,
        api_keys,
    };

    let shutdown = ShutdownSignal::try_new()?;

    spawn_janitor(store, config.janitor_interval_secs, shutdown.cancellation_token());
    spawn_idle_eviction(upstream, config.upstream_idle_secs, shutdown.cancellation_token());

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((config.host, config.port)).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    let token = shutdown.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    shutdown.recv().await;
    Ok(())
}

fn build_router(state: GatewayState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            axum::http::HeaderName::from_static("x-payment-response"),
            axum::http::header::CONTENT_LENGTH,
        ]);

    Router::new()
        .route("/mcp/{server_id}", post(mcp_proxy::handle_call).get(mcp_proxy::handle_notifications))
        .route("/validate", post(validation::validate))
        .route("/ping", post(ping::ping))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Periodically expires `pending` payment records older than
/// `max_timeout_seconds + 60s` (§4.6 ordering note, §9 janitor).
fn spawn_janitor(store: PaymentStore, interval_secs: u64, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match store.expire_stale_pending(chrono::Duration::seconds(60 + 60)).await {
                Ok(expired) if expired > 0 => {
                    tracing::info!(expired, "janitor expired stale pending payments");
                }
                Ok(_) => {}
                Err(error) => tracing::warn!(%error, "janitor sweep failed"),
            }
        }
    });
}

/// Periodically evicts idle upstream sessions (§4.8: default 300s).
fn spawn_idle_eviction(upstream: UpstreamConnector, idle_secs: u64, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(idle_secs.max(30)));
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            upstream.evict_idle_async().await;
        }
    });
}
