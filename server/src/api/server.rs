use anyhow::Result;
use axum::{
    Json, Router, middleware,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::jwt::TokenService;
use super::middleware::{AccessGate, auth_middleware};
use super::rate_limit::{RateLimiter, login_rate_limit_middleware};
use super::{auth, dashboard, games, players, stats};
use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::dashboard::DashboardManager;
use crate::db::Database;

/// Logins allowed per account and client address per window.
const LOGIN_RATE_LIMIT: usize = 10;
const LOGIN_RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub credentials: CredentialStore,
    pub tokens: Arc<TokenService>,
    pub dashboard: DashboardManager,
    pub gate: AccessGate,
    pub login_limiter: RateLimiter,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, config: &Config) -> Self {
        let tokens = Arc::new(TokenService::new(&config.jwt_secret, config.token_ttl));
        Self {
            credentials: CredentialStore::new(db.clone(), &config.trusted_emails),
            dashboard: DashboardManager::new(db.clone()),
            gate: AccessGate::new(tokens.clone(), &config.api_key, config.obs_key.as_deref()),
            login_limiter: RateLimiter::new(LOGIN_RATE_LIMIT, LOGIN_RATE_WINDOW)
                .with_trusted_proxies(&config.trusted_proxies),
            tokens,
            db,
        }
    }
}

/// Builds the full router. Every route is served both at the root and
/// under `/api`.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_layer = middleware::from_fn_with_state(state.gate.clone(), auth_middleware);

    // Rate limiting sits outside authentication so failed attempts count too
    let login_routes = Router::new()
        .route("/login", post(auth::login))
        .route_layer(auth_layer.clone())
        .route_layer(middleware::from_fn_with_state(
            state.login_limiter.clone(),
            login_rate_limit_middleware,
        ));

    let protected_routes = Router::new()
        .route("/add_user", post(auth::add_user))
        .route("/me", get(auth::get_current_user))
        .route("/players", post(players::create_player).get(players::list_players))
        .route(
            "/players/:id",
            get(players::get_player)
                .put(players::rename_player)
                .delete(players::delete_player),
        )
        .route("/games", post(games::create_game).get(games::list_games))
        .route(
            "/games/:id",
            get(games::get_game).put(games::update_game).delete(games::delete_game),
        )
        .route("/games/:id/facets", get(games::game_facets))
        .route("/games/franchises", get(games::list_franchises))
        .route("/games/franchises/:name/installments", get(games::list_installments))
        .route("/stats", post(stats::record_stats).get(stats::list_stats))
        .route("/stats/aggregate", get(stats::aggregate_stats))
        .route(
            "/stats/:id",
            get(stats::get_stat).put(stats::update_stat).delete(stats::delete_stat),
        )
        .route("/dashboard", get(dashboard::get_dashboard).post(dashboard::set_dashboard))
        .route("/overlay/live", get(dashboard::live_panel))
        .route("/overlay/ticker", get(dashboard::ticker))
        .route_layer(auth_layer);

    let routes = Router::new()
        .route("/health", get(health_check))
        .route("/db_health", get(db_health_check))
        .merge(login_routes)
        .merge(protected_routes);

    Router::new()
        .merge(routes.clone())
        .nest("/api", routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

pub async fn run_api_server(addr: &str, state: AppState) -> Result<()> {
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| anyhow::anyhow!("API server error: {}", e))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal. Shutting down gracefully...");
    }
}

async fn health_check() -> &'static str {
    "OK"
}

async fn db_health_check(State(state): State<AppState>) -> crate::error::Result<Json<Value>> {
    state.db.ping().await?;
    Ok(Json(json!({ "status": "ok", "database": "reachable" })))
}
