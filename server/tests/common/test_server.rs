use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{Value, json};
use server::api::{AppState, build_router};
use server::config::{Config, StorageBackend};
use server::db::{Database, MemoryDatabase};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const API_KEY: &str = "test-api-key";
pub const OBS_KEY: &str = "test-obs-key";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const GUEST_EMAIL: &str = "guest@example.com";

pub fn test_config() -> Config {
    Config {
        http_port: 0,
        storage: StorageBackend::Memory,
        api_key: API_KEY.to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        obs_key: Some(OBS_KEY.to_string()),
        trusted_emails: vec![ADMIN_EMAIL.to_string()],
        token_ttl: chrono::Duration::minutes(60),
        trusted_proxies: Vec::new(),
    }
}

/// The real router on an ephemeral port, backed by the given store.
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with_db(Arc::new(MemoryDatabase::new())).await
    }

    pub async fn start_with_db(db: Arc<dyn Database>) -> Result<Self> {
        let app = build_router(AppState::new(db, &test_config()));
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            client: reqwest::Client::new(),
            handle,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn anonymous(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub fn service(&self, method: Method, path: &str) -> RequestBuilder {
        self.anonymous(method, path).header("X-API-KEY", API_KEY)
    }

    pub fn session(&self, method: Method, token: &str, path: &str) -> RequestBuilder {
        self.anonymous(method, path).bearer_auth(token)
    }

    pub fn overlay(&self, method: Method, path: &str) -> RequestBuilder {
        let separator = if path.contains('?') { '&' } else { '?' };
        self.anonymous(method, &format!("{}{}key={}", path, separator, OBS_KEY))
    }

    pub async fn login(&self, email: &str) -> Result<String> {
        let response = self
            .service(Method::POST, "/login")
            .json(&json!({ "email": email }))
            .send()
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::OK,
            "login failed with {}",
            response.status()
        );
        let body: Value = response.json().await?;
        body["token"]
            .as_str()
            .map(str::to_string)
            .context("login response has no token")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub fn id_of(value: &Value) -> Result<i32> {
    value["id"]
        .as_i64()
        .map(|id| id as i32)
        .with_context(|| format!("response has no id: {}", value))
}

/// An admin and a guest session, one player each, and one game.
pub struct Fixture {
    pub admin_token: String,
    pub guest_token: String,
    pub guest_user_id: i32,
    pub admin_player_id: i32,
    pub guest_player_id: i32,
    pub game_id: i32,
}

impl Fixture {
    pub async fn create(server: &TestServer) -> Result<Self> {
        let admin_token = server.login(ADMIN_EMAIL).await?;
        let guest_token = server.login(GUEST_EMAIL).await?;

        let me: Value = server
            .session(Method::GET, &guest_token, "/me")
            .send()
            .await?
            .json()
            .await?;
        let guest_user_id = id_of(&me["user"])?;

        let admin_player: Value = server
            .session(Method::POST, &admin_token, "/players")
            .json(&json!({ "name": "Streamer" }))
            .send()
            .await?
            .json()
            .await?;
        let guest_player: Value = server
            .session(Method::POST, &guest_token, "/players")
            .json(&json!({ "name": "Visitor" }))
            .send()
            .await?
            .json()
            .await?;
        let game: Value = server
            .session(Method::POST, &admin_token, "/games")
            .json(&json!({
                "name": "Halo",
                "installment": "Infinite",
                "genre": "Shooter",
                "subgenre": "FPS"
            }))
            .send()
            .await?
            .json()
            .await?;

        Ok(Self {
            admin_token,
            guest_token,
            guest_user_id,
            admin_player_id: id_of(&admin_player)?,
            guest_player_id: id_of(&guest_player)?,
            game_id: id_of(&game)?,
        })
    }

    /// Records one match for `player_id` and returns the created rows.
    pub async fn record(&self, server: &TestServer, token: &str, player_id: i32, stats: Value) -> Result<Value> {
        let response = server
            .session(Method::POST, token, "/stats")
            .json(&json!({
                "game_id": self.game_id,
                "player_id": player_id,
                "stats": stats
            }))
            .send()
            .await?;
        anyhow::ensure!(
            response.status() == StatusCode::CREATED,
            "recording stats failed with {}",
            response.status()
        );
        let body: Value = response.json().await?;
        Ok(body["stats"].clone())
    }
}
