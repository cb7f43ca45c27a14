use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Method, Uri, header},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::jwt::{SessionUser, TokenService};
use crate::error::{Result, StatsError};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const OVERLAY_KEY_PARAM: &str = "key";

/// Paths the overlay key may read.
const OVERLAY_PATHS: &[&str] = &["/dashboard", "/stats/aggregate", "/overlay/live", "/overlay/ticker"];

/// The credential lane a request was authenticated through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    /// `Authorization: Bearer` session token.
    Session(SessionUser),
    /// Static API key of the trusted frontend.
    Service,
    /// Read-only overlay key.
    Overlay,
}

impl Caller {
    /// Stable name of the caller, bound into delete intents.
    pub fn subject(&self) -> String {
        match self {
            Caller::Session(user) => format!("user:{}", user.user_id),
            Caller::Service => "service".to_string(),
            Caller::Overlay => "overlay".to_string(),
        }
    }

    /// User whose rows a guest is confined to; `None` means unrestricted.
    pub fn owner_scope(&self) -> Option<i32> {
        match self {
            Caller::Session(user) if !user.is_admin() => Some(user.user_id),
            _ => None,
        }
    }

    pub fn session(&self) -> Option<&SessionUser> {
        match self {
            Caller::Session(user) => Some(user),
            _ => None,
        }
    }

    /// Any session or the service key.
    pub fn require_member(&self) -> Result<()> {
        match self {
            Caller::Overlay => Err(StatsError::AuthorizationFailure("overlay key is read-only")),
            _ => Ok(()),
        }
    }

    /// Admin session or the service key.
    pub fn require_admin(&self) -> Result<()> {
        match self {
            Caller::Service => Ok(()),
            Caller::Session(user) if user.is_admin() => Ok(()),
            Caller::Session(_) => Err(StatsError::AuthorizationFailure("admin role required")),
            Caller::Overlay => Err(StatsError::AuthorizationFailure("overlay key is read-only")),
        }
    }

    pub fn require_service(&self) -> Result<()> {
        match self {
            Caller::Service => Ok(()),
            _ => Err(StatsError::AuthorizationFailure("service key required")),
        }
    }
}

/// Compares two secrets without an early exit on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Classifies requests into credential lanes.
#[derive(Clone)]
pub struct AccessGate {
    tokens: Arc<TokenService>,
    api_key: Arc<str>,
    obs_key: Option<Arc<str>>,
}

impl AccessGate {
    pub fn new(tokens: Arc<TokenService>, api_key: &str, obs_key: Option<&str>) -> Self {
        Self {
            tokens,
            api_key: Arc::from(api_key),
            obs_key: obs_key.map(Arc::from),
        }
    }

    pub fn classify(&self, method: &Method, uri: &Uri, headers: &HeaderMap) -> Result<Caller> {
        let bearer = headers.get(header::AUTHORIZATION);
        let api_key = headers.get(API_KEY_HEADER);
        let overlay_key = Query::<HashMap<String, String>>::try_from_uri(uri)
            .ok()
            .and_then(|Query(mut params)| params.remove(OVERLAY_KEY_PARAM));

        let presented = [bearer.is_some(), api_key.is_some(), overlay_key.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if presented > 1 {
            warn!("Rejected request presenting {} credential lanes", presented);
            return Err(StatsError::AuthenticationFailure);
        }

        if let Some(value) = bearer {
            let token = value
                .to_str()
                .ok()
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .ok_or(StatsError::AuthenticationFailure)?;
            return self.tokens.verify(token).map(Caller::Session);
        }

        if let Some(value) = api_key {
            let key = value.to_str().map_err(|_| StatsError::AuthenticationFailure)?;
            return if constant_time_eq(key, &self.api_key) {
                Ok(Caller::Service)
            } else {
                Err(StatsError::AuthenticationFailure)
            };
        }

        if let Some(key) = overlay_key {
            let expected = self.obs_key.as_ref().ok_or(StatsError::AuthenticationFailure)?;
            if !constant_time_eq(&key, expected) {
                return Err(StatsError::AuthenticationFailure);
            }
            if *method != Method::GET {
                return Err(StatsError::AuthorizationFailure("overlay key is read-only"));
            }
            let path = uri.path().strip_prefix("/api").unwrap_or(uri.path());
            if !OVERLAY_PATHS.contains(&path.trim_end_matches('/')) {
                return Err(StatsError::AuthorizationFailure("overlay key only grants overlay reads"));
            }
            return Ok(Caller::Overlay);
        }

        Err(StatsError::AuthenticationFailure)
    }
}

/// Authenticates the request and stores the [`Caller`] in its extensions.
/// Rejected requests never reach a handler.
pub async fn auth_middleware(
    State(gate): State<AccessGate>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let caller = gate.classify(request.method(), request.uri(), request.headers())?;
    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}
