use axum::{
    extract::{Extension, Json, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use common::Role;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::middleware::Caller;
use super::server::AppState;
use crate::db::models::User;
use crate::error::{Result, StatsError};

/// Email already verified by the frontend's OAuth flow.
#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: User,
    pub role: Role,
}

fn no_store(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate, private"),
    );
    response
        .headers_mut()
        .insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Exchanges a verified email for a session token. Unknown emails become
/// users on the spot, so the response never reveals whether one existed.
pub async fn login(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<EmailRequest>,
) -> Result<Response> {
    caller.require_service()?;

    let user = state.credentials.get_or_create_user(&req.email).await?;
    let role = Role::for_trust(user.is_trusted);
    let (token, expires_at) = state.tokens.issue(&user, role)?;

    info!("User {} logged in as {}", user.id, role);

    Ok(no_store(
        Json(LoginResponse {
            token,
            role,
            expires_at,
            user,
        })
        .into_response(),
    ))
}

/// Registers a guest without issuing a token.
pub async fn add_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<EmailRequest>,
) -> Result<Response> {
    caller.require_service()?;

    let user = state.credentials.register_guest(&req.email).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Response> {
    let session = caller
        .session()
        .ok_or(StatsError::AuthorizationFailure("session token required"))?;

    // A token for a user that no longer exists is no credential at all
    let user = state
        .db
        .get_user_by_id(session.user_id)
        .await?
        .ok_or(StatsError::AuthenticationFailure)?;

    let mut response = no_store(
        Json(MeResponse {
            user,
            role: session.role,
        })
        .into_response(),
    );
    response
        .headers_mut()
        .insert(header::EXPIRES, HeaderValue::from_static("0"));
    Ok(response)
}
