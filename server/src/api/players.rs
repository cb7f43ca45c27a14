use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use common::{MAX_NAME_LEN, stats::validate_label};
use serde::Deserialize;
use tracing::info;

use super::middleware::Caller;
use super::server::AppState;
use crate::db::models::Player;
use crate::error::{Result, StatsError};

#[derive(Debug, Deserialize)]
pub struct CreatePlayerRequest {
    pub name: String,
    /// Owner; required on the service lane, defaults to the session user.
    pub user_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct RenamePlayerRequest {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPlayersQuery {
    pub user_id: Option<i32>,
}

/// Loads a player the caller may see. Guests get `NotFound` for players of
/// other users.
pub(crate) async fn visible_player(state: &AppState, caller: &Caller, player_id: i32) -> Result<Player> {
    let player = state
        .db
        .get_player(player_id)
        .await?
        .ok_or(StatsError::NotFound("player"))?;
    match caller.owner_scope() {
        Some(owner) if owner != player.user_id => Err(StatsError::NotFound("player")),
        _ => Ok(player),
    }
}

/// Owner of a player the caller creates. Sessions default to themselves and
/// only admins may name another user; the service lane must name one.
pub(crate) fn player_owner(caller: &Caller, user_id: Option<i32>) -> Result<i32> {
    match (caller, user_id) {
        (Caller::Session(session), None) => Ok(session.user_id),
        (Caller::Session(session), Some(user_id)) if session.is_admin() || user_id == session.user_id => Ok(user_id),
        (Caller::Session(_), Some(_)) => Err(StatsError::AuthorizationFailure("guests may only create their own players")),
        (_, Some(user_id)) => Ok(user_id),
        (_, None) => Err(StatsError::Validation("user_id is required".to_string())),
    }
}

pub async fn create_player(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreatePlayerRequest>,
) -> Result<impl IntoResponse> {
    caller.require_member()?;
    let name = validate_label("player_name", &req.name, MAX_NAME_LEN)?;

    let owner = player_owner(&caller, req.user_id)?;

    let player = state.db.create_player(owner, &name).await?;
    info!("Created player {} for user {}", player.id, owner);
    Ok((StatusCode::CREATED, Json(player)))
}

pub async fn list_players(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<ListPlayersQuery>,
) -> Result<Json<Vec<Player>>> {
    caller.require_member()?;
    let owner = caller.owner_scope().or(query.user_id);
    Ok(Json(state.db.list_players(owner).await?))
}

pub async fn get_player(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(player_id): Path<i32>,
) -> Result<Json<Player>> {
    caller.require_member()?;
    Ok(Json(visible_player(&state, &caller, player_id).await?))
}

pub async fn rename_player(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(player_id): Path<i32>,
    Json(req): Json<RenamePlayerRequest>,
) -> Result<Json<Player>> {
    caller.require_admin()?;
    let name = validate_label("player_name", &req.name, MAX_NAME_LEN)?;
    Ok(Json(state.db.rename_player(player_id, &name).await?))
}

pub async fn delete_player(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(player_id): Path<i32>,
) -> Result<Json<Player>> {
    caller.require_admin()?;
    let player = state.db.delete_player(player_id).await?;
    info!("Deleted player {} ({})", player.id, player.name);
    Ok(Json(player))
}
