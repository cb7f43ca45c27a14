use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;

use super::middleware::Caller;
use super::server::AppState;
use crate::db::models::{Game, GameFacets, Installment, NewGame};
use crate::error::{Result, StatsError};

#[derive(Debug, Deserialize)]
pub struct GameRequest {
    pub name: String,
    pub installment: Option<String>,
    pub genre: Option<String>,
    pub subgenre: Option<String>,
}

impl GameRequest {
    pub(crate) fn validate(&self) -> Result<NewGame> {
        NewGame::new(
            &self.name,
            self.installment.as_deref(),
            self.genre.as_deref(),
            self.subgenre.as_deref(),
        )
    }
}

pub async fn create_game(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<GameRequest>,
) -> Result<impl IntoResponse> {
    caller.require_admin()?;
    let game = state.db.create_game(&req.validate()?).await?;
    info!("Created game {} ({})", game.id, game.display_name());
    Ok((StatusCode::CREATED, Json(game)))
}

pub async fn list_games(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<Game>>> {
    caller.require_member()?;
    Ok(Json(state.db.list_games().await?))
}

pub async fn get_game(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(game_id): Path<i32>,
) -> Result<Json<Game>> {
    caller.require_member()?;
    let game = state
        .db
        .get_game(game_id)
        .await?
        .ok_or(StatsError::NotFound("game"))?;
    Ok(Json(game))
}

pub async fn update_game(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(game_id): Path<i32>,
    Json(req): Json<GameRequest>,
) -> Result<Json<Game>> {
    caller.require_admin()?;
    Ok(Json(state.db.update_game(game_id, &req.validate()?).await?))
}

pub async fn delete_game(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(game_id): Path<i32>,
) -> Result<Json<Game>> {
    caller.require_admin()?;
    let game = state.db.delete_game(game_id).await?;
    info!("Deleted game {} ({})", game.id, game.display_name());
    Ok(Json(game))
}

/// Game names the caller has recorded stats for.
pub async fn list_franchises(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> Result<Json<Vec<String>>> {
    caller.require_member()?;
    Ok(Json(state.db.list_franchises(caller.owner_scope()).await?))
}

/// Installments of one franchise the caller has recorded stats for; an
/// unknown franchise is an empty list.
pub async fn list_installments(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(franchise): Path<String>,
) -> Result<Json<Vec<Installment>>> {
    caller.require_member()?;
    Ok(Json(state.db.list_installments(&franchise, caller.owner_scope()).await?))
}

/// Distinct modes, stat types and ranks recorded for a game, limited to the
/// guest's own players.
pub async fn game_facets(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(game_id): Path<i32>,
) -> Result<Json<GameFacets>> {
    caller.require_member()?;
    if state.db.get_game(game_id).await?.is_none() {
        return Err(StatsError::NotFound("game"));
    }
    Ok(Json(state.db.game_facets(game_id, caller.owner_scope()).await?))
}
