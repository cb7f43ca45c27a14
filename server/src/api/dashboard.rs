use axum::extract::{Extension, Json, Query, State};
use chrono::Utc;
use common::DashboardUpdate;
use serde::Deserialize;

use super::middleware::Caller;
use super::server::AppState;
use crate::db::models::{DashboardState, StatFilter};
use crate::error::{Result, StatsError};
use crate::overlay::{self, LivePanel, Ticker};

/// Open to every lane, the overlay included.
pub async fn get_dashboard(State(state): State<AppState>) -> Result<Json<DashboardState>> {
    Ok(Json(state.dashboard.get_current().await?))
}

/// Omitted fields keep their value, `null` clears, an id selects.
pub async fn set_dashboard(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(update): Json<DashboardUpdate>,
) -> Result<Json<DashboardState>> {
    caller.require_admin()?;
    Ok(Json(state.dashboard.set_current(&update).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct OverlayQuery {
    /// IANA zone such as `America/New_York`; UTC when missing or unknown.
    pub tz: Option<String>,
}

pub async fn live_panel(
    State(state): State<AppState>,
    Query(query): Query<OverlayQuery>,
) -> Result<Json<LivePanel>> {
    let (player_id, game_id) = state.dashboard.current_selection().await?;

    let filter = StatFilter {
        game_id: Some(game_id),
        ..Default::default()
    };
    let game_facts = state.db.list_stats(&filter).await?;

    Ok(Json(overlay::live_panel(
        player_id,
        game_id,
        &game_facts,
        Utc::now(),
        overlay::parse_zone(query.tz.as_deref()),
    )))
}

pub async fn ticker(
    State(state): State<AppState>,
    Query(query): Query<OverlayQuery>,
) -> Result<Json<Ticker>> {
    let (player_id, game_id) = state.dashboard.current_selection().await?;

    let player = state
        .db
        .get_player(player_id)
        .await?
        .ok_or(StatsError::NotFound("player"))?;
    let game = state
        .db
        .get_game(game_id)
        .await?
        .ok_or(StatsError::NotFound("game"))?;
    let facts = state
        .db
        .list_stats(&StatFilter::for_player_game(player_id, game_id))
        .await?;

    Ok(Json(overlay::ticker(
        &player.name,
        &game.display_name(),
        &facts,
        overlay::parse_zone(query.tz.as_deref()),
    )))
}
