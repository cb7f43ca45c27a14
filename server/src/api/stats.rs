use axum::{
    extract::{Extension, Json, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use common::{GroupBy, MAX_NAME_LEN, Selection, StatType, stats::validate_label};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::middleware::Caller;
use super::games::GameRequest;
use super::players::{player_owner, visible_player};
use super::server::AppState;
use crate::db::models::{
    AggregateRow, DeletedStat, GameRef, GameStat, MAX_RANK_LEN, NewStat, PlayerRef, StatBatch, StatFilter,
    StatPatch, label_edit, optional_label, optional_rank,
};
use crate::error::{Result, StatsError};

#[derive(Debug, Deserialize)]
pub struct StatEntry {
    pub stat_type: String,
    pub stat_value: i32,
    pub game_mode: Option<String>,
    pub game_level: Option<i32>,
    pub win: Option<bool>,
    pub ranked: Option<bool>,
    pub pre_match_rank: Option<String>,
    pub post_match_rank: Option<String>,
}

impl StatEntry {
    fn validate(&self) -> Result<NewStat> {
        Ok(NewStat {
            stat_type: StatType::parse(&self.stat_type)?,
            stat_value: self.stat_value,
            game_mode: optional_label("game_mode", self.game_mode.as_deref(), MAX_NAME_LEN)?,
            game_level: self.game_level,
            win: self.win,
            ranked: self.ranked,
            pre_match_rank: optional_rank("pre_match_rank", self.pre_match_rank.as_deref())?,
            post_match_rank: optional_rank("post_match_rank", self.post_match_rank.as_deref())?,
        })
    }
}

/// One match worth of stats for a player in a game.
///
/// The game is given either by `game_id` or as `game` (found by name and
/// installment, created if absent). The player is given either by
/// `player_id` or by `player_name` within `user_id` (default: the session
/// user), created if absent.
#[derive(Debug, Deserialize)]
pub struct RecordStatsRequest {
    pub game_id: Option<i32>,
    pub game: Option<GameRequest>,
    pub player_id: Option<i32>,
    pub player_name: Option<String>,
    pub user_id: Option<i32>,
    /// Defaults to now.
    pub played_at: Option<DateTime<Utc>>,
    /// Also select this player/game on the live dashboard.
    #[serde(default)]
    pub set_live: bool,
    pub stats: Vec<StatEntry>,
}

impl RecordStatsRequest {
    fn game_ref(&self, caller: &Caller) -> Result<GameRef> {
        match (self.game_id, &self.game) {
            (Some(id), None) => Ok(GameRef::Id(id)),
            (None, Some(game)) => {
                // Naming a game may add it to the shared catalog
                caller.require_admin()?;
                Ok(GameRef::Named(game.validate()?))
            }
            _ => Err(StatsError::Validation("exactly one of game_id or game is required".to_string())),
        }
    }

    async fn player_ref(&self, state: &AppState, caller: &Caller) -> Result<PlayerRef> {
        match (self.player_id, &self.player_name) {
            (Some(id), None) => {
                visible_player(state, caller, id).await?;
                Ok(PlayerRef::Id(id))
            }
            (None, Some(name)) => Ok(PlayerRef::Named {
                user_id: player_owner(caller, self.user_id)?,
                name: validate_label("player_name", name, MAX_NAME_LEN)?,
            }),
            _ => Err(StatsError::Validation(
                "exactly one of player_id or player_name is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RecordStatsResponse {
    pub stats: Vec<GameStat>,
    pub set_live: bool,
}

/// Omitted fields are unchanged; `null` clears a nullable field.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateStatRequest {
    pub stat_type: Option<String>,
    pub stat_value: Option<i32>,
    #[serde(default)]
    pub game_mode: Selection<String>,
    #[serde(default)]
    pub game_level: Selection<i32>,
    #[serde(default)]
    pub win: Selection<bool>,
    #[serde(default)]
    pub ranked: Selection<bool>,
    #[serde(default)]
    pub pre_match_rank: Selection<String>,
    #[serde(default)]
    pub post_match_rank: Selection<String>,
}

impl UpdateStatRequest {
    fn validate(self) -> Result<StatPatch> {
        let patch = StatPatch {
            stat_type: self.stat_type.as_deref().map(StatType::parse).transpose()?,
            stat_value: self.stat_value,
            game_mode: label_edit("game_mode", self.game_mode, MAX_NAME_LEN)?,
            game_level: self.game_level,
            win: self.win,
            ranked: self.ranked,
            pre_match_rank: label_edit("pre_match_rank", self.pre_match_rank, MAX_RANK_LEN)?,
            post_match_rank: label_edit("post_match_rank", self.post_match_rank, MAX_RANK_LEN)?,
        };
        if patch.is_empty() {
            return Err(StatsError::Validation("no fields to update".to_string()));
        }
        Ok(patch)
    }
}

/// Filters shared by listing and aggregation. `to` is exclusive.
#[derive(Debug, Default, Deserialize)]
pub struct StatQuery {
    pub group_by: Option<GroupBy>,
    pub player_id: Option<i32>,
    pub game_id: Option<i32>,
    pub stat_type: Option<String>,
    pub game_mode: Option<String>,
    pub win: Option<bool>,
    pub ranked: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl StatQuery {
    fn filter(&self, caller: &Caller) -> Result<StatFilter> {
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from >= to {
                return Err(StatsError::Validation("'from' must be before 'to'".to_string()));
            }
        }
        Ok(StatFilter {
            player_id: self.player_id,
            game_id: self.game_id,
            stat_type: self.stat_type.clone(),
            game_mode: self.game_mode.clone(),
            win: self.win,
            ranked: self.ranked,
            from: self.from,
            to: self.to,
            owner_user_id: caller.owner_scope(),
            limit: None,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DeleteStatQuery {
    pub confirm: Option<String>,
}

async fn visible_stat(state: &AppState, caller: &Caller, stat_id: i32) -> Result<GameStat> {
    let stat = state
        .db
        .get_stat(stat_id)
        .await?
        .ok_or(StatsError::NotFound("stat"))?;
    if caller.owner_scope().is_some() {
        visible_player(state, caller, stat.player_id)
            .await
            .map_err(|_| StatsError::NotFound("stat"))?;
    }
    Ok(stat)
}

pub async fn record_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<RecordStatsRequest>,
) -> Result<impl IntoResponse> {
    caller.require_member()?;
    if req.stats.is_empty() {
        return Err(StatsError::Validation("at least one stat is required".to_string()));
    }
    if req.set_live {
        caller.require_admin()?;
    }

    let stats = req
        .stats
        .iter()
        .map(StatEntry::validate)
        .collect::<Result<Vec<_>>>()?;
    let batch = StatBatch {
        game: req.game_ref(&caller)?,
        player: req.player_ref(&state, &caller).await?,
        played_at: req.played_at.unwrap_or_else(Utc::now),
        stats,
        set_live: req.set_live,
    };

    let recorded = state.db.record_stats(&batch).await?;
    if let (true, Some(first)) = (batch.set_live, recorded.first()) {
        info!(
            "Dashboard set to player {}, game {} by new stats",
            first.player_id, first.game_id
        );
    }

    Ok((
        StatusCode::CREATED,
        Json(RecordStatsResponse {
            stats: recorded,
            set_live: batch.set_live,
        }),
    ))
}

pub async fn list_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<StatQuery>,
) -> Result<Json<Vec<GameStat>>> {
    caller.require_member()?;
    let mut filter = query.filter(&caller)?;
    filter.limit = Some(StatFilter::page_limit(query.limit));
    Ok(Json(state.db.list_stats(&filter).await?))
}

pub async fn aggregate_stats(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<StatQuery>,
) -> Result<Json<Vec<AggregateRow>>> {
    let group_by = query
        .group_by
        .ok_or_else(|| StatsError::Validation("group_by is required".to_string()))?;
    let mut filter = query.filter(&caller)?;
    filter.limit = query.limit.map(|limit| StatFilter::page_limit(Some(limit)));
    Ok(Json(state.db.aggregate_stats(group_by, &filter).await?))
}

pub async fn get_stat(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stat_id): Path<i32>,
) -> Result<Json<GameStat>> {
    caller.require_member()?;
    Ok(Json(visible_stat(&state, &caller, stat_id).await?))
}

pub async fn update_stat(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stat_id): Path<i32>,
    Json(req): Json<UpdateStatRequest>,
) -> Result<Json<GameStat>> {
    caller.require_admin()?;
    let patch = req.validate()?;
    let stat = state.db.update_stat(stat_id, &patch).await?;
    info!("Updated stat {}", stat.id);
    Ok(Json(stat))
}

/// Two-step delete. Without `confirm` nothing is deleted and a short-lived
/// confirmation token is returned in a `409`; repeating the call with
/// `?confirm=<token>` deletes the stat.
pub async fn delete_stat(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(stat_id): Path<i32>,
    Query(query): Query<DeleteStatQuery>,
) -> Result<Json<DeletedStat>> {
    caller.require_admin()?;
    let subject = caller.subject();

    let Some(token) = query.confirm.filter(|t| !t.trim().is_empty()) else {
        visible_stat(&state, &caller, stat_id).await?;
        let (token, expires_at) = state.tokens.issue_delete_intent(&subject, stat_id)?;
        return Err(StatsError::ConfirmationRequired {
            reason: "deleting a stat must be confirmed",
            confirmation_token: Some(token),
            expires_at: Some(expires_at),
        });
    };

    state.tokens.verify_delete_intent(token.trim(), &subject, stat_id)?;
    let deleted = state.db.delete_stat(stat_id).await?;
    info!(
        "Deleted stat {} (player {}, game {})",
        stat_id, deleted.stat.player_id, deleted.stat.game_id
    );
    Ok(Json(deleted))
}
