use chrono::{DateTime, NaiveDate, Utc};
use common::{
    DEFAULT_STAT_LIMIT, MAX_LABEL_LEN, MAX_NAME_LEN, MAX_STAT_LIMIT, Selection, StatType, catalog,
    stats::validate_label,
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StatsError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub is_trusted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Player {
    pub id: i32,
    pub name: String,
    pub user_id: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Game {
    pub id: i32,
    pub name: String,
    pub installment: Option<String>,
    pub genre: Option<String>,
    pub subgenre: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_played_at: DateTime<Utc>,
}

impl Game {
    /// "Name: Installment", or just the name for the main game.
    pub fn display_name(&self) -> String {
        match &self.installment {
            Some(installment) => format!("{}: {}", self.name, installment),
            None => self.name.clone(),
        }
    }
}

/// One fact row: a single stat recorded for a player in a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GameStat {
    pub id: i32,
    pub game_id: i32,
    pub player_id: i32,
    pub stat_type: String,
    pub stat_value: i32,
    pub game_mode: Option<String>,
    pub game_level: Option<i32>,
    pub win: Option<bool>,
    pub ranked: Option<bool>,
    pub pre_match_rank: Option<String>,
    pub post_match_rank: Option<String>,
    pub played_at: DateTime<Utc>,
}

/// The live player/game selection. All fields are null until first set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DashboardState {
    pub player_id: Option<i32>,
    pub game_id: Option<i32>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Validated game dimension values, used for both create and update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGame {
    pub name: String,
    pub installment: Option<String>,
    pub genre: Option<String>,
    pub subgenre: Option<String>,
}

impl NewGame {
    pub fn new(
        name: &str,
        installment: Option<&str>,
        genre: Option<&str>,
        subgenre: Option<&str>,
    ) -> Result<Self> {
        let name = validate_label("game_name", name, MAX_NAME_LEN)?;
        let installment = optional_label("game_installment", installment, MAX_NAME_LEN)?;
        let (genre, subgenre) = catalog::canonicalize(genre, subgenre)?;

        Ok(Self {
            name,
            installment,
            genre: genre.map(str::to_string),
            subgenre: subgenre.map(str::to_string),
        })
    }
}

/// Validated values of one stat inside a recorded match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStat {
    pub stat_type: StatType,
    pub stat_value: i32,
    pub game_mode: Option<String>,
    pub game_level: Option<i32>,
    pub win: Option<bool>,
    pub ranked: Option<bool>,
    pub pre_match_rank: Option<String>,
    pub post_match_rank: Option<String>,
}

/// The game a batch is recorded against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameRef {
    Id(i32),
    /// Matched on name and installment; created with these values if absent.
    Named(NewGame),
}

/// The player a batch is recorded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerRef {
    Id(i32),
    /// Matched on name within the owner; created if absent.
    Named { user_id: i32, name: String },
}

/// A match worth of stats, written in one transaction together with any
/// game or player row it creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatBatch {
    pub game: GameRef,
    pub player: PlayerRef,
    pub played_at: DateTime<Utc>,
    pub stats: Vec<NewStat>,
    /// Also make this player/game the live dashboard selection.
    pub set_live: bool,
}

impl StatBatch {
    pub fn for_ids(game_id: i32, player_id: i32, stats: Vec<NewStat>) -> Self {
        Self {
            game: GameRef::Id(game_id),
            player: PlayerRef::Id(player_id),
            played_at: Utc::now(),
            stats,
            set_live: false,
        }
    }
}

/// Partial edit of a fact row. `None` and `Keep` leave a column unchanged;
/// `Clear` nulls a nullable one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatPatch {
    pub stat_type: Option<StatType>,
    pub stat_value: Option<i32>,
    pub game_mode: Selection<String>,
    pub game_level: Selection<i32>,
    pub win: Selection<bool>,
    pub ranked: Selection<bool>,
    pub pre_match_rank: Selection<String>,
    pub post_match_rank: Selection<String>,
}

impl StatPatch {
    pub fn is_empty(&self) -> bool {
        *self == StatPatch::default()
    }

    pub fn apply(&self, stat: &mut GameStat) {
        if let Some(stat_type) = &self.stat_type {
            stat.stat_type = stat_type.to_string();
        }
        if let Some(value) = self.stat_value {
            stat.stat_value = value;
        }
        stat.game_mode = self.game_mode.apply(stat.game_mode.take());
        stat.game_level = self.game_level.apply(stat.game_level);
        stat.win = self.win.apply(stat.win);
        stat.ranked = self.ranked.apply(stat.ranked);
        stat.pre_match_rank = self.pre_match_rank.apply(stat.pre_match_rank.take());
        stat.post_match_rank = self.post_match_rank.apply(stat.post_match_rank.take());
    }
}

/// Row filter shared by listing and aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatFilter {
    pub player_id: Option<i32>,
    pub game_id: Option<i32>,
    pub stat_type: Option<String>,
    pub game_mode: Option<String>,
    pub win: Option<bool>,
    pub ranked: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Only facts of players owned by this user.
    pub owner_user_id: Option<i32>,
    /// `None` returns every matching row.
    pub limit: Option<i64>,
}

impl StatFilter {
    pub fn for_player_game(player_id: i32, game_id: i32) -> Self {
        Self {
            player_id: Some(player_id),
            game_id: Some(game_id),
            ..Default::default()
        }
    }

    pub fn page_limit(requested: Option<i64>) -> i64 {
        requested.unwrap_or(DEFAULT_STAT_LIMIT).clamp(1, MAX_STAT_LIMIT)
    }

    /// In-memory equivalent of the SQL WHERE clause, minus ownership.
    pub fn matches(&self, stat: &GameStat) -> bool {
        self.player_id.is_none_or(|id| stat.player_id == id)
            && self.game_id.is_none_or(|id| stat.game_id == id)
            && self.stat_type.as_ref().is_none_or(|t| &stat.stat_type == t)
            && self.game_mode.as_ref().is_none_or(|m| stat.game_mode.as_ref() == Some(m))
            && self.win.is_none_or(|w| stat.win == Some(w))
            && self.ranked.is_none_or(|r| stat.ranked == Some(r))
            && self.from.is_none_or(|from| stat.played_at >= from)
            && self.to.is_none_or(|to| stat.played_at < to)
    }
}

/// One group of an aggregate query over `stat_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AggregateRow {
    /// Group value: stat type, game mode, id, or `YYYY-MM-DD` day.
    pub key: Option<String>,
    pub count: i64,
    pub sum: i64,
    pub avg: f64,
    pub min: i32,
    pub max: i32,
}

impl AggregateRow {
    pub fn from_values(key: Option<String>, values: &[i32]) -> Self {
        let sum: i64 = values.iter().map(|v| *v as i64).sum();
        let count = values.len() as i64;
        Self {
            key,
            count,
            sum,
            avg: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
            min: values.iter().copied().min().unwrap_or(0),
            max: values.iter().copied().max().unwrap_or(0),
        }
    }
}

/// One installment of a franchise the caller has stats for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Installment {
    pub game_id: i32,
    /// `None` is the main game.
    pub installment: Option<String>,
}

/// Distinct lookup values recorded for a game.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFacets {
    pub game_modes: Vec<String>,
    pub stat_types: Vec<String>,
    pub ranks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedStat {
    pub stat: GameStat,
    /// No facts reference the game any more, so it may now be deleted.
    pub last_stat_for_game: bool,
}

pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Validates an optional label; blank strings become `None`.
pub fn optional_label(field: &'static str, value: Option<&str>, max: usize) -> Result<Option<String>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => Ok(Some(validate_label(field, v, max)?)),
        None => Ok(None),
    }
}

pub const MAX_RANK_LEN: usize = MAX_LABEL_LEN;

pub fn optional_rank(field: &'static str, value: Option<&str>) -> Result<Option<String>> {
    optional_label(field, value, MAX_RANK_LEN)
}

/// Validates the label of a nullable-field edit; a blank label clears.
pub fn label_edit(field: &'static str, edit: Selection<String>, max: usize) -> Result<Selection<String>> {
    match edit {
        Selection::Set(value) => Ok(match optional_label(field, Some(&value), max)? {
            Some(label) => Selection::Set(label),
            None => Selection::Clear,
        }),
        other => Ok(other),
    }
}

/// Normalized form of an email used as the user key.
pub fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = !email.is_empty()
        && email.len() <= MAX_NAME_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty())
        && !email.chars().any(char::is_whitespace);
    if valid {
        Ok(email)
    } else {
        Err(StatsError::Validation("a valid email is required".to_string()))
    }
}
