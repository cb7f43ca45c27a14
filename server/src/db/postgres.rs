use anyhow::Context;
use async_trait::async_trait;
use refinery::config::{Config as MigrationConfig, ConfigDbType};
use common::{DASHBOARD_STATE_ID, DashboardUpdate, GroupBy, Selection};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use super::Database;
use super::models::*;
use crate::config::PostgresSettings;
use crate::error::{Result, StatsError};

const USER_COLUMNS: &str = "user_id AS id, user_email AS email, is_trusted, created_at";
const PLAYER_COLUMNS: &str = "player_id AS id, player_name AS name, user_id, created_at";
const GAME_COLUMNS: &str = "game_id AS id, game_name AS name, game_installment AS installment, \
     game_genre AS genre, game_subgenre AS subgenre, created_at, last_played_at";
const STAT_COLUMNS: &str = "stat_id AS id, game_id, player_id, stat_type, stat_value, game_mode, \
     game_level, win, ranked, pre_match_rank, post_match_rank, played_at";

mod migrations {
    use refinery::embed_migrations;
    embed_migrations!("./migrations");
}

/// Applies the embedded star-schema migrations.
pub async fn run_migrations(settings: &PostgresSettings) -> anyhow::Result<()> {
    let mut db_config = MigrationConfig::new(ConfigDbType::Postgres)
        .set_db_host(&settings.host)
        .set_db_port(&settings.port.to_string())
        .set_db_user(&settings.user)
        .set_db_pass(&settings.password)
        .set_db_name(&settings.database);

    let report = migrations::migrations::runner()
        .run_async(&mut db_config)
        .await
        .context("Failed to run database migrations")?;
    info!(
        "Database migrations completed ({} applied)",
        report.applied_migrations().len()
    );
    Ok(())
}

/// Session options with the server-side `statement_timeout` applied.
pub fn connect_options(settings: &PostgresSettings) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.database)
        .options([(
            "statement_timeout",
            settings.statement_timeout.as_millis().to_string(),
        )])
}

/// PostgreSQL implementation of [`Database`] over a bounded sqlx pool.
#[derive(Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens the pool. Checkout waits at most `acquire_timeout` and every
    /// session gets a server-side `statement_timeout`.
    pub async fn connect(settings: &PostgresSettings) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(connect_options(settings))
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        info!(
            "Connected to PostgreSQL at {}:{} (max {} connections)",
            settings.host, settings.port, settings.max_connections
        );
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn player_exists(tx: &mut Transaction<'_, Postgres>, player_id: i32) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dim.players WHERE player_id = $1)")
        .bind(player_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(exists)
}

async fn game_exists(tx: &mut Transaction<'_, Postgres>, game_id: i32) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dim.games WHERE game_id = $1)")
        .bind(game_id)
        .fetch_one(&mut **tx)
        .await?;
    Ok(exists)
}

/// Finds the batch's game by id or by name and installment, inserting a
/// named game that does not exist yet.
async fn resolve_game(tx: &mut Transaction<'_, Postgres>, game: &GameRef) -> Result<i32> {
    let new = match game {
        GameRef::Id(id) => {
            return if game_exists(tx, *id).await? {
                Ok(*id)
            } else {
                Err(StatsError::NotFound("game"))
            };
        }
        GameRef::Named(new) => new,
    };

    // A concurrent insert of the same game makes this wait, then do nothing
    let inserted: Option<i32> = sqlx::query_scalar(
        r#"
        INSERT INTO dim.games (game_name, game_installment, game_genre, game_subgenre)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (game_name, (COALESCE(game_installment, ''))) DO NOTHING
        RETURNING game_id
        "#,
    )
    .bind(&new.name)
    .bind(&new.installment)
    .bind(&new.genre)
    .bind(&new.subgenre)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(id) = inserted {
        info!("Created game {} ({:?}) while recording stats", new.name, new.installment);
        return Ok(id);
    }

    sqlx::query_scalar(
        "SELECT game_id FROM dim.games \
         WHERE game_name = $1 AND game_installment IS NOT DISTINCT FROM $2",
    )
    .bind(&new.name)
    .bind(&new.installment)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(StatsError::NotFound("game"))
}

/// Finds the batch's player by id or by name within its owner, inserting a
/// named player that does not exist yet.
async fn resolve_player(tx: &mut Transaction<'_, Postgres>, player: &PlayerRef) -> Result<i32> {
    let (user_id, name) = match player {
        PlayerRef::Id(id) => {
            return if player_exists(tx, *id).await? {
                Ok(*id)
            } else {
                Err(StatsError::NotFound("player"))
            };
        }
        PlayerRef::Named { user_id, name } => (*user_id, name),
    };

    let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dim.users WHERE user_id = $1)")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await?;
    if !user_exists {
        return Err(StatsError::NotFound("user"));
    }

    let inserted: Option<i32> = sqlx::query_scalar(
        "INSERT INTO dim.players (player_name, user_id) VALUES ($1, $2) \
         ON CONFLICT (player_name, user_id) DO NOTHING RETURNING player_id",
    )
    .bind(name)
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(id) = inserted {
        return Ok(id);
    }

    sqlx::query_scalar("SELECT player_id FROM dim.players WHERE player_name = $1 AND user_id = $2")
        .bind(name)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StatsError::NotFound("player"))
}

/// Single-statement upsert of the dashboard row. Fields whose selection is
/// `Keep` retain the stored value.
async fn upsert_dashboard(
    tx: &mut Transaction<'_, Postgres>,
    player: Selection,
    game: Selection,
) -> Result<DashboardState> {
    let state = sqlx::query_as::<_, DashboardState>(
        r#"
        INSERT INTO dim.dashboard_state (state_id, current_player_id, current_game_id, updated_at)
        VALUES ($1, $3, $5, NOW())
        ON CONFLICT (state_id) DO UPDATE SET
            current_player_id = CASE WHEN $2 THEN EXCLUDED.current_player_id
                                     ELSE dim.dashboard_state.current_player_id END,
            current_game_id   = CASE WHEN $4 THEN EXCLUDED.current_game_id
                                     ELSE dim.dashboard_state.current_game_id END,
            updated_at        = NOW()
        RETURNING current_player_id AS player_id, current_game_id AS game_id, updated_at
        "#,
    )
    .bind(DASHBOARD_STATE_ID)
    .bind(player.touches())
    .bind(player.target())
    .bind(game.touches())
    .bind(game.target())
    .fetch_one(&mut **tx)
    .await?;
    Ok(state)
}

/// Appends FROM/WHERE for a stat filter. Facts are aliased `gs`, their
/// owning players `p`.
fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &StatFilter) {
    qb.push(" FROM fact.game_stats gs JOIN dim.players p ON p.player_id = gs.player_id WHERE TRUE");
    if let Some(player_id) = filter.player_id {
        qb.push(" AND gs.player_id = ").push_bind(player_id);
    }
    if let Some(game_id) = filter.game_id {
        qb.push(" AND gs.game_id = ").push_bind(game_id);
    }
    if let Some(stat_type) = &filter.stat_type {
        qb.push(" AND gs.stat_type = ").push_bind(stat_type.clone());
    }
    if let Some(game_mode) = &filter.game_mode {
        qb.push(" AND gs.game_mode = ").push_bind(game_mode.clone());
    }
    if let Some(win) = filter.win {
        qb.push(" AND gs.win = ").push_bind(win);
    }
    if let Some(ranked) = filter.ranked {
        qb.push(" AND gs.ranked = ").push_bind(ranked);
    }
    if let Some(from) = filter.from {
        qb.push(" AND gs.played_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND gs.played_at < ").push_bind(to);
    }
    if let Some(owner) = filter.owner_user_id {
        qb.push(" AND p.user_id = ").push_bind(owner);
    }
}

fn group_key(group_by: GroupBy) -> &'static str {
    match group_by {
        GroupBy::StatType => "gs.stat_type",
        GroupBy::GameMode => "gs.game_mode",
        GroupBy::Player => "gs.player_id::TEXT",
        GroupBy::Game => "gs.game_id::TEXT",
        GroupBy::Day => "TO_CHAR(gs.played_at AT TIME ZONE 'UTC', 'YYYY-MM-DD')",
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn get_user_by_id(&self, user_id: i32) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM dim.users WHERE user_id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {} FROM dim.users WHERE user_email = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn insert_user_if_absent(&self, email: &str, is_trusted: bool) -> Result<User> {
        let sql = format!(
            "INSERT INTO dim.users (user_email, is_trusted) VALUES ($1, $2) \
             ON CONFLICT (user_email) DO NOTHING RETURNING {}",
            USER_COLUMNS
        );
        let inserted = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .bind(is_trusted)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(user) => Ok(user),
            // Lost the race or already present; the row is committed by now
            None => self
                .get_user_by_email(email)
                .await?
                .ok_or(StatsError::NotFound("user")),
        }
    }

    async fn set_user_trust(&self, user_id: i32, is_trusted: bool) -> Result<User> {
        let sql = format!(
            "UPDATE dim.users SET is_trusted = $2 WHERE user_id = $1 RETURNING {}",
            USER_COLUMNS
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(is_trusted)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StatsError::NotFound("user"))
    }

    async fn create_player(&self, user_id: i32, name: &str) -> Result<Player> {
        let mut tx = self.pool.begin().await?;

        let user_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM dim.users WHERE user_id = $1)")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        if !user_exists {
            return Err(StatsError::NotFound("user"));
        }

        let sql = format!(
            "INSERT INTO dim.players (player_name, user_id) VALUES ($1, $2) RETURNING {}",
            PLAYER_COLUMNS
        );
        let player = sqlx::query_as::<_, Player>(&sql)
            .bind(name)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(player)
    }

    async fn get_player(&self, player_id: i32) -> Result<Option<Player>> {
        let sql = format!("SELECT {} FROM dim.players WHERE player_id = $1", PLAYER_COLUMNS);
        let player = sqlx::query_as::<_, Player>(&sql)
            .bind(player_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(player)
    }

    async fn list_players(&self, owner: Option<i32>) -> Result<Vec<Player>> {
        let sql = format!(
            "SELECT {} FROM dim.players WHERE ($1::INT IS NULL OR user_id = $1) \
             ORDER BY player_name, player_id",
            PLAYER_COLUMNS
        );
        let players = sqlx::query_as::<_, Player>(&sql)
            .bind(owner)
            .fetch_all(&self.pool)
            .await?;
        Ok(players)
    }

    async fn rename_player(&self, player_id: i32, name: &str) -> Result<Player> {
        let sql = format!(
            "UPDATE dim.players SET player_name = $2 WHERE player_id = $1 RETURNING {}",
            PLAYER_COLUMNS
        );
        sqlx::query_as::<_, Player>(&sql)
            .bind(player_id)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StatsError::NotFound("player"))
    }

    async fn delete_player(&self, player_id: i32) -> Result<Player> {
        let mut tx = self.pool.begin().await?;

        // Row lock blocks concurrent fact inserts (they take KEY SHARE on the player)
        let locked: Option<i32> = sqlx::query_scalar("SELECT player_id FROM dim.players WHERE player_id = $1 FOR UPDATE")
            .bind(player_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StatsError::NotFound("player"));
        }

        let referenced: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM fact.game_stats WHERE player_id = $1)")
            .bind(player_id)
            .fetch_one(&mut *tx)
            .await?;
        if referenced {
            return Err(StatsError::Conflict(
                "player still has recorded stats; delete them first".to_string(),
            ));
        }

        let sql = format!("DELETE FROM dim.players WHERE player_id = $1 RETURNING {}", PLAYER_COLUMNS);
        let player = sqlx::query_as::<_, Player>(&sql)
            .bind(player_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(player)
    }

    async fn create_game(&self, game: &NewGame) -> Result<Game> {
        let sql = format!(
            "INSERT INTO dim.games (game_name, game_installment, game_genre, game_subgenre) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            GAME_COLUMNS
        );
        let created = sqlx::query_as::<_, Game>(&sql)
            .bind(&game.name)
            .bind(&game.installment)
            .bind(&game.genre)
            .bind(&game.subgenre)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn get_game(&self, game_id: i32) -> Result<Option<Game>> {
        let sql = format!("SELECT {} FROM dim.games WHERE game_id = $1", GAME_COLUMNS);
        let game = sqlx::query_as::<_, Game>(&sql)
            .bind(game_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(game)
    }

    async fn list_games(&self) -> Result<Vec<Game>> {
        let sql = format!(
            "SELECT {} FROM dim.games ORDER BY game_name, game_installment NULLS FIRST",
            GAME_COLUMNS
        );
        let games = sqlx::query_as::<_, Game>(&sql).fetch_all(&self.pool).await?;
        Ok(games)
    }

    async fn update_game(&self, game_id: i32, game: &NewGame) -> Result<Game> {
        let sql = format!(
            "UPDATE dim.games SET game_name = $2, game_installment = $3, game_genre = $4, \
             game_subgenre = $5 WHERE game_id = $1 RETURNING {}",
            GAME_COLUMNS
        );
        sqlx::query_as::<_, Game>(&sql)
            .bind(game_id)
            .bind(&game.name)
            .bind(&game.installment)
            .bind(&game.genre)
            .bind(&game.subgenre)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StatsError::NotFound("game"))
    }

    async fn delete_game(&self, game_id: i32) -> Result<Game> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<i32> = sqlx::query_scalar("SELECT game_id FROM dim.games WHERE game_id = $1 FOR UPDATE")
            .bind(game_id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(StatsError::NotFound("game"));
        }

        let referenced: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM fact.game_stats WHERE game_id = $1)")
            .bind(game_id)
            .fetch_one(&mut *tx)
            .await?;
        if referenced {
            return Err(StatsError::Conflict(
                "game still has recorded stats; delete them first".to_string(),
            ));
        }

        let sql = format!("DELETE FROM dim.games WHERE game_id = $1 RETURNING {}", GAME_COLUMNS);
        let game = sqlx::query_as::<_, Game>(&sql)
            .bind(game_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(game)
    }

    async fn game_facets(&self, game_id: i32, owner: Option<i32>) -> Result<GameFacets> {
        let game_modes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT gs.game_mode
            FROM fact.game_stats gs
            JOIN dim.players p ON gs.player_id = p.player_id
            WHERE gs.game_id = $1 AND ($2::INT IS NULL OR p.user_id = $2)
              AND gs.game_mode IS NOT NULL AND gs.game_mode <> ''
            ORDER BY gs.game_mode
            "#,
        )
        .bind(game_id)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let stat_types: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT gs.stat_type
            FROM fact.game_stats gs
            JOIN dim.players p ON gs.player_id = p.player_id
            WHERE gs.game_id = $1 AND ($2::INT IS NULL OR p.user_id = $2)
              AND gs.stat_type <> ''
            ORDER BY gs.stat_type
            "#,
        )
        .bind(game_id)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        let ranks: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT rank_value FROM (
                SELECT gs.pre_match_rank AS rank_value
                FROM fact.game_stats gs
                JOIN dim.players p ON gs.player_id = p.player_id
                WHERE gs.game_id = $1 AND gs.ranked AND ($2::INT IS NULL OR p.user_id = $2)
                UNION
                SELECT gs.post_match_rank AS rank_value
                FROM fact.game_stats gs
                JOIN dim.players p ON gs.player_id = p.player_id
                WHERE gs.game_id = $1 AND gs.ranked AND ($2::INT IS NULL OR p.user_id = $2)
            ) AS combined_ranks
            WHERE rank_value IS NOT NULL AND rank_value <> ''
            ORDER BY rank_value
            "#,
        )
        .bind(game_id)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(GameFacets {
            game_modes,
            stat_types,
            ranks,
        })
    }

    async fn list_franchises(&self, owner: Option<i32>) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT g.game_name
            FROM dim.games g
            JOIN fact.game_stats gs ON g.game_id = gs.game_id
            JOIN dim.players p ON gs.player_id = p.player_id
            WHERE $1::INT IS NULL OR p.user_id = $1
            ORDER BY g.game_name
            "#,
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }

    async fn list_installments(&self, franchise: &str, owner: Option<i32>) -> Result<Vec<Installment>> {
        let installments = sqlx::query_as::<_, Installment>(
            r#"
            SELECT DISTINCT g.game_id, g.game_installment AS installment
            FROM dim.games g
            JOIN fact.game_stats gs ON g.game_id = gs.game_id
            JOIN dim.players p ON gs.player_id = p.player_id
            WHERE g.game_name = $1 AND ($2::INT IS NULL OR p.user_id = $2)
            ORDER BY g.game_installment, g.game_id
            "#,
        )
        .bind(franchise)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(installments)
    }

    async fn record_stats(&self, batch: &StatBatch) -> Result<Vec<GameStat>> {
        if batch.stats.is_empty() {
            return Err(StatsError::Validation("at least one stat is required".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let game_id = resolve_game(&mut tx, &batch.game).await?;
        let player_id = resolve_player(&mut tx, &batch.player).await?;

        let mut qb = QueryBuilder::<Postgres>::new(
            "INSERT INTO fact.game_stats (game_id, player_id, stat_type, stat_value, game_mode, \
             game_level, win, ranked, pre_match_rank, post_match_rank, played_at) ",
        );
        qb.push_values(&batch.stats, |mut row, stat| {
            row.push_bind(game_id)
                .push_bind(player_id)
                .push_bind(stat.stat_type.to_string())
                .push_bind(stat.stat_value)
                .push_bind(stat.game_mode.clone())
                .push_bind(stat.game_level)
                .push_bind(stat.win)
                .push_bind(stat.ranked)
                .push_bind(stat.pre_match_rank.clone())
                .push_bind(stat.post_match_rank.clone())
                .push_bind(batch.played_at);
        });
        qb.push(" RETURNING ").push(STAT_COLUMNS);
        let recorded = qb.build_query_as::<GameStat>().fetch_all(&mut *tx).await?;

        // Last, so the game row stays locked only until commit
        sqlx::query("UPDATE dim.games SET last_played_at = NOW() WHERE game_id = $1")
            .bind(game_id)
            .execute(&mut *tx)
            .await?;

        if batch.set_live {
            upsert_dashboard(&mut tx, Selection::Set(player_id), Selection::Set(game_id)).await?;
        }

        tx.commit().await?;
        debug!(
            "Recorded {} stats for player {} in game {}",
            recorded.len(),
            player_id,
            game_id
        );
        Ok(recorded)
    }

    async fn get_stat(&self, stat_id: i32) -> Result<Option<GameStat>> {
        let sql = format!("SELECT {} FROM fact.game_stats WHERE stat_id = $1", STAT_COLUMNS);
        let stat = sqlx::query_as::<_, GameStat>(&sql)
            .bind(stat_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(stat)
    }

    async fn update_stat(&self, stat_id: i32, patch: &StatPatch) -> Result<GameStat> {
        let sql = format!(
            r#"
            UPDATE fact.game_stats SET
                stat_type       = COALESCE($2, stat_type),
                stat_value      = COALESCE($3, stat_value),
                game_mode       = CASE WHEN $4 THEN $5 ELSE game_mode END,
                game_level      = CASE WHEN $6 THEN $7 ELSE game_level END,
                win             = CASE WHEN $8 THEN $9 ELSE win END,
                ranked          = CASE WHEN $10 THEN $11 ELSE ranked END,
                pre_match_rank  = CASE WHEN $12 THEN $13 ELSE pre_match_rank END,
                post_match_rank = CASE WHEN $14 THEN $15 ELSE post_match_rank END
            WHERE stat_id = $1
            RETURNING {}
            "#,
            STAT_COLUMNS
        );
        sqlx::query_as::<_, GameStat>(&sql)
            .bind(stat_id)
            .bind(patch.stat_type.as_ref().map(|t| t.to_string()))
            .bind(patch.stat_value)
            .bind(patch.game_mode.touches())
            .bind(patch.game_mode.target())
            .bind(patch.game_level.touches())
            .bind(patch.game_level.target())
            .bind(patch.win.touches())
            .bind(patch.win.target())
            .bind(patch.ranked.touches())
            .bind(patch.ranked.target())
            .bind(patch.pre_match_rank.touches())
            .bind(patch.pre_match_rank.target())
            .bind(patch.post_match_rank.touches())
            .bind(patch.post_match_rank.target())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StatsError::NotFound("stat"))
    }

    async fn delete_stat(&self, stat_id: i32) -> Result<DeletedStat> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("DELETE FROM fact.game_stats WHERE stat_id = $1 RETURNING {}", STAT_COLUMNS);
        let stat = sqlx::query_as::<_, GameStat>(&sql)
            .bind(stat_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StatsError::NotFound("stat"))?;

        let others_remain: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM fact.game_stats WHERE game_id = $1)")
            .bind(stat.game_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(DeletedStat {
            stat,
            last_stat_for_game: !others_remain,
        })
    }

    async fn list_stats(&self, filter: &StatFilter) -> Result<Vec<GameStat>> {
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT gs.stat_id AS id, gs.game_id, gs.player_id, gs.stat_type, gs.stat_value, \
             gs.game_mode, gs.game_level, gs.win, gs.ranked, gs.pre_match_rank, \
             gs.post_match_rank, gs.played_at",
        );
        push_filter(&mut qb, filter);
        qb.push(" ORDER BY gs.played_at DESC, gs.stat_id DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let stats = qb.build_query_as::<GameStat>().fetch_all(&self.pool).await?;
        Ok(stats)
    }

    async fn aggregate_stats(&self, group_by: GroupBy, filter: &StatFilter) -> Result<Vec<AggregateRow>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT ");
        qb.push(group_key(group_by)).push(
            r#" AS "key",
                COUNT(*) AS "count",
                SUM(gs.stat_value)::BIGINT AS "sum",
                AVG(gs.stat_value)::DOUBLE PRECISION AS "avg",
                MIN(gs.stat_value) AS "min",
                MAX(gs.stat_value) AS "max""#,
        );
        push_filter(&mut qb, filter);
        qb.push(" GROUP BY 1 ORDER BY 1 NULLS LAST");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(limit);
        }

        let rows = qb.build_query_as::<AggregateRow>().fetch_all(&self.pool).await?;
        Ok(rows)
    }

    async fn get_dashboard(&self) -> Result<DashboardState> {
        let state = sqlx::query_as::<_, DashboardState>(
            "SELECT current_player_id AS player_id, current_game_id AS game_id, updated_at \
             FROM dim.dashboard_state WHERE state_id = $1",
        )
        .bind(DASHBOARD_STATE_ID)
        .fetch_optional(&self.pool)
        .await?;
        Ok(state.unwrap_or_default())
    }

    async fn set_dashboard(&self, update: &DashboardUpdate) -> Result<DashboardState> {
        let mut tx = self.pool.begin().await?;

        if let Some(player_id) = update.player_id.target() {
            if !player_exists(&mut tx, player_id).await? {
                return Err(StatsError::NotFound("player"));
            }
        }
        if let Some(game_id) = update.game_id.target() {
            if !game_exists(&mut tx, game_id).await? {
                return Err(StatsError::NotFound("game"));
            }
        }

        let state = upsert_dashboard(&mut tx, update.player_id, update.game_id).await?;
        tx.commit().await?;
        Ok(state)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
