pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use common::{DashboardUpdate, GroupBy};
use models::*;

use crate::error::Result;

pub use memory::MemoryDatabase;
pub use postgres::{PgDatabase, run_migrations};

/// Star-schema storage: user/player/game dimensions, the stat fact table and
/// the singleton dashboard row.
///
/// Every write is a single all-or-nothing unit. Implementations report pool
/// exhaustion and statement timeouts as `StatsError::ResourcePressure` and
/// never retry internally.
#[async_trait]
pub trait Database: Send + Sync {
    // User operations
    async fn get_user_by_id(&self, user_id: i32) -> Result<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    /// Inserts the user unless the email exists; returns the stored row either way.
    async fn insert_user_if_absent(&self, email: &str, is_trusted: bool) -> Result<User>;
    async fn set_user_trust(&self, user_id: i32, is_trusted: bool) -> Result<User>;

    // Player operations
    async fn create_player(&self, user_id: i32, name: &str) -> Result<Player>;
    async fn get_player(&self, player_id: i32) -> Result<Option<Player>>;
    async fn list_players(&self, owner: Option<i32>) -> Result<Vec<Player>>;
    async fn rename_player(&self, player_id: i32, name: &str) -> Result<Player>;
    /// Fails with `Conflict` while facts reference the player.
    async fn delete_player(&self, player_id: i32) -> Result<Player>;

    // Game operations
    async fn create_game(&self, game: &NewGame) -> Result<Game>;
    async fn get_game(&self, game_id: i32) -> Result<Option<Game>>;
    async fn list_games(&self) -> Result<Vec<Game>>;
    async fn update_game(&self, game_id: i32, game: &NewGame) -> Result<Game>;
    /// Fails with `Conflict` while facts reference the game.
    async fn delete_game(&self, game_id: i32) -> Result<Game>;
    async fn game_facets(&self, game_id: i32, owner: Option<i32>) -> Result<GameFacets>;
    /// Distinct game names with recorded stats, limited to `owner`'s players.
    async fn list_franchises(&self, owner: Option<i32>) -> Result<Vec<String>>;
    async fn list_installments(&self, franchise: &str, owner: Option<i32>) -> Result<Vec<Installment>>;

    // Stat operations
    /// Resolves or creates the batch's game and player, inserts its facts and
    /// optionally selects them on the dashboard, all in one unit.
    async fn record_stats(&self, batch: &StatBatch) -> Result<Vec<GameStat>>;
    async fn get_stat(&self, stat_id: i32) -> Result<Option<GameStat>>;
    async fn update_stat(&self, stat_id: i32, patch: &StatPatch) -> Result<GameStat>;
    async fn delete_stat(&self, stat_id: i32) -> Result<DeletedStat>;
    /// Newest first.
    async fn list_stats(&self, filter: &StatFilter) -> Result<Vec<GameStat>>;
    async fn aggregate_stats(&self, group_by: GroupBy, filter: &StatFilter) -> Result<Vec<AggregateRow>>;

    // Dashboard state
    async fn get_dashboard(&self) -> Result<DashboardState>;
    async fn set_dashboard(&self, update: &DashboardUpdate) -> Result<DashboardState>;

    /// Cheap round trip used by the health endpoint.
    async fn ping(&self) -> Result<()>;
}
