use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{DashboardUpdate, GroupBy};
use tokio::sync::Mutex;

use super::Database;
use super::models::*;
use crate::error::{Result, StatsError};

#[derive(Default)]
struct Tables {
    users: BTreeMap<i32, User>,
    players: BTreeMap<i32, Player>,
    games: BTreeMap<i32, Game>,
    stats: BTreeMap<i32, GameStat>,
    dashboard: Option<DashboardState>,
    next_user_id: i32,
    next_player_id: i32,
    next_game_id: i32,
    next_stat_id: i32,
}

/// A batch dimension that already exists, or the values to insert it with.
enum Lookup<T> {
    Existing(i32),
    Missing(T),
}

fn next(counter: &mut i32) -> i32 {
    *counter += 1;
    *counter
}

impl Tables {
    fn owned_by(&self, stat: &GameStat, owner: Option<i32>) -> bool {
        match owner {
            None => true,
            Some(user_id) => self
                .players
                .get(&stat.player_id)
                .is_some_and(|p| p.user_id == user_id),
        }
    }

    fn filtered<'a>(&'a self, filter: &'a StatFilter) -> impl Iterator<Item = &'a GameStat> + 'a {
        self.stats
            .values()
            .filter(move |s| filter.matches(s) && self.owned_by(s, filter.owner_user_id))
    }

    fn game_name_taken(&self, game: &NewGame, except: Option<i32>) -> bool {
        self.games.values().any(|g| {
            Some(g.id) != except && g.name == game.name && g.installment == game.installment
        })
    }

    /// Id of the named game, or the values to create it with.
    fn find_game(&self, game: &GameRef) -> Result<Lookup<NewGame>> {
        match game {
            GameRef::Id(id) if self.games.contains_key(id) => Ok(Lookup::Existing(*id)),
            GameRef::Id(_) => Err(StatsError::NotFound("game")),
            GameRef::Named(new) => Ok(self
                .games
                .values()
                .find(|g| g.name == new.name && g.installment == new.installment)
                .map_or_else(|| Lookup::Missing(new.clone()), |g| Lookup::Existing(g.id))),
        }
    }

    fn find_player(&self, player: &PlayerRef) -> Result<Lookup<(i32, String)>> {
        match player {
            PlayerRef::Id(id) if self.players.contains_key(id) => Ok(Lookup::Existing(*id)),
            PlayerRef::Id(_) => Err(StatsError::NotFound("player")),
            PlayerRef::Named { user_id, name } => {
                if !self.users.contains_key(user_id) {
                    return Err(StatsError::NotFound("user"));
                }
                Ok(self
                    .players
                    .values()
                    .find(|p| p.user_id == *user_id && &p.name == name)
                    .map_or_else(
                        || Lookup::Missing((*user_id, name.clone())),
                        |p| Lookup::Existing(p.id),
                    ))
            }
        }
    }

    fn clear_dashboard_refs(&mut self, player_id: Option<i32>, game_id: Option<i32>) {
        if let Some(state) = self.dashboard.as_mut() {
            if player_id.is_some() && state.player_id == player_id {
                state.player_id = None;
            }
            if game_id.is_some() && state.game_id == game_id {
                state.game_id = None;
            }
        }
    }
}

/// In-process implementation of [`Database`].
///
/// A single mutex guards all tables and is held for the whole operation, so
/// each call is atomic. Used by tests and by `STATS_STORAGE=memory`.
#[derive(Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn get_user_by_id(&self, user_id: i32) -> Result<Option<User>> {
        Ok(self.tables.lock().await.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user_if_absent(&self, email: &str, is_trusted: bool) -> Result<User> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.values().find(|u| u.email == email) {
            return Ok(user.clone());
        }
        let user = User {
            id: next(&mut tables.next_user_id),
            email: email.to_string(),
            is_trusted,
            created_at: Utc::now(),
        };
        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_user_trust(&self, user_id: i32, is_trusted: bool) -> Result<User> {
        let mut tables = self.tables.lock().await;
        let user = tables.users.get_mut(&user_id).ok_or(StatsError::NotFound("user"))?;
        user.is_trusted = is_trusted;
        Ok(user.clone())
    }

    async fn create_player(&self, user_id: i32, name: &str) -> Result<Player> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StatsError::NotFound("user"));
        }
        if tables.players.values().any(|p| p.user_id == user_id && p.name == name) {
            return Err(StatsError::Conflict(format!("player '{}' already exists", name)));
        }
        let player = Player {
            id: next(&mut tables.next_player_id),
            name: name.to_string(),
            user_id,
            created_at: Utc::now(),
        };
        tables.players.insert(player.id, player.clone());
        Ok(player)
    }

    async fn get_player(&self, player_id: i32) -> Result<Option<Player>> {
        Ok(self.tables.lock().await.players.get(&player_id).cloned())
    }

    async fn list_players(&self, owner: Option<i32>) -> Result<Vec<Player>> {
        let tables = self.tables.lock().await;
        let mut players: Vec<Player> = tables
            .players
            .values()
            .filter(|p| owner.is_none_or(|user_id| p.user_id == user_id))
            .cloned()
            .collect();
        players.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(players)
    }

    async fn rename_player(&self, player_id: i32, name: &str) -> Result<Player> {
        let mut tables = self.tables.lock().await;
        let owner = tables
            .players
            .get(&player_id)
            .map(|p| p.user_id)
            .ok_or(StatsError::NotFound("player"))?;
        if tables
            .players
            .values()
            .any(|p| p.id != player_id && p.user_id == owner && p.name == name)
        {
            return Err(StatsError::Conflict(format!("player '{}' already exists", name)));
        }
        let player = tables.players.get_mut(&player_id).ok_or(StatsError::NotFound("player"))?;
        player.name = name.to_string();
        Ok(player.clone())
    }

    async fn delete_player(&self, player_id: i32) -> Result<Player> {
        let mut tables = self.tables.lock().await;
        if !tables.players.contains_key(&player_id) {
            return Err(StatsError::NotFound("player"));
        }
        if tables.stats.values().any(|s| s.player_id == player_id) {
            return Err(StatsError::Conflict(
                "player still has recorded stats; delete them first".to_string(),
            ));
        }
        tables.clear_dashboard_refs(Some(player_id), None);
        tables.players.remove(&player_id).ok_or(StatsError::NotFound("player"))
    }

    async fn create_game(&self, game: &NewGame) -> Result<Game> {
        let mut tables = self.tables.lock().await;
        if tables.game_name_taken(game, None) {
            return Err(StatsError::Conflict(format!("game '{}' already exists", game.name)));
        }
        let now = Utc::now();
        let created = Game {
            id: next(&mut tables.next_game_id),
            name: game.name.clone(),
            installment: game.installment.clone(),
            genre: game.genre.clone(),
            subgenre: game.subgenre.clone(),
            created_at: now,
            last_played_at: now,
        };
        tables.games.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_game(&self, game_id: i32) -> Result<Option<Game>> {
        Ok(self.tables.lock().await.games.get(&game_id).cloned())
    }

    async fn list_games(&self) -> Result<Vec<Game>> {
        let tables = self.tables.lock().await;
        let mut games: Vec<Game> = tables.games.values().cloned().collect();
        games.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.installment.cmp(&b.installment))
        });
        Ok(games)
    }

    async fn update_game(&self, game_id: i32, game: &NewGame) -> Result<Game> {
        let mut tables = self.tables.lock().await;
        if !tables.games.contains_key(&game_id) {
            return Err(StatsError::NotFound("game"));
        }
        if tables.game_name_taken(game, Some(game_id)) {
            return Err(StatsError::Conflict(format!("game '{}' already exists", game.name)));
        }
        let stored = tables.games.get_mut(&game_id).ok_or(StatsError::NotFound("game"))?;
        stored.name = game.name.clone();
        stored.installment = game.installment.clone();
        stored.genre = game.genre.clone();
        stored.subgenre = game.subgenre.clone();
        Ok(stored.clone())
    }

    async fn delete_game(&self, game_id: i32) -> Result<Game> {
        let mut tables = self.tables.lock().await;
        if !tables.games.contains_key(&game_id) {
            return Err(StatsError::NotFound("game"));
        }
        if tables.stats.values().any(|s| s.game_id == game_id) {
            return Err(StatsError::Conflict(
                "game still has recorded stats; delete them first".to_string(),
            ));
        }
        tables.clear_dashboard_refs(None, Some(game_id));
        tables.games.remove(&game_id).ok_or(StatsError::NotFound("game"))
    }

    async fn game_facets(&self, game_id: i32, owner: Option<i32>) -> Result<GameFacets> {
        let tables = self.tables.lock().await;
        let mut modes = BTreeSet::new();
        let mut stat_types = BTreeSet::new();
        let mut ranks = BTreeSet::new();

        let rows = tables
            .stats
            .values()
            .filter(|s| s.game_id == game_id && tables.owned_by(s, owner));
        for stat in rows {
            if let Some(mode) = stat.game_mode.as_ref().filter(|m| !m.is_empty()) {
                modes.insert(mode.clone());
            }
            if !stat.stat_type.is_empty() {
                stat_types.insert(stat.stat_type.clone());
            }
            if stat.ranked == Some(true) {
                for rank in [&stat.pre_match_rank, &stat.post_match_rank].into_iter().flatten() {
                    if !rank.is_empty() {
                        ranks.insert(rank.clone());
                    }
                }
            }
        }

        Ok(GameFacets {
            game_modes: modes.into_iter().collect(),
            stat_types: stat_types.into_iter().collect(),
            ranks: ranks.into_iter().collect(),
        })
    }

    async fn list_franchises(&self, owner: Option<i32>) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        let names: BTreeSet<String> = tables
            .stats
            .values()
            .filter(|s| tables.owned_by(s, owner))
            .filter_map(|s| tables.games.get(&s.game_id))
            .map(|g| g.name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn list_installments(&self, franchise: &str, owner: Option<i32>) -> Result<Vec<Installment>> {
        let tables = self.tables.lock().await;
        let game_ids: BTreeSet<i32> = tables
            .stats
            .values()
            .filter(|s| tables.owned_by(s, owner))
            .map(|s| s.game_id)
            .collect();
        let mut installments: Vec<Installment> = game_ids
            .iter()
            .filter_map(|id| tables.games.get(id))
            .filter(|g| g.name == franchise)
            .map(|g| Installment {
                game_id: g.id,
                installment: g.installment.clone(),
            })
            .collect();
        // Main game (NULL) last, as in SQL ascending order
        installments.sort_by(|a, b| match (&a.installment, &b.installment) {
            (Some(x), Some(y)) => x.cmp(y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.game_id.cmp(&b.game_id),
        });
        Ok(installments)
    }

    async fn record_stats(&self, batch: &StatBatch) -> Result<Vec<GameStat>> {
        if batch.stats.is_empty() {
            return Err(StatsError::Validation("at least one stat is required".to_string()));
        }
        let mut tables = self.tables.lock().await;

        // Resolve everything before the first write so a failure leaves no rows
        let game = tables.find_game(&batch.game)?;
        let player = tables.find_player(&batch.player)?;
        let now = Utc::now();

        let game_id = match game {
            Lookup::Existing(id) => id,
            Lookup::Missing(new) => {
                let id = next(&mut tables.next_game_id);
                tables.games.insert(
                    id,
                    Game {
                        id,
                        name: new.name,
                        installment: new.installment,
                        genre: new.genre,
                        subgenre: new.subgenre,
                        created_at: now,
                        last_played_at: now,
                    },
                );
                id
            }
        };
        let player_id = match player {
            Lookup::Existing(id) => id,
            Lookup::Missing((user_id, name)) => {
                let id = next(&mut tables.next_player_id);
                tables.players.insert(
                    id,
                    Player {
                        id,
                        name,
                        user_id,
                        created_at: now,
                    },
                );
                id
            }
        };

        let mut recorded = Vec::with_capacity(batch.stats.len());
        for stat in &batch.stats {
            let row = GameStat {
                id: next(&mut tables.next_stat_id),
                game_id,
                player_id,
                stat_type: stat.stat_type.to_string(),
                stat_value: stat.stat_value,
                game_mode: stat.game_mode.clone(),
                game_level: stat.game_level,
                win: stat.win,
                ranked: stat.ranked,
                pre_match_rank: stat.pre_match_rank.clone(),
                post_match_rank: stat.post_match_rank.clone(),
                played_at: batch.played_at,
            };
            tables.stats.insert(row.id, row.clone());
            recorded.push(row);
        }
        if let Some(game) = tables.games.get_mut(&game_id) {
            game.last_played_at = now;
        }

        if batch.set_live {
            tables.dashboard = Some(DashboardState {
                player_id: Some(player_id),
                game_id: Some(game_id),
                updated_at: Some(now),
            });
        }

        Ok(recorded)
    }

    async fn get_stat(&self, stat_id: i32) -> Result<Option<GameStat>> {
        Ok(self.tables.lock().await.stats.get(&stat_id).cloned())
    }

    async fn update_stat(&self, stat_id: i32, patch: &StatPatch) -> Result<GameStat> {
        let mut tables = self.tables.lock().await;
        let stat = tables.stats.get_mut(&stat_id).ok_or(StatsError::NotFound("stat"))?;
        patch.apply(stat);
        Ok(stat.clone())
    }

    async fn delete_stat(&self, stat_id: i32) -> Result<DeletedStat> {
        let mut tables = self.tables.lock().await;
        let stat = tables.stats.remove(&stat_id).ok_or(StatsError::NotFound("stat"))?;
        let last_stat_for_game = !tables.stats.values().any(|s| s.game_id == stat.game_id);
        Ok(DeletedStat {
            stat,
            last_stat_for_game,
        })
    }

    async fn list_stats(&self, filter: &StatFilter) -> Result<Vec<GameStat>> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<GameStat> = tables.filtered(filter).cloned().collect();
        rows.sort_by(|a, b| b.played_at.cmp(&a.played_at).then(b.id.cmp(&a.id)));
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn aggregate_stats(&self, group_by: GroupBy, filter: &StatFilter) -> Result<Vec<AggregateRow>> {
        let tables = self.tables.lock().await;
        let mut groups: BTreeMap<Option<String>, Vec<i32>> = BTreeMap::new();
        for stat in tables.filtered(filter) {
            let key = match group_by {
                GroupBy::StatType => Some(stat.stat_type.clone()),
                GroupBy::GameMode => stat.game_mode.clone(),
                GroupBy::Player => Some(stat.player_id.to_string()),
                GroupBy::Game => Some(stat.game_id.to_string()),
                GroupBy::Day => Some(day_key(stat.played_at.date_naive())),
            };
            groups.entry(key).or_default().push(stat.stat_value);
        }

        // NULL keys sort last, as in the SQL implementation
        let mut rows: Vec<AggregateRow> = groups
            .iter()
            .filter(|(key, _)| key.is_some())
            .chain(groups.iter().filter(|(key, _)| key.is_none()))
            .map(|(key, values)| AggregateRow::from_values(key.clone(), values))
            .collect();
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn get_dashboard(&self) -> Result<DashboardState> {
        Ok(self.tables.lock().await.dashboard.unwrap_or_default())
    }

    async fn set_dashboard(&self, update: &DashboardUpdate) -> Result<DashboardState> {
        let mut tables = self.tables.lock().await;
        if let Some(player_id) = update.player_id.target() {
            if !tables.players.contains_key(&player_id) {
                return Err(StatsError::NotFound("player"));
            }
        }
        if let Some(game_id) = update.game_id.target() {
            if !tables.games.contains_key(&game_id) {
                return Err(StatsError::NotFound("game"));
            }
        }

        let current = tables.dashboard.unwrap_or_default();
        let state = DashboardState {
            player_id: update.player_id.apply(current.player_id),
            game_id: update.game_id.apply(current.game_id),
            updated_at: Some(Utc::now()),
        };
        tables.dashboard = Some(state);
        Ok(state)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
