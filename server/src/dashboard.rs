use std::sync::Arc;

use common::DashboardUpdate;
use tracing::info;

use crate::db::Database;
use crate::db::models::DashboardState;
use crate::error::{Result, StatsError};

/// The live player/game selection shared by every client and overlay.
///
/// Stored as one upserted row, so concurrent writers resolve last-write-wins
/// and readers always see a complete row.
#[derive(Clone)]
pub struct DashboardManager {
    db: Arc<dyn Database>,
}

impl DashboardManager {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// All-null state when nothing was ever selected.
    pub async fn get_current(&self) -> Result<DashboardState> {
        self.db.get_dashboard().await
    }

    pub async fn set_current(&self, update: &DashboardUpdate) -> Result<DashboardState> {
        let state = self.db.set_dashboard(update).await?;
        info!(
            "Dashboard set to player {:?}, game {:?}",
            state.player_id, state.game_id
        );
        Ok(state)
    }

    /// Both ids of the live selection, or `NotFound` while either is unset.
    pub async fn current_selection(&self) -> Result<(i32, i32)> {
        let state = self.get_current().await?;
        match (state.player_id, state.game_id) {
            (Some(player_id), Some(game_id)) => Ok((player_id, game_id)),
            _ => Err(StatsError::NotFound("live player/game selection")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryDatabase;
    use crate::db::models::NewGame;
    use common::Selection;

    async fn setup() -> (DashboardManager, Arc<MemoryDatabase>, i32, i32, i32) {
        let db = Arc::new(MemoryDatabase::new());
        let user = db.insert_user_if_absent("a@example.com", true).await.unwrap();
        let p1 = db.create_player(user.id, "One").await.unwrap();
        let p2 = db.create_player(user.id, "Two").await.unwrap();
        let game = db
            .create_game(&NewGame::new("Halo", Some("Infinite"), None, None).unwrap())
            .await
            .unwrap();
        (DashboardManager::new(db.clone()), db, p1.id, p2.id, game.id)
    }

    #[tokio::test]
    async fn test_unset_state_is_empty() {
        let (dashboard, ..) = setup().await;
        let state = dashboard.get_current().await.unwrap();
        assert_eq!(state, DashboardState::default());
        assert!(matches!(
            dashboard.current_selection().await,
            Err(StatsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_update_keeps_other_field() {
        let (dashboard, _, p1, p2, game) = setup().await;
        dashboard.set_current(&DashboardUpdate::set(p1, game)).await.unwrap();

        let update = DashboardUpdate {
            player_id: Selection::Set(p2),
            game_id: Selection::Keep,
        };
        let state = dashboard.set_current(&update).await.unwrap();
        assert_eq!((state.player_id, state.game_id), (Some(p2), Some(game)));
        assert!(state.updated_at.is_some());
        assert_eq!(dashboard.current_selection().await.unwrap(), (p2, game));
    }

    #[tokio::test]
    async fn test_unknown_target_rejected() {
        let (dashboard, _, p1, _, _) = setup().await;
        let err = dashboard
            .set_current(&DashboardUpdate::set(p1, 999))
            .await
            .unwrap_err();
        assert!(matches!(err, StatsError::NotFound(_)));
        assert_eq!(dashboard.get_current().await.unwrap(), DashboardState::default());
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_a_complete_row() {
        let (dashboard, _, p1, p2, game) = setup().await;
        let handles: Vec<_> = (0..20)
            .map(|i| {
                let dashboard = dashboard.clone();
                let player = if i % 2 == 0 { p1 } else { p2 };
                tokio::spawn(async move { dashboard.set_current(&DashboardUpdate::set(player, game)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let state = dashboard.get_current().await.unwrap();
        assert!(state.player_id == Some(p1) || state.player_id == Some(p2));
        assert_eq!(state.game_id, Some(game));
    }
}
