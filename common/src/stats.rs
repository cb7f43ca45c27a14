use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::constants::MAX_LABEL_LEN;

/// Role carried by a session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Guest,
}

impl Role {
    pub fn for_trust(is_trusted: bool) -> Self {
        if is_trusted { Role::Admin } else { Role::Guest }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Trims a label and checks it is non-empty and within `max` characters.
pub fn validate_label(field: &'static str, value: &str, max: usize) -> Result<String, LabelError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LabelError::Empty { field });
    }
    if trimmed.chars().count() > max {
        return Err(LabelError::TooLong { field, max });
    }
    Ok(trimmed.to_string())
}

/// Validated name of a tracked statistic, e.g. "Eliminations".
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StatType(String);

impl StatType {
    pub fn parse(value: &str) -> Result<Self, LabelError> {
        validate_label("stat_type", value, MAX_LABEL_LEN).map(StatType)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StatType {
    type Error = LabelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        StatType::parse(&value)
    }
}

impl From<StatType> for String {
    fn from(value: StatType) -> Self {
        value.0
    }
}

impl fmt::Display for StatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dimension a stat aggregate is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    StatType,
    GameMode,
    Player,
    Game,
    Day,
}

/// How one nullable field changes on an update.
///
/// An omitted JSON field is `Keep` (with `#[serde(default)]`), an explicit
/// `null` is `Clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selection<T = i32> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T: Clone> Selection<T> {
    /// The value to store when this selection touches the field.
    pub fn target(&self) -> Option<T> {
        match self {
            Selection::Set(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn touches(&self) -> bool {
        !matches!(self, Selection::Keep)
    }

    pub fn apply(&self, current: Option<T>) -> Option<T> {
        match self {
            Selection::Keep => current,
            Selection::Clear => None,
            Selection::Set(value) => Some(value.clone()),
        }
    }

    /// Keeps `Keep` and `Clear`, maps a set value.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<Selection<U>, E> {
        Ok(match self {
            Selection::Keep => Selection::Keep,
            Selection::Clear => Selection::Clear,
            Selection::Set(value) => Selection::Set(f(value)?),
        })
    }
}

impl<'de, T> Deserialize<'de> for Selection<T>
where
    T: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(|value| match value {
            Some(value) => Selection::Set(value),
            None => Selection::Clear,
        })
    }
}

/// Body of a dashboard update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DashboardUpdate {
    #[serde(default)]
    pub player_id: Selection,
    #[serde(default)]
    pub game_id: Selection,
}

impl DashboardUpdate {
    pub fn set(player_id: i32, game_id: i32) -> Self {
        Self {
            player_id: Selection::Set(player_id),
            game_id: Selection::Set(game_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_update_field_semantics() {
        let update: DashboardUpdate = serde_json::from_str(r#"{"player_id": 9}"#).unwrap();
        assert_eq!(update.player_id, Selection::Set(9));
        assert_eq!(update.game_id, Selection::Keep);

        let update: DashboardUpdate =
            serde_json::from_str(r#"{"player_id": null, "game_id": 3}"#).unwrap();
        assert_eq!(update.player_id, Selection::Clear);
        assert_eq!(update.game_id, Selection::Set(3));

        let update: DashboardUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(update, DashboardUpdate::default());
    }

    #[test]
    fn test_selection_apply() {
        assert_eq!(Selection::Keep.apply(Some(3)), Some(3));
        assert_eq!(Selection::Clear.apply(Some(3)), None);
        assert_eq!(Selection::Set(9).apply(Some(3)), Some(9));
        assert!(!Selection::<i32>::Keep.touches());
        assert_eq!(Selection::<i32>::Clear.target(), None);
    }

    #[test]
    fn test_selection_of_labels() {
        #[derive(Deserialize)]
        struct Edit {
            #[serde(default)]
            mode: Selection<String>,
            #[serde(default)]
            win: Selection<bool>,
        }

        let edit: Edit = serde_json::from_str(r#"{"mode": null}"#).unwrap();
        assert_eq!(edit.mode, Selection::Clear);
        assert_eq!(edit.win, Selection::Keep);

        let edit: Edit = serde_json::from_str(r#"{"mode": " TDM ", "win": false}"#).unwrap();
        assert_eq!(edit.win.apply(Some(true)), Some(false));
        let trimmed = edit.mode.try_map(|m| Ok::<_, ()>(m.trim().to_string())).unwrap();
        assert_eq!(trimmed, Selection::Set("TDM".to_string()));
    }

    #[test]
    fn test_stat_type_validation() {
        assert_eq!(StatType::parse("  Eliminations ").unwrap().as_str(), "Eliminations");
        assert_eq!(StatType::parse("   "), Err(LabelError::Empty { field: "stat_type" }));
        assert!(StatType::parse(&"x".repeat(51)).is_err());
        assert!(serde_json::from_str::<StatType>("\"\"").is_err());
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::for_trust(true), Role::Admin);
        assert_eq!(Role::for_trust(false).as_str(), "guest");
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), "\"admin\"");
    }

    #[test]
    fn test_group_by_names() {
        let group: GroupBy = serde_json::from_str("\"stat_type\"").unwrap();
        assert_eq!(group, GroupBy::StatType);
        assert!(serde_json::from_str::<GroupBy>("\"password\"").is_err());
    }
}
