//! Character and quest state shared between the local cache and the remote store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Stat name to value (or delta) mapping, ordered for deterministic output.
pub type StatMap = BTreeMap<String, i64>;

/// A player's character as last seen by this client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct CharacterState {
    /// Remote character id
    pub id: String,

    /// Current level (starts at 1)
    pub level: u32,

    /// Lifetime XP
    #[serde(rename = "totalXP")]
    #[ts(type = "number")]
    pub total_xp: i64,

    /// XP earned towards the next level
    #[serde(rename = "currentXP")]
    #[ts(type = "number")]
    pub current_xp: i64,

    /// Allocated stat values
    #[serde(default)]
    #[ts(type = "Record<string, number>")]
    pub stats: StatMap,

    /// Unix timestamp (milliseconds) of the last change
    #[ts(type = "number")]
    pub updated_at: i64,
}

impl CharacterState {
    /// Create a level 1 character with no XP and no stats.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            level: 1,
            total_xp: 0,
            current_xp: 0,
            stats: StatMap::new(),
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Set a stat value (builder pattern).
    pub fn with_stat(mut self, name: impl Into<String>, value: i64) -> Self {
        self.stats.insert(name.into(), value);
        self
    }
}

/// A single objective within a quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct Objective {
    /// Objective id, unique within its quest
    pub id: String,
    /// Value at which the objective counts as done
    #[ts(type = "number")]
    pub target_value: i64,
    /// Progress so far, never above `target_value`
    #[ts(type = "number")]
    pub current_value: i64,
    /// `current_value >= target_value`
    pub completed: bool,
}

impl Objective {
    /// Create an objective, clamping progress to the target and deriving `completed`.
    pub fn new(id: impl Into<String>, current_value: i64, target_value: i64) -> Self {
        let mut objective = Self {
            id: id.into(),
            target_value,
            current_value,
            completed: false,
        };
        objective.normalize();
        objective
    }

    /// Re-establish `current_value <= target_value` and recompute `completed`.
    pub fn normalize(&mut self) {
        self.current_value = self.current_value.min(self.target_value);
        self.completed = self.current_value >= self.target_value;
    }
}

/// Progress on one quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct QuestState {
    /// Remote quest id
    pub quest_id: String,
    /// Objectives in display order
    #[serde(default)]
    pub progress: Vec<Objective>,
    /// True when every objective is completed
    pub completed: bool,
}

impl QuestState {
    /// Create a quest from its objectives, deriving the completion flags.
    pub fn new(quest_id: impl Into<String>, progress: Vec<Objective>) -> Self {
        let mut quest = Self {
            quest_id: quest_id.into(),
            progress,
            completed: false,
        };
        quest.recompute_completion();
        quest
    }

    /// Normalize every objective and derive the quest-level flag from them.
    ///
    /// A quest without objectives is never considered completed.
    pub fn recompute_completion(&mut self) {
        for objective in &mut self.progress {
            objective.normalize();
        }
        self.completed = !self.progress.is_empty() && self.progress.iter().all(|o| o.completed);
    }

    /// Look up an objective by id.
    pub fn objective(&self, id: &str) -> Option<&Objective> {
        self.progress.iter().find(|o| o.id == id)
    }
}

/// The last known state of a user, persisted in the local cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct CachedSnapshot {
    /// Cached character, if one has been written
    #[serde(default)]
    pub character: Option<CharacterState>,
    /// Cached quests in the order they were written
    #[serde(default)]
    pub quests: Vec<QuestState>,
    /// Unix timestamp (milliseconds) of the last cache write or reconcile
    #[serde(default)]
    #[ts(type = "number")]
    pub last_sync_timestamp: i64,
}

/// Cached state handed to the UI for hydration before any network round-trip.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct CachedData {
    /// Cached character
    pub character: Option<CharacterState>,
    /// Cached quests
    pub quests: Vec<QuestState>,
}

impl From<CachedSnapshot> for CachedData {
    fn from(snapshot: CachedSnapshot) -> Self {
        Self {
            character: snapshot.character,
            quests: snapshot.quests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objective_new_clamps_and_completes() {
        let objective = Objective::new("kill-slimes", 7, 5);
        assert_eq!(objective.current_value, 5);
        assert!(objective.completed);

        let objective = Objective::new("kill-slimes", 3, 5);
        assert_eq!(objective.current_value, 3);
        assert!(!objective.completed);
    }

    #[test]
    fn test_quest_completion_is_conjunction() {
        let quest = QuestState::new(
            "q1",
            vec![Objective::new("a", 5, 5), Objective::new("b", 1, 2)],
        );
        assert!(!quest.completed);

        let quest = QuestState::new(
            "q1",
            vec![Objective::new("a", 5, 5), Objective::new("b", 2, 2)],
        );
        assert!(quest.completed);
    }

    #[test]
    fn test_quest_without_objectives_is_not_completed() {
        let mut quest = QuestState::new("empty", vec![]);
        quest.completed = true;
        quest.recompute_completion();
        assert!(!quest.completed);
    }

    #[test]
    fn test_character_json_uses_camel_case() {
        let character = CharacterState {
            id: "c1".into(),
            level: 2,
            total_xp: 150,
            current_xp: 50,
            stats: StatMap::new(),
            updated_at: 1_700_000_000_000,
        }
        .with_stat("strength", 3);

        let json = serde_json::to_value(&character).unwrap();
        assert_eq!(json["totalXP"], 150);
        assert_eq!(json["currentXP"], 50);
        assert_eq!(json["stats"]["strength"], 3);
        assert_eq!(json["updatedAt"], 1_700_000_000_000_i64);
    }

    #[test]
    fn test_snapshot_tolerates_missing_fields() {
        let snapshot: CachedSnapshot = serde_json::from_str("{}").unwrap();
        assert!(snapshot.character.is_none());
        assert!(snapshot.quests.is_empty());
        assert_eq!(snapshot.last_sync_timestamp, 0);
    }
}
