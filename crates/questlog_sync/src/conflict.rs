//! Conflict resolution between the local cache and the remote store.
//!
//! When another device advanced the same character or quest, the two views
//! are merged by "higher wins" rules:
//!
//! - **Characters** are taken whole from the side with more `total_xp`. XP
//!   only ever grows, so the larger total reflects the longer play history;
//!   level, XP and stats are never mixed across sides.
//! - **Quests** are merged per objective (matched by id): the higher
//!   `current_value` wins and every completion flag is recomputed from the
//!   merged values.
//!
//! Every function here is pure, commutative and associative, so the order in
//! which devices reconcile does not change the outcome.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{CharacterState, Objective, QuestState, StatMap};

/// Which side a character resolution kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Both sides were already identical
    Identical,
    /// The local version won
    KeepLocal,
    /// The remote version won
    KeepRemote,
}

impl Resolution {
    /// Check if the local cache has to be rewritten
    pub fn changes_local(&self) -> bool {
        matches!(self, Resolution::KeepRemote)
    }
}

/// Total order used to pick a character. `total_xp` dominates; the remaining
/// fields only break ties so that the choice never depends on argument order.
fn precedence(c: &CharacterState) -> (i64, i64, u32, i64, &StatMap, &str) {
    (
        c.total_xp,
        c.updated_at,
        c.level,
        c.current_xp,
        &c.stats,
        c.id.as_str(),
    )
}

/// Resolve a character conflict, reporting which side was kept.
pub fn resolve_character_with_source(
    local: &CharacterState,
    remote: &CharacterState,
) -> (CharacterState, Resolution) {
    match precedence(local).cmp(&precedence(remote)) {
        Ordering::Equal => (local.clone(), Resolution::Identical),
        Ordering::Greater => (local.clone(), Resolution::KeepLocal),
        Ordering::Less => (remote.clone(), Resolution::KeepRemote),
    }
}

/// Resolve a character conflict: the version with the higher `total_xp`, as a unit.
pub fn resolve_character(a: &CharacterState, b: &CharacterState) -> CharacterState {
    resolve_character_with_source(a, b).0
}

fn normalized_objective(objective: &Objective) -> Objective {
    let mut objective = objective.clone();
    objective.normalize();
    objective
}

fn merge_objective(a: &Objective, b: &Objective) -> Objective {
    let mut merged = Objective {
        id: a.id.clone(),
        target_value: a.target_value.max(b.target_value),
        current_value: a.current_value.max(b.current_value),
        completed: false,
    };
    merged.normalize();
    merged
}

fn normalized_quest(quest: &QuestState) -> QuestState {
    let mut quest = quest.clone();
    quest.recompute_completion();
    quest
}

/// Resolve a quest conflict objective by objective.
///
/// Objectives present on only one side are kept. The quest's `completed`
/// flag is recomputed from the merged objectives, never copied.
pub fn resolve_quest(a: &QuestState, b: &QuestState) -> QuestState {
    let left: Vec<Objective> = a.progress.iter().map(normalized_objective).collect();
    let right: Vec<Objective> = b.progress.iter().map(normalized_objective).collect();

    let mut merged = QuestState {
        quest_id: a.quest_id.clone().min(b.quest_id.clone()),
        progress: merge_by_key(&left, &right, |o| o.id.clone(), merge_objective),
        completed: false,
    };
    merged.recompute_completion();
    merged
}

/// Resolve two quest lists, merging quests that share a `quest_id`.
pub fn resolve_quests(a: &[QuestState], b: &[QuestState]) -> Vec<QuestState> {
    let left: Vec<QuestState> = a.iter().map(normalized_quest).collect();
    let right: Vec<QuestState> = b.iter().map(normalized_quest).collect();
    merge_by_key(&left, &right, |q| q.quest_id.clone(), resolve_quest)
}

/// Union two keyed lists, combining entries with equal keys.
///
/// When both lists carry the same key sequence that order is kept; otherwise
/// the result is ordered by key.
fn merge_by_key<T, K, F, M>(a: &[T], b: &[T], key: F, merge: M) -> Vec<T>
where
    T: Clone,
    K: Ord,
    F: Fn(&T) -> K,
    M: Fn(&T, &T) -> T,
{
    let mut merged: BTreeMap<K, T> = BTreeMap::new();
    for item in a.iter().chain(b) {
        let next = match merged.get(&key(item)) {
            Some(existing) => merge(existing, item),
            None => item.clone(),
        };
        merged.insert(key(item), next);
    }

    let order_a: Vec<K> = a.iter().map(&key).collect();
    let order_b: Vec<K> = b.iter().map(&key).collect();
    if order_a == order_b {
        order_a
            .into_iter()
            .filter_map(|k| merged.remove(&k))
            .collect()
    } else {
        merged.into_values().collect()
    }
}
