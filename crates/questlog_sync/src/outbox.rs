//! Pending action outbox.
//!
//! Mutations that have not been confirmed by the remote store are kept as
//! [`PendingAction`]s in the user's combined record, in the order they were
//! queued. The sync engine drains them strictly in that order.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::Result;
use crate::model::{Objective, StatMap};
use crate::record::RecordStore;

/// XP granted to a character, recorded remotely as an appended log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct XpAward {
    /// Character receiving the XP
    pub character_id: String,
    /// Amount awarded
    #[ts(type = "number")]
    pub xp_amount: i64,
    /// What earned it (e.g. "quiz", "quest_complete")
    pub source: String,
}

/// Field-level changes to a character. Absent fields are left untouched remotely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdates {
    /// New level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub level: Option<u32>,
    /// New lifetime XP
    #[serde(rename = "totalXP", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub total_xp: Option<i64>,
    /// New XP towards the next level
    #[serde(rename = "currentXP", default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub current_xp: Option<i64>,
    /// Timestamp of the change (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional, type = "number")]
    pub updated_at: Option<i64>,
}

impl CharacterUpdates {
    /// Check whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.total_xp.is_none()
            && self.current_xp.is_none()
            && self.updated_at.is_none()
    }
}

/// Partial update of a character record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct CharacterUpdate {
    /// Character to update
    pub character_id: String,
    /// Fields to change
    pub updates: CharacterUpdates,
}

/// New progress for one quest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct QuestProgress {
    /// Quest to update
    pub quest_id: String,
    /// Objective progress
    pub progress: Vec<Objective>,
    /// Quest-level completion
    pub completed: bool,
}

/// Stat points to spend, as per-stat deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct StatAllocation {
    /// Character spending the points
    pub character_id: String,
    /// Points per stat; stats not named are treated as zero
    #[ts(type = "Record<string, number>")]
    pub stat_allocations: StatMap,
}

/// The mutation carried by a [`PendingAction`], tagged by its type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ActionPayload {
    /// Partial character update
    CharacterUpdate(CharacterUpdate),
    /// Appended XP log entry
    XpAward(XpAward),
    /// Partial quest progress update
    QuestProgress(QuestProgress),
    /// Atomic stat point allocation
    StatAllocation(StatAllocation),
}

impl ActionPayload {
    /// Wire name of this action type.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionPayload::CharacterUpdate(_) => "character_update",
            ActionPayload::XpAward(_) => "xp_award",
            ActionPayload::QuestProgress(_) => "quest_progress",
            ActionPayload::StatAllocation(_) => "stat_allocation",
        }
    }
}

/// An action waiting to be applied to the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct PendingAction {
    /// Unique id, assigned in increasing order per user
    #[ts(type = "number")]
    pub id: u64,

    /// The mutation itself, stored as top-level `type` and `payload` fields
    #[serde(flatten)]
    pub action: ActionPayload,

    /// Owner of the action
    pub user_id: String,

    /// Unix timestamp (milliseconds) at which the action was queued
    #[ts(type = "number")]
    pub timestamp: i64,

    /// Failed delivery attempts so far
    #[serde(default)]
    pub retry_count: u32,
}

/// A mutation to queue, before it has been given an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAction {
    /// Owner of the action
    pub user_id: String,
    /// The mutation
    pub payload: ActionPayload,
}

impl NewAction {
    /// Create a new action for `user_id`.
    pub fn new(user_id: impl Into<String>, payload: ActionPayload) -> Self {
        Self {
            user_id: user_id.into(),
            payload,
        }
    }

    /// An `xp_award` action.
    pub fn xp_award(
        user_id: impl Into<String>,
        character_id: impl Into<String>,
        xp_amount: i64,
        source: impl Into<String>,
    ) -> Self {
        Self::new(
            user_id,
            ActionPayload::XpAward(XpAward {
                character_id: character_id.into(),
                xp_amount,
                source: source.into(),
            }),
        )
    }

    /// A `stat_allocation` action.
    pub fn stat_allocation(
        user_id: impl Into<String>,
        character_id: impl Into<String>,
        stat_allocations: StatMap,
    ) -> Self {
        Self::new(
            user_id,
            ActionPayload::StatAllocation(StatAllocation {
                character_id: character_id.into(),
                stat_allocations,
            }),
        )
    }
}

/// Durable FIFO queue of pending actions, stored inside each user's record.
#[derive(Debug, Clone)]
pub struct Outbox {
    records: Arc<RecordStore>,
}

impl Outbox {
    /// Create an outbox backed by `records`.
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Append an action with `retry_count = 0` and a fresh id; persists immediately.
    pub fn queue_offline_action(&self, action: NewAction) -> Result<PendingAction> {
        let NewAction { user_id, payload } = action;
        let timestamp = chrono::Utc::now().timestamp_millis();
        let owner = user_id.clone();
        let queued = self
            .records
            .update(&user_id, move |record| record.enqueue(owner, payload, timestamp))?;
        log::debug!(
            "Queued {} action #{} for {}",
            queued.action.kind(),
            queued.id,
            user_id
        );
        Ok(queued)
    }

    /// All pending actions for a user, oldest first.
    pub fn pending_actions(&self, user_id: &str) -> Result<Vec<PendingAction>> {
        Ok(self.records.load(user_id)?.pending_actions)
    }

    /// Number of pending actions for a user.
    pub fn get_pending_action_count(&self, user_id: &str) -> Result<usize> {
        Ok(self.records.load(user_id)?.pending_actions.len())
    }

    /// Remove an action. Returns `false` if it was no longer queued.
    pub(crate) fn remove_action(&self, user_id: &str, id: u64) -> Result<bool> {
        self.records
            .update(user_id, |record| record.remove_action(id).is_some())
    }

    /// Increment an action's retry count, returning the new count.
    ///
    /// Returns `None` if the action was no longer queued.
    pub(crate) fn increment_retry(&self, user_id: &str, id: u64) -> Result<Option<u32>> {
        self.records
            .update(user_id, |record| record.increment_retry(id))
    }
}
