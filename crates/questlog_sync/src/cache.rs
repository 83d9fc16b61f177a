//! Local cache of the last known character and quest state per user.
//!
//! Writes replace one part of the snapshot and keep everything else in the
//! user's record (the other part and the pending-action queue) as it was.

use std::sync::Arc;

use crate::error::Result;
use crate::model::{CachedSnapshot, CharacterState, QuestState};
use crate::record::RecordStore;

/// Per-user snapshot cache, persisted through the [`RecordStore`].
#[derive(Debug, Clone)]
pub struct LocalCache {
    records: Arc<RecordStore>,
}

impl LocalCache {
    /// Create a cache backed by `records`.
    pub fn new(records: Arc<RecordStore>) -> Self {
        Self { records }
    }

    /// Replace the cached character and stamp the snapshot with the current time.
    pub fn cache_character(&self, user_id: &str, character: CharacterState) -> Result<()> {
        let now = now_millis();
        self.records.update(user_id, move |record| {
            record.snapshot.character = Some(character);
            record.snapshot.last_sync_timestamp = now;
        })
    }

    /// Replace the cached quest list and stamp the snapshot with the current time.
    pub fn cache_quests(&self, user_id: &str, quests: Vec<QuestState>) -> Result<()> {
        let now = now_millis();
        self.records.update(user_id, move |record| {
            record.snapshot.quests = quests;
            record.snapshot.last_sync_timestamp = now;
        })
    }

    /// Stamp the snapshot without changing it.
    pub fn mark_synced(&self, user_id: &str) -> Result<()> {
        let now = now_millis();
        self.records.update(user_id, move |record| {
            record.snapshot.last_sync_timestamp = now;
        })
    }

    /// The cached character, if any.
    pub fn get_cached_character(&self, user_id: &str) -> Result<Option<CharacterState>> {
        Ok(self.records.load(user_id)?.snapshot.character)
    }

    /// The cached quests (empty if none).
    pub fn get_cached_quests(&self, user_id: &str) -> Result<Vec<QuestState>> {
        Ok(self.records.load(user_id)?.snapshot.quests)
    }

    /// The whole cached snapshot.
    pub fn get_snapshot(&self, user_id: &str) -> Result<CachedSnapshot> {
        Ok(self.records.load(user_id)?.snapshot)
    }

    /// Delete all cached state and the pending-action queue for a user.
    pub fn clear_user_cache(&self, user_id: &str) -> Result<()> {
        self.records.remove(user_id)?;
        log::info!("Cleared offline cache for {}", user_id);
        Ok(())
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
