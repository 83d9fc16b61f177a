//! The combined per-user record.
//!
//! A user's cached snapshot and pending-action queue live in one
//! [`UserRecord`], serialized as a single JSON value under
//! `key_prefix + user_id`. Every mutation goes through
//! [`RecordStore::update`], a read-modify-write of the whole record under the
//! user's lock, so a cache write can never drop a concurrently queued action.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::model::CachedSnapshot;
use crate::outbox::{ActionPayload, PendingAction};
use crate::storage::KeyValueStorage;

/// Everything stored for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Last known character and quest state
    #[serde(default)]
    pub snapshot: CachedSnapshot,

    /// Actions not yet confirmed by the remote store, oldest first
    #[serde(default)]
    pub pending_actions: Vec<PendingAction>,

    /// Id handed to the next queued action
    #[serde(default = "first_action_id")]
    pub next_action_id: u64,
}

fn first_action_id() -> u64 {
    1
}

impl UserRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self {
            next_action_id: first_action_id(),
            ..Self::default()
        }
    }

    /// Load a record from its JSON form.
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let mut record: Self = serde_json::from_str(json)?;
        // Never hand out an id that is already queued
        let max_queued = record.pending_actions.iter().map(|a| a.id).max();
        if let Some(max_id) = max_queued
            && record.next_action_id <= max_id
        {
            record.next_action_id = max_id + 1;
        }
        Ok(record)
    }

    /// Serialize the record to JSON.
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Append an action to the queue.
    pub fn enqueue(&mut self, user_id: String, action: ActionPayload, timestamp: i64) -> PendingAction {
        let id = self.next_action_id.max(first_action_id());
        self.next_action_id = id + 1;
        let pending = PendingAction {
            id,
            action,
            user_id,
            timestamp,
            retry_count: 0,
        };
        self.pending_actions.push(pending.clone());
        pending
    }

    /// Remove a queued action by id.
    pub fn remove_action(&mut self, id: u64) -> Option<PendingAction> {
        let index = self.pending_actions.iter().position(|a| a.id == id)?;
        Some(self.pending_actions.remove(index))
    }

    /// Increment a queued action's retry count, returning the new count.
    pub fn increment_retry(&mut self, id: u64) -> Option<u32> {
        let action = self.pending_actions.iter_mut().find(|a| a.id == id)?;
        action.retry_count += 1;
        Some(action.retry_count)
    }
}

/// Per-user coordination state, shared by the cache, the outbox and the engine.
#[derive(Debug, Default)]
pub(crate) struct UserSlot {
    /// Serializes read-modify-write cycles of the user's record
    lock: Mutex<()>,
    /// Set while a sync pass runs for this user
    pub(crate) syncing: AtomicBool,
}

impl UserSlot {
    pub(crate) fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }
}

/// Loads and saves [`UserRecord`]s in a [`KeyValueStorage`].
pub struct RecordStore {
    storage: Arc<dyn KeyValueStorage>,
    key_prefix: String,
    slots: RwLock<HashMap<String, Arc<UserSlot>>>,
}

impl RecordStore {
    /// Create a record store keyed by `key_prefix + user_id`.
    pub fn new(storage: Arc<dyn KeyValueStorage>, key_prefix: impl Into<String>) -> Self {
        Self {
            storage,
            key_prefix: key_prefix.into(),
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Storage key for a user.
    pub fn key_for(&self, user_id: &str) -> String {
        format!("{}{}", self.key_prefix, user_id)
    }

    pub(crate) fn slot(&self, user_id: &str) -> Result<Arc<UserSlot>> {
        if user_id.trim().is_empty() {
            return Err(SyncError::InvalidUserId(user_id.to_string()));
        }

        if let Some(slot) = self
            .slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
        {
            return Ok(Arc::clone(slot));
        }

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        Ok(Arc::clone(slots.entry(user_id.to_string()).or_default()))
    }

    /// Load a user's record. Missing or unparsable records load as empty.
    pub fn load(&self, user_id: &str) -> Result<UserRecord> {
        let slot = self.slot(user_id)?;
        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read(user_id)
    }

    /// Atomically read, modify and persist a user's record.
    ///
    /// `f` must not block; it runs while the user's lock is held.
    pub fn update<T>(&self, user_id: &str, f: impl FnOnce(&mut UserRecord) -> T) -> Result<T> {
        let slot = self.slot(user_id)?;
        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.read(user_id)?;
        let output = f(&mut record);
        self.write(user_id, &record)?;
        Ok(output)
    }

    /// Delete a user's record entirely.
    pub fn remove(&self, user_id: &str) -> Result<()> {
        let slot = self.slot(user_id)?;
        let _guard = slot.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.remove(&self.key_for(user_id))
    }

    /// Users seen by this store, either touched in this process or found in storage.
    pub fn known_users(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self
            .storage
            .keys_with_prefix(&self.key_prefix)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&self.key_prefix).map(str::to_string))
            .collect();

        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        for user_id in slots.keys() {
            if !users.contains(user_id) {
                users.push(user_id.clone());
            }
        }
        users.sort();
        Ok(users)
    }

    fn read(&self, user_id: &str) -> Result<UserRecord> {
        let key = self.key_for(user_id);
        let Some(raw) = self.storage.get(&key)? else {
            return Ok(UserRecord::new());
        };

        match UserRecord::from_json(&raw) {
            Ok(record) => Ok(record),
            Err(e) => {
                log::warn!("Discarding unreadable offline record '{}': {}", key, e);
                Ok(UserRecord::new())
            }
        }
    }

    fn write(&self, user_id: &str, record: &UserRecord) -> Result<()> {
        let json = record.to_json()?;
        self.storage.set(&self.key_for(user_id), &json)
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("RecordStore")
            .field("key_prefix", &self.key_prefix)
            .field("user_count", &slots.len())
            .finish()
    }
}
