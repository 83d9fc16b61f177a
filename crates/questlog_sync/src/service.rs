//! Offline sync façade.
//!
//! [`OfflineSync`] is the single entry point the application talks to. It
//! writes through the local cache, decides when a mutation has to be queued,
//! runs sync passes and, once started, reacts to connectivity transitions on
//! its own.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use questlog_sync::{ConnectivityMonitor, InMemoryRemoteStore, MemoryStorage, OfflineSync, SyncConfig};
//!
//! let monitor = Arc::new(ConnectivityMonitor::new(false));
//! let sync = Arc::new(OfflineSync::new(
//!     SyncConfig::default(),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(InMemoryRemoteStore::new()),
//!     Arc::clone(&monitor),
//! ));
//! let _auto = sync.start_auto_sync();
//!
//! sync.sync_character("user-1", character)?;
//! monitor.set_online(true); // the queued update is pushed in the background
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cache::LocalCache;
use crate::config::SyncConfig;
use crate::connectivity::{ConnectivityEvent, ConnectivityMonitor, SubscriptionId};
use crate::engine::{SyncEngine, SyncReport};
use crate::error::Result;
use crate::model::{CachedData, CharacterState, QuestState};
use crate::outbox::{
    ActionPayload, CharacterUpdate, CharacterUpdates, NewAction, Outbox, PendingAction,
    QuestProgress,
};
use crate::record::RecordStore;
use crate::remote::RemoteStore;
use crate::storage::KeyValueStorage;

/// Offline-first access to character and quest state.
pub struct OfflineSync<R: RemoteStore> {
    config: SyncConfig,
    records: Arc<RecordStore>,
    cache: LocalCache,
    outbox: Outbox,
    engine: SyncEngine<R>,
    monitor: Arc<ConnectivityMonitor>,
}

impl<R: RemoteStore> OfflineSync<R> {
    /// Create a façade over `storage`, talking to `remote` and following `monitor`.
    pub fn new(
        config: SyncConfig,
        storage: Arc<dyn KeyValueStorage>,
        remote: Arc<R>,
        monitor: Arc<ConnectivityMonitor>,
    ) -> Self {
        let records = Arc::new(RecordStore::new(storage, config.storage_key_prefix.clone()));
        let engine = SyncEngine::new(remote, Arc::clone(&records), Arc::clone(&monitor), &config);
        Self {
            cache: LocalCache::new(Arc::clone(&records)),
            outbox: Outbox::new(Arc::clone(&records)),
            records,
            engine,
            monitor,
            config,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The connectivity monitor this façade follows.
    pub fn monitor(&self) -> &Arc<ConnectivityMonitor> {
        &self.monitor
    }

    /// The underlying sync engine.
    pub fn engine(&self) -> &SyncEngine<R> {
        &self.engine
    }

    fn should_queue(&self) -> bool {
        self.config.always_queue || !self.monitor.is_online()
    }

    /// Cache a character; queue a `character_update` if it cannot be pushed now.
    ///
    /// The cache write and the queued action are persisted together. Returns
    /// the queued action, if any.
    pub fn sync_character(
        &self,
        user_id: &str,
        character: CharacterState,
    ) -> Result<Option<PendingAction>> {
        let update = self
            .should_queue()
            .then(|| ActionPayload::CharacterUpdate(character_update_for(&character)));
        let now = now_millis();
        let owner = user_id.to_string();

        let queued = self.records.update(user_id, move |record| {
            record.snapshot.character = Some(character);
            record.snapshot.last_sync_timestamp = now;
            update.map(|payload| record.enqueue(owner, payload, now))
        })?;
        if let Some(action) = &queued {
            log::debug!("Queued character_update #{} for {}", action.id, user_id);
        }
        Ok(queued)
    }

    /// Cache a quest list; queue one `quest_progress` per quest if they cannot be pushed now.
    ///
    /// The cache write and every queued action are persisted together.
    /// Returns the queued actions, in quest order.
    pub fn sync_quests(
        &self,
        user_id: &str,
        quests: Vec<QuestState>,
    ) -> Result<Vec<PendingAction>> {
        let payloads: Vec<ActionPayload> = if self.should_queue() {
            quests
                .iter()
                .map(|quest| ActionPayload::QuestProgress(quest_progress_for(quest)))
                .collect()
        } else {
            Vec::new()
        };
        let now = now_millis();
        let owner = user_id.to_string();

        let queued = self.records.update(user_id, move |record| {
            record.snapshot.quests = quests;
            record.snapshot.last_sync_timestamp = now;
            payloads
                .into_iter()
                .map(|payload| record.enqueue(owner.clone(), payload, now))
                .collect::<Vec<_>>()
        })?;
        if !queued.is_empty() {
            log::debug!("Queued {} quest_progress actions for {}", queued.len(), user_id);
        }
        Ok(queued)
    }

    /// Queue an arbitrary mutation.
    ///
    /// While online, the queued action is also broadcast to the user's other
    /// sessions when enabled. A failed broadcast is only logged.
    pub async fn queue_offline_action(&self, action: NewAction) -> Result<PendingAction> {
        let queued = self.outbox.queue_offline_action(action)?;

        if self.config.broadcast_activity && self.monitor.is_online() {
            let broadcast = self
                .engine
                .remote()
                .broadcast_activity(&queued.user_id, &queued);
            match tokio::time::timeout(self.config.remote_timeout(), broadcast).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::warn!("Broadcast of action #{} failed: {}", queued.id, e),
                Err(_) => log::warn!("Broadcast of action #{} timed out", queued.id),
            }
        }
        Ok(queued)
    }

    /// Run a sync pass for `user_id`, then reconcile if the queue drained.
    pub async fn sync_now(&self, user_id: &str) -> SyncReport {
        let report = self.engine.sync_user(user_id).await;
        if report.drained() && self.config.reconcile_after_sync {
            self.engine.reconcile(user_id).await;
        }
        report
    }

    /// The cached character and quests. Unreadable state reads as empty.
    pub fn get_cached_data(&self, user_id: &str) -> CachedData {
        match self.cache.get_snapshot(user_id) {
            Ok(snapshot) => snapshot.into(),
            Err(e) => {
                log::warn!("Cannot read offline cache for {}: {}", user_id, e);
                CachedData::default()
            }
        }
    }

    /// Forget everything stored for `user_id`, including queued actions.
    pub fn clear_user_cache(&self, user_id: &str) -> Result<()> {
        self.cache.clear_user_cache(user_id)
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        self.monitor.is_online()
    }

    /// Number of actions waiting to be synced for `user_id`.
    pub fn pending_action_count(&self, user_id: &str) -> usize {
        self.outbox
            .get_pending_action_count(user_id)
            .unwrap_or_else(|e| {
                log::warn!("Cannot read outbox for {}: {}", user_id, e);
                0
            })
    }

    /// Check if a sync pass is running for `user_id`.
    pub fn sync_in_progress(&self, user_id: &str) -> bool {
        self.engine.is_syncing(user_id)
    }

    /// Users with a record, whether touched in this process or found in storage.
    pub fn tracked_users(&self) -> Vec<String> {
        self.records.known_users().unwrap_or_else(|e| {
            log::warn!("Cannot list offline records: {}", e);
            Vec::new()
        })
    }

    /// React to a connectivity transition.
    ///
    /// Coming online runs one pass for every user with queued actions. Going
    /// offline does nothing.
    pub async fn handle_connectivity_event(
        &self,
        event: ConnectivityEvent,
    ) -> Vec<(String, SyncReport)> {
        if event != ConnectivityEvent::WentOnline {
            return Vec::new();
        }

        let mut reports = Vec::new();
        for user_id in self.tracked_users() {
            if self.pending_action_count(&user_id) == 0 {
                continue;
            }
            log::info!("Back online, syncing {}", user_id);
            let report = self.sync_now(&user_id).await;
            reports.push((user_id, report));
        }
        reports
    }
}

impl<R: RemoteStore + 'static> OfflineSync<R> {
    /// Sync automatically on every reconnect until the handle is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_auto_sync(self: &Arc<Self>) -> AutoSyncHandle {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscription = self.monitor.subscribe(Arc::new(move |event| {
            // Receiver gone means the handle was stopped
            let _ = tx.send(*event);
        }));

        let service = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                service.handle_connectivity_event(event).await;
            }
        });

        AutoSyncHandle {
            monitor: Arc::clone(&self.monitor),
            subscription,
            task,
        }
    }
}

/// Keeps auto-sync running. Dropping it unsubscribes and stops the task.
#[derive(Debug)]
pub struct AutoSyncHandle {
    monitor: Arc<ConnectivityMonitor>,
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

impl AutoSyncHandle {
    /// Stop auto-sync.
    pub fn stop(self) {}
}

impl Drop for AutoSyncHandle {
    fn drop(&mut self) {
        self.monitor.unsubscribe(self.subscription);
        self.task.abort();
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn character_update_for(character: &CharacterState) -> CharacterUpdate {
    CharacterUpdate {
        character_id: character.id.clone(),
        updates: CharacterUpdates {
            level: Some(character.level),
            total_xp: Some(character.total_xp),
            current_xp: Some(character.current_xp),
            updated_at: Some(character.updated_at),
        },
    }
}

fn quest_progress_for(quest: &QuestState) -> QuestProgress {
    QuestProgress {
        quest_id: quest.quest_id.clone(),
        progress: quest.progress.clone(),
        completed: quest.completed,
    }
}
