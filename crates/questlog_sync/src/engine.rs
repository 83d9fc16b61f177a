//! Sync engine.
//!
//! The SyncEngine drains a user's pending-action outbox against the remote
//! store, one action at a time in enqueue order, and reconciles the local
//! cache with the remote view once the queue is empty.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::conflict::{Resolution, resolve_character_with_source, resolve_quests};
use crate::connectivity::ConnectivityMonitor;
use crate::error::{Result, SyncError};
use crate::model::StatMap;
use crate::outbox::{ActionPayload, Outbox, PendingAction};
use crate::record::{RecordStore, UserSlot};
use crate::remote::{QuestProgressUpdate, RemoteStore};

/// Stats every allocation is expanded to; unspecified ones are sent as zero.
pub const ALLOCATABLE_STATS: [&str; 6] = [
    "strength",
    "intelligence",
    "wisdom",
    "charisma",
    "agility",
    "endurance",
];

/// Outcome of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// The pass ran over the whole queue
    Completed,
    /// Nothing was done because the client is offline
    SkippedOffline,
    /// Nothing was done because a pass for this user is already running
    SkippedInProgress,
    /// The queue could not be read
    Aborted,
}

/// Summary of one sync pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    /// How the pass ended
    pub status: SyncStatus,
    /// Actions confirmed by the remote and removed
    pub applied: usize,
    /// Actions that failed and stay queued for a later pass
    pub retried: usize,
    /// Actions removed after exceeding the retry ceiling
    pub dropped: usize,
    /// Actions still queued when the pass ended
    pub remaining: usize,
}

impl SyncReport {
    fn with_status(status: SyncStatus) -> Self {
        Self {
            status,
            applied: 0,
            retried: 0,
            dropped: 0,
            remaining: 0,
        }
    }

    /// Check whether the pass actually ran
    pub fn ran(&self) -> bool {
        self.status == SyncStatus::Completed
    }

    /// Check whether the queue is empty after the pass
    pub fn drained(&self) -> bool {
        self.ran() && self.remaining == 0
    }
}

/// Outcome of reconciling the cache with the remote view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Character resolution, if both sides had one
    pub character: Option<Resolution>,
    /// Whether the cached quest list was rewritten
    pub quests_updated: bool,
    /// Set when reconcile did not run (offline or actions still queued)
    pub skipped: bool,
}

/// Marks a user as syncing for as long as it is alive.
struct PassGuard {
    slot: Arc<UserSlot>,
}

impl PassGuard {
    fn acquire(slot: Arc<UserSlot>) -> Option<Self> {
        slot.syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        Some(Self { slot })
    }
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.slot.syncing.store(false, Ordering::SeqCst);
    }
}

/// The sync engine drains outboxes and reconciles caches.
pub struct SyncEngine<R: RemoteStore> {
    remote: Arc<R>,
    records: Arc<RecordStore>,
    outbox: Outbox,
    monitor: Arc<ConnectivityMonitor>,
    max_retries: u32,
    remote_timeout: Duration,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Create a sync engine over shared records.
    pub fn new(
        remote: Arc<R>,
        records: Arc<RecordStore>,
        monitor: Arc<ConnectivityMonitor>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            remote,
            outbox: Outbox::new(Arc::clone(&records)),
            records,
            monitor,
            max_retries: config.max_retries,
            remote_timeout: config.remote_timeout(),
        }
    }

    /// The remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Check if a pass is running for `user_id`.
    pub fn is_syncing(&self, user_id: &str) -> bool {
        self.records
            .slot(user_id)
            .map(|slot| slot.is_syncing())
            .unwrap_or(false)
    }

    /// Run one sync pass over a user's queue.
    ///
    /// Never fails: every remote failure becomes a retry (or a drop once the
    /// retry ceiling is exceeded) and is reflected in the report.
    pub async fn sync_user(&self, user_id: &str) -> SyncReport {
        if !self.monitor.is_online() {
            log::debug!("Skipping sync for {}: offline", user_id);
            return SyncReport::with_status(SyncStatus::SkippedOffline);
        }

        let slot = match self.records.slot(user_id) {
            Ok(slot) => slot,
            Err(e) => {
                log::warn!("Cannot sync {}: {}", user_id, e);
                return SyncReport::with_status(SyncStatus::Aborted);
            }
        };
        let Some(_pass) = PassGuard::acquire(slot) else {
            log::debug!("Skipping sync for {}: pass already in progress", user_id);
            return SyncReport::with_status(SyncStatus::SkippedInProgress);
        };

        let actions = match self.outbox.pending_actions(user_id) {
            Ok(actions) => actions,
            Err(e) => {
                log::warn!("Cannot read outbox for {}: {}", user_id, e);
                return SyncReport::with_status(SyncStatus::Aborted);
            }
        };

        let mut report = SyncReport::with_status(SyncStatus::Completed);
        for action in &actions {
            match self.dispatch(action).await {
                Ok(()) => {
                    log::debug!("Applied {} action #{}", action.action.kind(), action.id);
                    self.forget(user_id, action.id);
                    report.applied += 1;
                }
                Err(e) => {
                    if self.record_failure(user_id, action, &e) {
                        report.dropped += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }

        report.remaining = match self.outbox.get_pending_action_count(user_id) {
            Ok(count) => count,
            Err(e) => {
                log::warn!("Cannot count outbox for {}: {}", user_id, e);
                actions.len() - report.applied - report.dropped
            }
        };

        if !actions.is_empty() {
            log::info!(
                "Sync pass for {}: {} applied, {} retried, {} dropped, {} remaining",
                user_id,
                report.applied,
                report.retried,
                report.dropped,
                report.remaining
            );
        }
        report
    }

    /// Count a failed attempt. Returns `true` if the action was dropped.
    fn record_failure(&self, user_id: &str, action: &PendingAction, error: &SyncError) -> bool {
        let retries = match self.outbox.increment_retry(user_id, action.id) {
            Ok(Some(retries)) => retries,
            // Removed meanwhile (e.g. the cache was cleared)
            Ok(None) => return false,
            Err(e) => {
                log::warn!("Cannot record retry for action #{}: {}", action.id, e);
                return false;
            }
        };

        if retries > self.max_retries {
            log::warn!(
                "Dropping {} action #{} for {} after {} failed attempts: {}",
                action.action.kind(),
                action.id,
                user_id,
                retries,
                error
            );
            self.forget(user_id, action.id);
            true
        } else {
            log::debug!(
                "{} action #{} failed (attempt {}): {}",
                action.action.kind(),
                action.id,
                retries,
                error
            );
            false
        }
    }

    fn forget(&self, user_id: &str, action_id: u64) {
        if let Err(e) = self.outbox.remove_action(user_id, action_id) {
            log::warn!("Cannot remove action #{}: {}", action_id, e);
        }
    }

    /// Send one action to the remote, bounded by the configured timeout.
    async fn dispatch(&self, action: &PendingAction) -> Result<()> {
        match &action.action {
            ActionPayload::XpAward(award) => {
                self.with_timeout(self.remote.insert_xp_log(
                    &award.character_id,
                    award.xp_amount,
                    &award.source,
                ))
                .await
            }
            ActionPayload::CharacterUpdate(update) => {
                self.with_timeout(
                    self.remote
                        .update_character(&update.character_id, &update.updates),
                )
                .await
            }
            ActionPayload::QuestProgress(progress) => {
                let update = QuestProgressUpdate {
                    progress: progress.progress.clone(),
                    completed: progress.completed,
                };
                self.with_timeout(self.remote.update_quest_progress(&progress.quest_id, &update))
                    .await
            }
            ActionPayload::StatAllocation(allocation) => {
                let deltas = expand_stat_deltas(&allocation.stat_allocations);
                self.with_timeout(
                    self.remote
                        .allocate_stat_points(&allocation.character_id, &deltas),
                )
                .await
            }
        }
    }

    async fn with_timeout<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, crate::remote::RemoteError>>,
    {
        match tokio::time::timeout(self.remote_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(SyncError::Timeout {
                millis: self.remote_timeout.as_millis() as u64,
            }),
        }
    }

    /// Merge the remote view of a user's character and quests into the cache.
    ///
    /// Only runs while online with an empty queue, so queued local changes are
    /// never merged against a remote that has not seen them yet. The merge is
    /// applied to the record as it is after the fetches complete; if an action
    /// was queued meanwhile the cache is left alone. Fetch failures leave the
    /// matching part of the cache untouched.
    pub async fn reconcile(&self, user_id: &str) -> ReconcileOutcome {
        let skipped = ReconcileOutcome {
            skipped: true,
            ..ReconcileOutcome::default()
        };
        if !self.monitor.is_online() {
            return skipped;
        }

        let character_id = match self.records.load(user_id) {
            Ok(record) if record.pending_actions.is_empty() => {
                record.snapshot.character.map(|c| c.id)
            }
            Ok(_) => return skipped,
            Err(e) => {
                log::warn!("Cannot reconcile {}: {}", user_id, e);
                return skipped;
            }
        };

        let remote_character = match &character_id {
            Some(id) => match self.with_timeout(self.remote.fetch_character(id)).await {
                Ok(character) => character,
                Err(e) => {
                    log::warn!("Cannot fetch character {}: {}", id, e);
                    None
                }
            },
            None => None,
        };
        let remote_quests = match self.with_timeout(self.remote.fetch_quests(user_id)).await {
            Ok(quests) => Some(quests),
            Err(e) => {
                log::warn!("Cannot fetch quests for {}: {}", user_id, e);
                None
            }
        };

        let now = chrono::Utc::now().timestamp_millis();
        let merged = self.records.update(user_id, |record| {
            if !record.pending_actions.is_empty() {
                return ReconcileOutcome {
                    skipped: true,
                    ..ReconcileOutcome::default()
                };
            }
            let mut outcome = ReconcileOutcome::default();
            let snapshot = &mut record.snapshot;

            let resolved = match (&snapshot.character, &remote_character) {
                (Some(local), Some(remote)) if local.id == remote.id => {
                    let (merged, resolution) = resolve_character_with_source(local, remote);
                    if resolution.changes_local() {
                        log::info!(
                            "Remote character {} is ahead ({} XP vs {} XP), updating cache",
                            merged.id,
                            remote.total_xp,
                            local.total_xp
                        );
                    }
                    Some((merged, resolution))
                }
                _ => None,
            };
            if let Some((merged, resolution)) = resolved {
                if resolution.changes_local() {
                    snapshot.character = Some(merged);
                }
                outcome.character = Some(resolution);
            }

            if let Some(remote) = &remote_quests {
                let merged = resolve_quests(&snapshot.quests, remote);
                if merged != snapshot.quests {
                    snapshot.quests = merged;
                    outcome.quests_updated = true;
                }
            }

            snapshot.last_sync_timestamp = now;
            outcome
        });

        merged.unwrap_or_else(|e| {
            log::warn!("Cannot update offline cache for {}: {}", user_id, e);
            skipped
        })
    }
}

/// Expand an allocation to every allocatable stat, defaulting missing ones to zero.
pub fn expand_stat_deltas(allocations: &StatMap) -> StatMap {
    let mut deltas: StatMap = ALLOCATABLE_STATS
        .iter()
        .map(|stat| (stat.to_string(), 0))
        .collect();
    for (stat, delta) in allocations {
        deltas.insert(stat.clone(), *delta);
    }
    deltas
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LocalCache;
    use crate::model::{CharacterState, Objective, QuestState};
    use crate::outbox::{CharacterUpdate, CharacterUpdates, NewAction};
    use crate::remote::{InMemoryRemoteStore, RemoteCall};
    use crate::storage::MemoryStorage;

    struct Harness {
        engine: SyncEngine<InMemoryRemoteStore>,
        remote: Arc<InMemoryRemoteStore>,
        monitor: Arc<ConnectivityMonitor>,
        outbox: Outbox,
        cache: LocalCache,
    }

    fn harness(config: SyncConfig) -> Harness {
        let records = Arc::new(RecordStore::new(
            Arc::new(MemoryStorage::new()),
            config.storage_key_prefix.clone(),
        ));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let monitor = Arc::new(ConnectivityMonitor::new(true));
        Harness {
            engine: SyncEngine::new(
                Arc::clone(&remote),
                Arc::clone(&records),
                Arc::clone(&monitor),
                &config,
            ),
            remote,
            monitor,
            outbox: Outbox::new(Arc::clone(&records)),
            cache: LocalCache::new(records),
        }
    }

    fn hero(total_xp: i64) -> CharacterState {
        CharacterState {
            id: "hero".into(),
            level: 2,
            total_xp,
            current_xp: total_xp - 100,
            stats: StatMap::new(),
            updated_at: 1,
        }
    }

    #[test]
    fn test_expand_stat_deltas_defaults_to_zero() {
        let deltas = expand_stat_deltas(&[("wisdom".to_string(), 2)].into_iter().collect());
        assert_eq!(deltas.len(), ALLOCATABLE_STATS.len());
        assert_eq!(deltas["wisdom"], 2);
        assert_eq!(deltas["strength"], 0);

        let deltas = expand_stat_deltas(&[("luck".to_string(), 1)].into_iter().collect());
        assert_eq!(deltas["luck"], 1);
    }

    #[tokio::test]
    async fn test_offline_pass_is_noop() {
        let h = harness(SyncConfig::default());
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 10, "quiz"))
            .unwrap();
        h.monitor.set_online(false);

        let report = h.engine.sync_user("u1").await;
        assert_eq!(report.status, SyncStatus::SkippedOffline);
        assert!(h.remote.calls().is_empty());
        assert_eq!(h.outbox.get_pending_action_count("u1").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_maps_each_action_type() {
        let h = harness(SyncConfig::default());
        h.remote.insert_character(hero(150), 5);
        h.remote
            .insert_quest("u1", QuestState::new("q1", vec![Objective::new("o1", 0, 3)]));

        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 25, "quiz"))
            .unwrap();
        h.outbox
            .queue_offline_action(NewAction::new(
                "u1",
                ActionPayload::CharacterUpdate(CharacterUpdate {
                    character_id: "hero".into(),
                    updates: CharacterUpdates {
                        total_xp: Some(175),
                        ..Default::default()
                    },
                }),
            ))
            .unwrap();
        h.outbox
            .queue_offline_action(NewAction::new(
                "u1",
                ActionPayload::QuestProgress(crate::outbox::QuestProgress {
                    quest_id: "q1".into(),
                    progress: vec![Objective::new("o1", 2, 3)],
                    completed: false,
                }),
            ))
            .unwrap();
        h.outbox
            .queue_offline_action(NewAction::stat_allocation(
                "u1",
                "hero",
                [("strength".to_string(), 2)].into_iter().collect(),
            ))
            .unwrap();

        let report = h.engine.sync_user("u1").await;
        assert_eq!(report.applied, 4);
        assert!(report.drained());

        assert_eq!(h.remote.logged_xp("hero"), 25);
        assert_eq!(h.remote.character("hero").unwrap().total_xp, 175);
        assert_eq!(
            h.remote.quest("q1").unwrap().objective("o1").unwrap().current_value,
            2
        );
        assert_eq!(h.remote.available_points("hero"), Some(3));

        let sent_deltas = h.remote.calls().into_iter().find_map(|c| match c {
            RemoteCall::AllocateStatPoints { deltas, .. } => Some(deltas),
            _ => None,
        });
        assert_eq!(sent_deltas.unwrap().len(), ALLOCATABLE_STATS.len());
    }

    #[tokio::test]
    async fn test_failure_keeps_action_until_ceiling() {
        let h = harness(SyncConfig::default());
        h.remote.set_unreachable(true);
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 10, "quiz"))
            .unwrap();

        for attempt in 1..=3u32 {
            let report = h.engine.sync_user("u1").await;
            assert_eq!(report.retried, 1);
            assert_eq!(report.remaining, 1);
            assert_eq!(h.outbox.pending_actions("u1").unwrap()[0].retry_count, attempt);
        }

        let report = h.engine.sync_user("u1").await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(h.outbox.get_pending_action_count("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejection_counts_as_retry() {
        let h = harness(SyncConfig::default());
        h.remote.insert_character(hero(150), 1);
        h.outbox
            .queue_offline_action(NewAction::stat_allocation(
                "u1",
                "hero",
                [("strength".to_string(), 5)].into_iter().collect(),
            ))
            .unwrap();

        let report = h.engine.sync_user("u1").await;
        assert_eq!(report.retried, 1);
        assert_eq!(report.remaining, 1);
        assert_eq!(h.remote.available_points("hero"), Some(1));
    }

    #[tokio::test]
    async fn test_failed_action_does_not_block_later_ones() {
        let h = harness(SyncConfig::default());
        h.remote.fail_next(1);
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 1, "quiz"))
            .unwrap();
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 2, "quiz"))
            .unwrap();

        let report = h.engine.sync_user("u1").await;
        assert_eq!((report.applied, report.retried), (1, 1));
        assert_eq!(h.remote.logged_xp("hero"), 2);

        let report = h.engine.sync_user("u1").await;
        assert!(report.drained());
        assert_eq!(h.remote.logged_xp("hero"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let h = harness(SyncConfig {
            remote_timeout_ms: 50,
            ..SyncConfig::default()
        });
        h.remote.set_latency(Some(Duration::from_secs(5)));
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 10, "quiz"))
            .unwrap();

        let report = h.engine.sync_user("u1").await;
        assert_eq!(report.retried, 1);
        assert!(h.remote.xp_log().is_empty());
        assert_eq!(h.outbox.pending_actions("u1").unwrap()[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_pass_is_skipped() {
        let h = harness(SyncConfig::default());
        h.remote.set_latency(Some(Duration::from_millis(100)));
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 10, "quiz"))
            .unwrap();

        let (first, second) = tokio::join!(h.engine.sync_user("u1"), async {
            tokio::task::yield_now().await;
            assert!(h.engine.is_syncing("u1"));
            h.engine.sync_user("u1").await
        });

        assert_eq!(first.applied, 1);
        assert_eq!(second.status, SyncStatus::SkippedInProgress);
        assert_eq!(h.remote.xp_log().len(), 1);
        assert!(!h.engine.is_syncing("u1"));
    }

    #[tokio::test]
    async fn test_reconcile_adopts_remote_ahead() {
        let h = harness(SyncConfig::default());
        h.cache.cache_character("u1", hero(200)).unwrap();
        h.remote.insert_character(hero(900), 0);
        h.cache
            .cache_quests("u1", vec![QuestState::new("q1", vec![Objective::new("o1", 3, 5)])])
            .unwrap();
        h.remote
            .insert_quest("u1", QuestState::new("q1", vec![Objective::new("o1", 5, 5)]));

        let outcome = h.engine.reconcile("u1").await;
        assert_eq!(outcome.character, Some(Resolution::KeepRemote));
        assert!(outcome.quests_updated);

        assert_eq!(h.cache.get_cached_character("u1").unwrap().unwrap().total_xp, 900);
        assert!(h.cache.get_cached_quests("u1").unwrap()[0].completed);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_local_ahead() {
        let h = harness(SyncConfig::default());
        h.cache.cache_character("u1", hero(900)).unwrap();
        h.remote.insert_character(hero(200), 0);

        let outcome = h.engine.reconcile("u1").await;
        assert_eq!(outcome.character, Some(Resolution::KeepLocal));
        assert!(!outcome.quests_updated);
        assert_eq!(h.cache.get_cached_character("u1").unwrap().unwrap().total_xp, 900);
    }

    #[tokio::test]
    async fn test_reconcile_skipped_with_pending_actions() {
        let h = harness(SyncConfig::default());
        h.cache.cache_character("u1", hero(200)).unwrap();
        h.outbox
            .queue_offline_action(NewAction::xp_award("u1", "hero", 10, "quiz"))
            .unwrap();

        let outcome = h.engine.reconcile("u1").await;
        assert!(outcome.skipped);
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_fetch_failure_leaves_cache() {
        let h = harness(SyncConfig::default());
        h.cache.cache_character("u1", hero(200)).unwrap();
        h.remote.insert_character(hero(900), 0);
        h.remote.set_unreachable(true);

        let outcome = h.engine.reconcile("u1").await;
        assert!(!outcome.skipped);
        assert_eq!(outcome.character, None);
        assert_eq!(h.cache.get_cached_character("u1").unwrap().unwrap().total_xp, 200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_merges_against_cache_written_during_fetch() {
        let h = harness(SyncConfig::default());
        h.cache.cache_character("u1", hero(200)).unwrap();
        h.remote.insert_character(hero(250), 0);
        h.remote.set_latency(Some(Duration::from_millis(100)));

        let (outcome, ()) = tokio::join!(h.engine.reconcile("u1"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.cache.cache_character("u1", hero(300)).unwrap();
        });

        assert_eq!(outcome.character, Some(Resolution::KeepLocal));
        assert_eq!(h.cache.get_cached_character("u1").unwrap().unwrap().total_xp, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_skips_write_when_action_queued_during_fetch() {
        let h = harness(SyncConfig::default());
        h.cache.cache_character("u1", hero(200)).unwrap();
        h.remote.insert_character(hero(900), 0);
        h.remote.set_latency(Some(Duration::from_millis(100)));

        let (outcome, ()) = tokio::join!(h.engine.reconcile("u1"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.outbox
                .queue_offline_action(NewAction::xp_award("u1", "hero", 10, "quiz"))
                .unwrap();
        });

        assert!(outcome.skipped);
        assert_eq!(h.cache.get_cached_character("u1").unwrap().unwrap().total_xp, 200);
        assert_eq!(h.outbox.get_pending_action_count("u1").unwrap(), 1);
    }
}
