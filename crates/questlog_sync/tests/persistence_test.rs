//! Offline state survives a restart when kept in `FileStorage`

use std::sync::Arc;

use questlog_sync::{
    ConnectivityMonitor, FileStorage, InMemoryRemoteStore, NewAction, Objective, OfflineSync,
    QuestState, SyncConfig,
};
use tempfile::TempDir;

fn open(
    dir: &TempDir,
    remote: &Arc<InMemoryRemoteStore>,
    online: bool,
) -> OfflineSync<InMemoryRemoteStore> {
    let storage = FileStorage::new(dir.path()).unwrap();
    OfflineSync::new(
        SyncConfig::default(),
        Arc::new(storage),
        Arc::clone(remote),
        Arc::new(ConnectivityMonitor::new(online)),
    )
}

#[tokio::test]
async fn queue_and_cache_survive_reconstruction() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());

    {
        let sync = open(&dir, &remote, false);
        sync.sync_quests(
            "user-1",
            vec![QuestState::new("quest-1", vec![Objective::new("read", 2, 4)])],
        )
        .unwrap();
        sync.queue_offline_action(NewAction::xp_award("user-1", "char-1", 40, "lesson"))
            .await
            .unwrap();
        assert_eq!(sync.pending_action_count("user-1"), 2);
    }

    let sync = open(&dir, &remote, true);
    assert_eq!(sync.tracked_users(), vec!["user-1".to_string()]);
    assert_eq!(sync.pending_action_count("user-1"), 2);
    assert_eq!(sync.get_cached_data("user-1").quests[0].quest_id, "quest-1");

    // New ids continue after the ones already on disk
    let queued = sync
        .queue_offline_action(NewAction::xp_award("user-1", "char-1", 5, "lesson"))
        .await
        .unwrap();
    assert_eq!(queued.id, 3);
}

#[tokio::test]
async fn cleared_user_is_gone_after_restart() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());

    {
        let sync = open(&dir, &remote, false);
        sync.queue_offline_action(NewAction::xp_award("user-1", "char-1", 40, "lesson"))
            .await
            .unwrap();
        sync.clear_user_cache("user-1").unwrap();
    }

    let sync = open(&dir, &remote, true);
    assert!(sync.tracked_users().is_empty());
    assert_eq!(sync.pending_action_count("user-1"), 0);
}

#[test]
fn config_round_trips_through_toml_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config").join("sync.toml");

    let config = SyncConfig {
        max_retries: 5,
        always_queue: true,
        ..SyncConfig::default()
    };
    config.save_to(&path).unwrap();

    assert_eq!(SyncConfig::load_from(&path).unwrap(), config);
    assert_eq!(
        SyncConfig::load_from_or_default(&dir.path().join("missing.toml")),
        SyncConfig::default()
    );
}
