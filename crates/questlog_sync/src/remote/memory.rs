//! In-memory remote store.
//!
//! A reference [`RemoteStore`] that keeps characters, quests and the XP log
//! in memory. It enforces the stat point pool atomically like the hosted
//! backend does, records every call in arrival order, and can be told to fail
//! or stall so retry and timeout paths can be exercised.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{BoxFuture, QuestProgressUpdate, RemoteError, RemoteResult, RemoteStore};
use crate::model::{CharacterState, QuestState, StatMap};
use crate::outbox::{CharacterUpdates, PendingAction};

/// One appended XP log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XpLogEntry {
    /// Character credited
    pub character_id: String,
    /// Amount awarded
    pub xp_amount: i64,
    /// Why it was awarded
    pub source: String,
}

/// A call received by [`InMemoryRemoteStore`], successful or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `insert_xp_log`
    InsertXpLog {
        /// Target character
        character_id: String,
        /// Amount
        xp_amount: i64,
    },
    /// `update_character`
    UpdateCharacter {
        /// Target character
        character_id: String,
        /// Fields sent
        updates: CharacterUpdates,
    },
    /// `update_quest_progress`
    UpdateQuestProgress {
        /// Target quest
        quest_id: String,
    },
    /// `allocate_stat_points`
    AllocateStatPoints {
        /// Target character
        character_id: String,
        /// Deltas sent
        deltas: StatMap,
    },
    /// `fetch_character`
    FetchCharacter {
        /// Target character
        character_id: String,
    },
    /// `fetch_quests`
    FetchQuests {
        /// Owner
        user_id: String,
    },
    /// `broadcast_activity`
    BroadcastActivity {
        /// Owner
        user_id: String,
        /// Id of the broadcast action
        action_id: u64,
    },
}

impl RemoteCall {
    /// Whether this call changes remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RemoteCall::InsertXpLog { .. }
                | RemoteCall::UpdateCharacter { .. }
                | RemoteCall::UpdateQuestProgress { .. }
                | RemoteCall::AllocateStatPoints { .. }
        )
    }
}

#[derive(Debug)]
struct RemoteCharacter {
    state: CharacterState,
    available_points: i64,
}

#[derive(Debug, Default)]
struct RemoteState {
    characters: HashMap<String, RemoteCharacter>,
    /// quest id -> (owner, quest)
    quests: BTreeMap<String, (String, QuestState)>,
    xp_log: Vec<XpLogEntry>,
    calls: Vec<RemoteCall>,
    failures_remaining: usize,
    unreachable: bool,
    latency: Option<Duration>,
}

/// In-memory [`RemoteStore`] for tests and offline demos.
///
/// Clones share the same state.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRemoteStore {
    state: Arc<Mutex<RemoteState>>,
}

impl InMemoryRemoteStore {
    /// Create an empty remote store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a character with a pool of unspent stat points.
    pub fn insert_character(&self, character: CharacterState, available_points: i64) {
        self.lock().characters.insert(
            character.id.clone(),
            RemoteCharacter {
                state: character,
                available_points,
            },
        );
    }

    /// Seed a quest owned by `user_id`.
    pub fn insert_quest(&self, user_id: impl Into<String>, quest: QuestState) {
        self.lock()
            .quests
            .insert(quest.quest_id.clone(), (user_id.into(), quest));
    }

    /// The remote view of a character.
    pub fn character(&self, character_id: &str) -> Option<CharacterState> {
        self.lock()
            .characters
            .get(character_id)
            .map(|c| c.state.clone())
    }

    /// Unspent stat points of a character.
    pub fn available_points(&self, character_id: &str) -> Option<i64> {
        self.lock()
            .characters
            .get(character_id)
            .map(|c| c.available_points)
    }

    /// The remote view of a quest.
    pub fn quest(&self, quest_id: &str) -> Option<QuestState> {
        self.lock().quests.get(quest_id).map(|(_, q)| q.clone())
    }

    /// Every XP log row in insertion order.
    pub fn xp_log(&self) -> Vec<XpLogEntry> {
        self.lock().xp_log.clone()
    }

    /// Sum of logged XP for a character.
    pub fn logged_xp(&self, character_id: &str) -> i64 {
        self.lock()
            .xp_log
            .iter()
            .filter(|e| e.character_id == character_id)
            .map(|e| e.xp_amount)
            .sum()
    }

    /// Every call received so far, in arrival order.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Only the calls that change remote state.
    pub fn mutation_calls(&self) -> Vec<RemoteCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Fail the next `count` calls with a transport error.
    pub fn fail_next(&self, count: usize) {
        self.lock().failures_remaining = count;
    }

    /// Fail every call with a transport error until switched back.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Record the call, then apply latency and injected failures.
    async fn admit(&self, call: RemoteCall) -> RemoteResult<()> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(call);
            state.latency
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.unreachable {
            return Err(RemoteError::Transport("remote unreachable".to_string()));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(RemoteError::Transport("injected failure".to_string()));
        }
        Ok(())
    }
}

impl RemoteStore for InMemoryRemoteStore {
    fn insert_xp_log<'a>(
        &'a self,
        character_id: &'a str,
        xp_amount: i64,
        source: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.admit(RemoteCall::InsertXpLog {
                character_id: character_id.to_string(),
                xp_amount,
            })
            .await?;

            self.lock().xp_log.push(XpLogEntry {
                character_id: character_id.to_string(),
                xp_amount,
                source: source.to_string(),
            });
            Ok(())
        })
    }

    fn update_character<'a>(
        &'a self,
        character_id: &'a str,
        updates: &'a CharacterUpdates,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.admit(RemoteCall::UpdateCharacter {
                character_id: character_id.to_string(),
                updates: updates.clone(),
            })
            .await?;

            let mut state = self.lock();
            let character = state
                .characters
                .get_mut(character_id)
                .ok_or_else(|| RemoteError::NotFound(format!("character {}", character_id)))?;
            let target = &mut character.state;
            if let Some(level) = updates.level {
                target.level = level;
            }
            if let Some(total_xp) = updates.total_xp {
                target.total_xp = total_xp;
            }
            if let Some(current_xp) = updates.current_xp {
                target.current_xp = current_xp;
            }
            if let Some(updated_at) = updates.updated_at {
                target.updated_at = updated_at;
            }
            Ok(())
        })
    }

    fn update_quest_progress<'a>(
        &'a self,
        quest_id: &'a str,
        update: &'a QuestProgressUpdate,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.admit(RemoteCall::UpdateQuestProgress {
                quest_id: quest_id.to_string(),
            })
            .await?;

            let mut state = self.lock();
            let (_, quest) = state
                .quests
                .get_mut(quest_id)
                .ok_or_else(|| RemoteError::NotFound(format!("quest {}", quest_id)))?;
            quest.progress = update.progress.clone();
            quest.completed = update.completed;
            Ok(())
        })
    }

    fn allocate_stat_points<'a>(
        &'a self,
        character_id: &'a str,
        deltas: &'a StatMap,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.admit(RemoteCall::AllocateStatPoints {
                character_id: character_id.to_string(),
                deltas: deltas.clone(),
            })
            .await?;

            // Check and decrement under one lock
            let mut state = self.lock();
            let character = state
                .characters
                .get_mut(character_id)
                .ok_or_else(|| RemoteError::NotFound(format!("character {}", character_id)))?;

            if let Some((stat, delta)) = deltas.iter().find(|(_, d)| **d < 0) {
                return Err(RemoteError::Rejected(format!(
                    "negative allocation {} for {}",
                    delta, stat
                )));
            }

            let requested: i64 = deltas.values().sum();
            if requested > character.available_points {
                return Err(RemoteError::Rejected(format!(
                    "insufficient stat points: requested {}, available {}",
                    requested, character.available_points
                )));
            }

            character.available_points -= requested;
            for (stat, delta) in deltas.iter().filter(|(_, d)| **d != 0) {
                *character.state.stats.entry(stat.clone()).or_insert(0) += delta;
            }
            Ok(())
        })
    }

    fn fetch_character<'a>(
        &'a self,
        character_id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Option<CharacterState>>> {
        Box::pin(async move {
            self.admit(RemoteCall::FetchCharacter {
                character_id: character_id.to_string(),
            })
            .await?;
            Ok(self.character(character_id))
        })
    }

    fn fetch_quests<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, RemoteResult<Vec<QuestState>>> {
        Box::pin(async move {
            self.admit(RemoteCall::FetchQuests {
                user_id: user_id.to_string(),
            })
            .await?;
            Ok(self
                .lock()
                .quests
                .values()
                .filter(|(owner, _)| owner == user_id)
                .map(|(_, quest)| quest.clone())
                .collect())
        })
    }

    fn broadcast_activity<'a>(
        &'a self,
        user_id: &'a str,
        action: &'a PendingAction,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            self.admit(RemoteCall::BroadcastActivity {
                user_id: user_id.to_string(),
                action_id: action.id,
            })
            .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Objective;

    fn hero() -> CharacterState {
        CharacterState {
            id: "hero".into(),
            level: 2,
            total_xp: 150,
            current_xp: 50,
            stats: StatMap::new(),
            updated_at: 0,
        }
    }

    fn deltas(pairs: &[(&str, i64)]) -> StatMap {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[tokio::test]
    async fn test_xp_log_is_append_only() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_xp_log("hero", 10, "quiz").await.unwrap();
        remote.insert_xp_log("hero", 10, "quiz").await.unwrap();

        assert_eq!(remote.xp_log().len(), 2);
        assert_eq!(remote.logged_xp("hero"), 20);
    }

    #[tokio::test]
    async fn test_partial_character_update() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_character(hero(), 0);

        let updates = CharacterUpdates {
            total_xp: Some(400),
            ..Default::default()
        };
        remote.update_character("hero", &updates).await.unwrap();

        let character = remote.character("hero").unwrap();
        assert_eq!(character.total_xp, 400);
        assert_eq!(character.level, 2);
        assert_eq!(character.current_xp, 50);

        let err = remote.update_character("ghost", &updates).await.unwrap_err();
        assert!(matches!(err, RemoteError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat_allocation_enforces_pool() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_character(hero(), 3);

        remote
            .allocate_stat_points("hero", &deltas(&[("strength", 2), ("wisdom", 0)]))
            .await
            .unwrap();
        assert_eq!(remote.available_points("hero"), Some(1));
        assert_eq!(remote.character("hero").unwrap().stats.get("strength"), Some(&2));
        assert!(!remote.character("hero").unwrap().stats.contains_key("wisdom"));

        let err = remote
            .allocate_stat_points("hero", &deltas(&[("strength", 1), ("agility", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));
        // Rejected allocations change nothing
        assert_eq!(remote.available_points("hero"), Some(1));
        assert!(!remote.character("hero").unwrap().stats.contains_key("agility"));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let remote = InMemoryRemoteStore::new();
        remote.fail_next(1);
        assert!(remote.insert_xp_log("hero", 1, "quiz").await.is_err());
        assert!(remote.insert_xp_log("hero", 1, "quiz").await.is_ok());

        remote.set_unreachable(true);
        assert!(matches!(
            remote.fetch_quests("u1").await,
            Err(RemoteError::Transport(_))
        ));
        assert_eq!(remote.calls().len(), 3);
        assert_eq!(remote.mutation_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_quests_by_owner() {
        let remote = InMemoryRemoteStore::new();
        remote.insert_quest("u1", QuestState::new("q1", vec![Objective::new("o", 1, 2)]));
        remote.insert_quest("u2", QuestState::new("q2", vec![]));

        let quests = remote.fetch_quests("u1").await.unwrap();
        assert_eq!(quests.len(), 1);
        assert_eq!(quests[0].quest_id, "q1");
    }
}
