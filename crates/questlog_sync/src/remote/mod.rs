//! Remote store interface.
//!
//! The authoritative store (a hosted database behind its client SDK) is only
//! reached through [`RemoteStore`]. The sync engine needs the four mutation
//! operations; the fetch operations feed the post-sync reconcile step.
//!
//! ## Object safety
//!
//! `RemoteStore` is object-safe so it can be used behind `dyn RemoteStore`.
//! To enable this, all methods return boxed futures.

mod memory;

pub use memory::{InMemoryRemoteStore, RemoteCall, XpLogEntry};

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ts_rs::TS;

use crate::model::{CharacterState, Objective, QuestState, StatMap};
use crate::outbox::{CharacterUpdates, PendingAction};

/// A boxed future for object-safe async methods.
///
/// On native targets, futures are `Send` for compatibility with multi-threaded runtimes.
#[cfg(not(target_arch = "wasm32"))]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed future for object-safe async methods.
///
/// WASM version without `Send` requirement - JavaScript is single-threaded.
#[cfg(target_arch = "wasm32")]
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Why a remote call failed.
///
/// The sync engine treats every variant the same way (one more failed
/// attempt); the distinction is kept for logging and for callers that talk
/// to the remote directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote could not be reached or the connection failed mid-call
    #[error("transport failure: {0}")]
    Transport(String),

    /// The remote refused the change (e.g. not enough stat points)
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// The session is not allowed to perform the call
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The target record does not exist remotely
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type for remote calls.
pub type RemoteResult<T> = Result<T, RemoteError>;

/// Partial update of a remote quest-progress record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "camelCase")]
pub struct QuestProgressUpdate {
    /// New objective progress
    pub progress: Vec<Objective>,
    /// New quest-level completion
    pub completed: bool,
}

/// The authoritative store as seen by the sync layer.
pub trait RemoteStore: Send + Sync {
    /// Append an XP log entry (an insert, never an update of a running total).
    fn insert_xp_log<'a>(
        &'a self,
        character_id: &'a str,
        xp_amount: i64,
        source: &'a str,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Apply a field-level update to a character record.
    fn update_character<'a>(
        &'a self,
        character_id: &'a str,
        updates: &'a CharacterUpdates,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Apply a field-level update to a quest-progress record.
    fn update_quest_progress<'a>(
        &'a self,
        quest_id: &'a str,
        update: &'a QuestProgressUpdate,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Spend stat points atomically.
    ///
    /// The remote checks and decrements the available point pool in one step
    /// and rejects the whole allocation if it would overdraw it.
    fn allocate_stat_points<'a>(
        &'a self,
        character_id: &'a str,
        deltas: &'a StatMap,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Fetch the remote view of a character.
    fn fetch_character<'a>(
        &'a self,
        character_id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Option<CharacterState>>>;

    /// Fetch the remote view of a user's quests.
    fn fetch_quests<'a>(&'a self, user_id: &'a str) -> BoxFuture<'a, RemoteResult<Vec<QuestState>>>;

    /// Tell other live sessions of this user about a queued action.
    fn broadcast_activity<'a>(
        &'a self,
        _user_id: &'a str,
        _action: &'a PendingAction,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        // Default implementation: no live channel
        Box::pin(async move { Ok(()) })
    }
}
