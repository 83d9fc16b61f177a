#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Local cache of character and quest state
pub mod cache;

/// Configuration options
pub mod config;

/// Conflict resolution between local and remote state
pub mod conflict;

/// Online/offline status and transition subscriptions
pub mod connectivity;

/// Sync engine (drains the outbox, reconciles the cache)
pub mod engine;

/// Error (common error types)
pub mod error;

/// Character and quest state
pub mod model;

/// Pending action outbox
pub mod outbox;

/// Combined per-user record
pub mod record;

/// Remote store abstraction
pub mod remote;

/// Offline sync façade (the entry point for the application)
pub mod service;

/// Durable key-value storage
pub mod storage;

pub use cache::LocalCache;
pub use config::SyncConfig;
pub use conflict::{Resolution, resolve_character, resolve_quest, resolve_quests};
pub use connectivity::{ConnectivityEvent, ConnectivityMonitor, SubscriptionId};
pub use engine::{ReconcileOutcome, SyncEngine, SyncReport, SyncStatus};
pub use error::{Result, SerializableError, SyncError};
pub use model::{CachedData, CachedSnapshot, CharacterState, Objective, QuestState, StatMap};
pub use outbox::{ActionPayload, NewAction, Outbox, PendingAction};
pub use remote::{InMemoryRemoteStore, RemoteError, RemoteStore};
pub use service::{AutoSyncHandle, OfflineSync};
#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStorage;
pub use storage::{KeyValueStorage, MemoryStorage};
