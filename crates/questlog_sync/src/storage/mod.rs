//! Durable key-value storage abstraction.
//!
//! This module defines the [`KeyValueStorage`] trait which abstracts over the
//! backends (in-memory, one-file-per-key on disk, or a platform store such as
//! browser local storage behind an adapter) used to persist each user's
//! combined cache + outbox record.
//!
//! Values are opaque JSON strings; the record layer owns their shape.

mod memory;
#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryStorage;
#[cfg(not(target_arch = "wasm32"))]
pub use file::FileStorage;

use crate::error::Result;

/// Trait for durable key-value storage backends.
///
/// Implementations must make `set` atomic per key: a reader observes either
/// the previous value or the new one, never a partial write.
pub trait KeyValueStorage: Send + Sync {
    /// Read the value stored under `key`.
    ///
    /// Returns `None` if the key doesn't exist.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// List all keys starting with `prefix`.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    // Tests are in memory.rs and file.rs
}
