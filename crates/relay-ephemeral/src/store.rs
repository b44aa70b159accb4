use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EphemeralError {
    /// The backing store cannot be reached. Callers decide whether to fail
    /// open (token blocklist) or surface a transient error.
    #[error("ephemeral store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, EphemeralError>;

/// Key/value store with per-key TTL.
///
/// All operations are synchronous; the in-process implementation is
/// lock-free reads over dashmap and a remote implementation is expected to
/// be a thin client with its own connection pooling.
pub trait EphemeralStore: Send + Sync {
    /// Set `key` to `value`. `ttl` of None means no expiry.
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Read a key, honoring expiry.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove a key. Removing a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// Atomically read and remove a key. The single-use guarantee for reset
    /// tokens rests on this being one operation.
    fn take(&self, key: &str) -> Result<Option<String>>;

    /// Add a member to the set at `key`.
    fn set_add(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from the set at `key`.
    fn set_remove(&self, key: &str, member: &str) -> Result<()>;

    /// All members of the set at `key`; empty when absent.
    fn set_members(&self, key: &str) -> Result<Vec<String>>;

    /// Record one event on a sliding-window counter and return how many
    /// events fall inside the window, including this one.
    fn count_in_window(&self, key: &str, window: Duration) -> Result<u64>;
}
