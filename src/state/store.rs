//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use super::lock::LockInfo;
use super::types::State;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the recorded state.
    ///
    /// Returns `None` if no state exists yet. Implementations reject
    /// documents that break the `(name, type)` uniqueness invariant.
    async fn load(&self) -> Result<Option<State>>;

    /// Saves the whole state document.
    async fn save(&self, state: &State) -> Result<()>;

    /// Deletes the state document.
    async fn delete(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state.
    ///
    /// An empty `holder` generates one for the current process.
    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Pushes out the expiry of the lock we hold.
    ///
    /// Fails if the lock was removed or another holder took it over.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases a lock on the state. A mismatched id is ignored.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Removes any lock regardless of its owner.
    async fn force_unlock(&self) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Human-readable location of the state document.
    fn location(&self) -> String;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<State>> {
        (**self).load().await
    }

    async fn save(&self, state: &State) -> Result<()> {
        (**self).save(state).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder, operation).await
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(lock_id).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn force_unlock(&self) -> Result<()> {
        (**self).force_unlock().await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }

    fn location(&self) -> String {
        (**self).location()
    }
}

/// Parses and checks a serialized state document.
///
/// # Errors
///
/// Returns [`crate::error::StateError::Corrupted`] for malformed JSON and
/// [`crate::error::StateError::DuplicateKey`] for a broken key invariant.
pub fn decode_state(content: &str) -> Result<State> {
    let state: State = serde_json::from_str(content).map_err(|e| {
        crate::error::StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        }
    })?;
    state.validate()?;
    Ok(state)
}

/// Serializes a state document.
///
/// # Errors
///
/// Returns a serialization error if the state cannot be encoded.
pub fn encode_state(state: &State) -> Result<String> {
    serde_json::to_string_pretty(state).map_err(|e| {
        crate::error::StateError::serialization(format!("Failed to serialize state: {e}")).into()
    })
}
