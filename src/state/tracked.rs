//! In-memory state bound to its store.
//!
//! Every mutation goes straight back to the store, so a crash between two
//! resources never loses a completed create or delete.

use tracing::debug;

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{ResourceRecord, RunHistoryEntry, State};
use crate::error::Result;

/// Recorded state plus the store it persists to.
#[derive(Debug)]
pub struct TrackedState<'a, S: StateStore + ?Sized> {
    store: &'a S,
    state: State,
    lock_id: Option<String>,
}

impl<'a, S: StateStore + ?Sized> TrackedState<'a, S> {
    /// Loads state from the store, starting empty if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored document is unreadable or breaks the
    /// key invariant.
    pub async fn load(store: &'a S) -> Result<Self> {
        let state = match store.load().await? {
            Some(state) => state,
            None => {
                debug!("No recorded state at {}, starting empty", store.location());
                State::new()
            }
        };
        Ok(Self {
            store,
            state,
            lock_id: None,
        })
    }

    /// Wraps an already loaded state.
    #[must_use]
    pub const fn new(store: &'a S, state: State) -> Self {
        Self {
            store,
            state,
            lock_id: None,
        }
    }

    /// Binds the run's lock, so [`Self::keep_lock_alive`] renews it.
    #[must_use]
    pub fn with_lock(mut self, lock: &LockInfo) -> Self {
        self.lock_id = Some(lock.lock_id.clone());
        self
    }

    /// Renews the bound lock, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock was lost or cannot be rewritten.
    pub async fn keep_lock_alive(&self) -> Result<()> {
        if let Some(lock_id) = &self.lock_id {
            self.store.refresh_lock(lock_id).await?;
        }
        Ok(())
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &State {
        &self.state
    }

    /// Inserts or replaces a record and persists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn upsert(&mut self, record: ResourceRecord) -> Result<()> {
        debug!("Recording {} '{}'", record.resource_type, record.name);
        self.state.upsert(record);
        self.store.save(&self.state).await
    }

    /// Removes a record and persists. Removing a missing key does not
    /// touch the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn remove(&mut self, name: &str, resource_type: &str) -> Result<bool> {
        if self.state.remove(name, resource_type).is_none() {
            return Ok(false);
        }
        debug!("Forgetting {resource_type} '{name}'");
        self.store.save(&self.state).await?;
        Ok(true)
    }

    /// Appends a run history entry and persists.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn record_run(&mut self, entry: RunHistoryEntry, config_hash: Option<&str>) -> Result<()> {
        if let Some(hash) = config_hash {
            self.state.config_hash = hash.to_string();
        }
        self.state.add_history(entry);
        self.store.save(&self.state).await
    }
}
