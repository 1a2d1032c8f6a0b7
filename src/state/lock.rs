//! Advisory state locking.
//!
//! A lock document sits next to the state document while a deploy or
//! destroy runs. Locks expire on their own so a crashed run cannot wedge the
//! state forever; `ferraform state unlock` clears one by hand.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

/// Seconds until an unreleased lock goes stale.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Contents of the lock document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Run the holder is performing.
    #[serde(default)]
    pub operation: Option<String>,
    /// When the lock was taken.
    pub acquired_at: DateTime<Utc>,
    /// When the lock goes stale.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a fresh lock for `holder`.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let acquired_at = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: None,
            acquired_at,
            expires_at: acquired_at + Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Records the operation holding the lock.
    #[must_use]
    pub fn with_operation(mut self, operation: &str) -> Self {
        self.operation = Some(operation.to_string());
        self
    }

    /// Builds the lock that replaces `existing`, refusing while `existing`
    /// is still live. An empty `holder` generates one for this process.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockedByOther`] if an unexpired lock is held.
    pub fn claim(existing: Option<&Self>, holder: &str, operation: &str) -> Result<Self, StateError> {
        if let Some(current) = existing.filter(|lock| !lock.is_expired()) {
            return Err(StateError::LockedByOther {
                holder: current.holder.clone(),
                since: current.acquired_at.to_rfc3339(),
            });
        }

        let holder = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        Ok(Self::new(&holder).with_operation(operation))
    }

    /// Renews the lock `lock_id` if `existing` is still that lock, even when
    /// it has lapsed, since nobody else claimed it.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::LockedByOther`] if another holder took the lock
    /// over, or [`StateError::LockFailed`] if it is gone.
    pub fn renew(existing: Option<Self>, lock_id: &str) -> Result<Self, StateError> {
        match existing {
            Some(mut lock) if lock.lock_id == lock_id => {
                lock.refresh();
                Ok(lock)
            }
            Some(other) => Err(StateError::LockedByOther {
                holder: other.holder,
                since: other.acquired_at.to_rfc3339(),
            }),
            None => Err(StateError::LockFailed {
                message: format!("Lock {lock_id} is no longer held"),
            }),
        }
    }

    /// Parses a stored lock document.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupted`] if the document is not a lock.
    pub fn decode(content: &str) -> Result<Self, StateError> {
        serde_json::from_str(content).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })
    }

    /// Serializes the lock document.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if encoding fails.
    pub fn encode(&self) -> Result<String, StateError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))
    }

    /// Checks if the lock has gone stale.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Pushes the expiry a full window past now.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Seconds left before the lock goes stale, never negative.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} held by {} since {}",
            self.lock_id,
            self.holder,
            self.acquired_at.to_rfc3339()
        )?;
        if let Some(operation) = &self.operation {
            write!(f, " ({operation})")?;
        }
        if self.is_expired() {
            write!(f, " [expired]")
        } else {
            write!(f, ", expires in {}s", self.remaining_secs())
        }
    }
}

/// Builds a `hostname-pid-uuid8` holder id for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let host = hostname::get().map_or_else(|_| "unknown".to_string(), |h| h.to_string_lossy().into_owned());
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{host}-{}-{}", std::process::id(), &nonce[..8])
}
