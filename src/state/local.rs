//! Local file-based state storage backend.
//!
//! The state document is a single JSON file. Writes go to a temporary file
//! that is synced and renamed over the target, so readers only ever see a
//! complete document.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{FerraformError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::{StateStore, decode_state, encode_state};
use super::types::State;

/// State file name.
pub const STATE_FILE: &str = "state.json";

/// Lock file name, always beside the state file.
const LOCK_FILE: &str = "state.lock";

/// State kept in a JSON file on the local disk.
#[derive(Debug)]
pub struct LocalStateStore {
    state_path: PathBuf,
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a store for `state.json` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| FerraformError::internal(format!("Cannot determine current directory: {e}")))?;
        Ok(Self::with_base_dir(cwd))
    }

    /// Creates a store for `state.json` inside `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self::with_state_path(base_dir.into().join(STATE_FILE))
    }

    /// Creates a store for an explicit state file. The lock file goes in
    /// the same directory.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let lock_path = state_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from(LOCK_FILE), |dir| dir.join(LOCK_FILE));
        Self { state_path, lock_path }
    }

    /// Path to the state document.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Writes `content` to `target` through a synced temporary file.
    async fn write_atomic(target: &Path, content: &str) -> std::result::Result<(), StateError> {
        let fail = |what: &str, path: &Path, e: std::io::Error| {
            StateError::write(format!("Failed to {what} {}: {e}", path.display()))
        };

        if let Some(dir) = target.parent().filter(|dir| !dir.as_os_str().is_empty())
            && !dir.exists()
        {
            debug!("Creating state directory {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| fail("create", dir, e))?;
        }

        let mut temp_name = target.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| fail("create", &temp_path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| fail("write", &temp_path, e))?;
        file.sync_all().await.map_err(|e| fail("sync", &temp_path, e))?;
        drop(file);

        fs::rename(&temp_path, target)
            .await
            .map_err(|e| fail("replace", target, e))
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path).await {
            Ok(content) => Ok(Some(LockInfo::decode(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to read {}: {e}", self.lock_path.display()),
            }
            .into()),
        }
    }

    async fn remove_lock(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(StateError::LockFailed {
                message: format!("Failed to delete {}: {e}", self.lock_path.display()),
            }
            .into()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<Option<State>> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}", self.state_path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(StateError::Corrupted {
                    message: format!("Failed to read {}: {e}", self.state_path.display()),
                }
                .into());
            }
        };

        let state = decode_state(&content)?;
        info!("Loaded {} recorded resources from {}", state.len(), self.state_path.display());
        Ok(Some(state))
    }

    async fn save(&self, state: &State) -> Result<()> {
        let content = encode_state(state)?;
        Self::write_atomic(&self.state_path, &content).await?;
        debug!("State saved ({} resources)", state.len());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.state_path).await {
            Ok(()) => info!("Deleted state file {}", self.state_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StateError::write(format!(
                    "Failed to delete {}: {e}",
                    self.state_path.display()
                ))
                .into());
            }
        }
        self.remove_lock().await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(fs::try_exists(&self.state_path).await?)
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let existing = self.read_lock().await?;
        if existing.as_ref().is_some_and(LockInfo::is_expired) {
            debug!("Taking over expired state lock");
        }
        let lock = LockInfo::claim(existing.as_ref(), holder, operation)?;

        Self::write_atomic(&self.lock_path, &lock.encode()?)
            .await
            .map_err(|e| StateError::LockFailed { message: e.to_string() })?;

        info!("Acquired state lock {} (expires in {LOCK_EXPIRY_SECS}s)", lock.lock_id);
        Ok(lock)
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let lock = LockInfo::renew(self.read_lock().await?, lock_id)?;
        Self::write_atomic(&self.lock_path, &lock.encode()?)
            .await
            .map_err(|e| StateError::LockFailed { message: e.to_string() })?;
        debug!("Refreshed state lock {lock_id}");
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(lock) if lock.lock_id == lock_id => {
                self.remove_lock().await?;
                info!("Released state lock {lock_id}");
            }
            Some(lock) => debug!("Not releasing lock {}, we hold {lock_id}", lock.lock_id),
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        self.remove_lock().await?;
        info!("Removed state lock {}", self.lock_path.display());
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn location(&self) -> String {
        self.state_path.display().to_string()
    }
}
