//! S3-based state storage backend.
//!
//! The state and lock documents live under a key prefix in an S3 bucket (or
//! any S3-compatible service), so a team can share one state.

use std::fmt::Display;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo};
use super::store::{StateStore, decode_state, encode_state};
use super::types::State;

/// Object names below the prefix.
const STATE_OBJECT: &str = "state.json";
const LOCK_OBJECT: &str = "state.lock";

/// State kept in an S3 bucket.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    /// Empty or ending in `/`.
    prefix: String,
}

fn s3_error(operation: &str, key: &str, e: impl Display) -> StateError {
    StateError::s3(format!("{operation} {key} failed: {e}"))
}

impl S3StateStore {
    /// Creates a store using the ambient AWS configuration, optionally
    /// pinned to `region`.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;
        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store around an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    fn key(&self, object: &str) -> String {
        format!("{}{object}", self.prefix)
    }

    /// Fetches an object as text; `None` if the key does not exist.
    async fn fetch(&self, object: &str) -> Result<Option<String>> {
        let key = self.key(object);
        let response = match self.client.get_object().bucket(&self.bucket).key(&key).send().await {
            Ok(response) => response,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    return Ok(None);
                }
                return Err(s3_error("GET", &key, e).into());
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| s3_error("Reading", &key, e))?
            .into_bytes();
        let text = String::from_utf8(bytes.to_vec()).map_err(|e| StateError::Corrupted {
            message: format!("{key} is not UTF-8: {e}"),
        })?;
        Ok(Some(text))
    }

    async fn store(&self, object: &str, content: String) -> Result<()> {
        let key = self.key(object);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_type("application/json")
            .body(ByteStream::from(content.into_bytes()))
            .send()
            .await
            .map_err(|e| s3_error("PUT", &key, e))?;
        Ok(())
    }

    async fn remove(&self, object: &str) -> Result<()> {
        let key = self.key(object);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| s3_error("DELETE", &key, e))?;
        Ok(())
    }

    async fn read_lock(&self) -> Result<Option<LockInfo>> {
        match self.fetch(LOCK_OBJECT).await? {
            Some(content) => Ok(Some(LockInfo::decode(&content)?)),
            None => Ok(None),
        }
    }
}

/// Normalizes a key prefix to either empty or `something/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    match prefix.map(|p| p.trim_matches('/')) {
        Some(p) if !p.is_empty() => format!("{p}/"),
        _ => String::new(),
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<State>> {
        let Some(content) = self.fetch(STATE_OBJECT).await? else {
            debug!("No state at {}", self.location());
            return Ok(None);
        };
        let state = decode_state(&content)?;
        info!("Loaded {} recorded resources from {}", state.len(), self.location());
        Ok(Some(state))
    }

    async fn save(&self, state: &State) -> Result<()> {
        self.store(STATE_OBJECT, encode_state(state)?).await?;
        debug!("State saved to {} ({} resources)", self.location(), state.len());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Deleting state at {}", self.location());
        self.remove(STATE_OBJECT).await?;
        self.remove(LOCK_OBJECT).await
    }

    async fn exists(&self) -> Result<bool> {
        let key = self.key(STATE_OBJECT);
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let e = e.into_service_error();
                if e.is_not_found() {
                    Ok(false)
                } else {
                    Err(s3_error("HEAD", &key, e).into())
                }
            }
        }
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let existing = self.read_lock().await?;
        if existing.as_ref().is_some_and(LockInfo::is_expired) {
            debug!("Taking over expired state lock");
        }
        let lock = LockInfo::claim(existing.as_ref(), holder, operation)?;
        self.store(LOCK_OBJECT, lock.encode()?).await?;

        info!("Acquired state lock {} (expires in {LOCK_EXPIRY_SECS}s)", lock.lock_id);
        Ok(lock)
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        let lock = LockInfo::renew(self.read_lock().await?, lock_id)?;
        self.store(LOCK_OBJECT, lock.encode()?).await?;
        debug!("Refreshed state lock {lock_id}");
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        match self.read_lock().await? {
            Some(lock) if lock.lock_id == lock_id => {
                self.remove(LOCK_OBJECT).await?;
                info!("Released state lock {lock_id}");
            }
            Some(lock) => debug!("Not releasing lock {}, we hold {lock_id}", lock.lock_id),
            None => {}
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        self.remove(LOCK_OBJECT).await?;
        info!("Removed state lock s3://{}/{}", self.bucket, self.key(LOCK_OBJECT));
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock().await
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }

    fn location(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key(STATE_OBJECT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("")), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("team/prod")), "team/prod/");
        assert_eq!(normalize_prefix(Some("/team/prod/")), "team/prod/");
    }
}
