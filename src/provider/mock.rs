//! Mock provider client for handler tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Properties;
use crate::error::Result;

use super::client::{ProviderClient, ResourceAction, ResourceKind, ResourceRef};

mockall::mock! {
    pub Provider {}

    #[async_trait]
    impl ProviderClient for Provider {
        fn name(&self) -> &'static str;
        async fn create_resource(&self, kind: ResourceKind, payload: &Properties) -> Result<Properties>;
        async fn read_resource(&self, target: &ResourceRef) -> Result<Properties>;
        async fn update_resource(&self, target: &ResourceRef, changes: &Properties) -> Result<Properties>;
        async fn delete_resource(&self, target: &ResourceRef) -> Result<()>;
        async fn perform(&self, target: &ResourceRef, action: &ResourceAction) -> Result<()>;
        async fn resolve_ssh_key(&self, key: &str) -> Result<Option<Value>>;
    }
}
