//! Vultr API client.
//!
//! Vultr names most things differently from the neutral payload keys
//! (`plan` for size, `label` for name, block storage for volumes), and
//! several in-place operations are plain `PATCH` calls instead of actions.
//! Firewall and forwarding rules are separate sub-objects with their own
//! ids, so removing a rule means listing and matching first.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::config::Properties;
use crate::error::{FerraformError, ProviderError, Result};

use super::client::{ProviderClient, ResourceAction, ResourceKind, ResourceRef};
use super::http::RestClient;

/// Vultr API base URL.
pub const VULTR_API_URL: &str = "https://api.vultr.com/v2";

/// Canonical provider name.
const PROVIDER: &str = "vultr";

/// Vultr API client.
#[derive(Debug, Clone)]
pub struct VultrClient {
    /// REST transport.
    http: RestClient,
}

impl VultrClient {
    /// Creates a client against the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(VULTR_API_URL, api_key)
    }

    /// Creates a client against a custom base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_base_url(base_url: &str, api_key: &str) -> Result<Self> {
        Ok(Self {
            http: RestClient::new(PROVIDER, base_url, api_key)?,
        })
    }

    /// Replaces the REST transport.
    #[must_use]
    pub fn with_http(mut self, http: RestClient) -> Self {
        self.http = http;
        self
    }

    fn collection(kind: ResourceKind, parent: Option<&str>) -> Result<String> {
        let path = match kind {
            ResourceKind::Droplet => "/instances".to_string(),
            ResourceKind::Volume => "/blocks".to_string(),
            ResourceKind::Domain => "/domains".to_string(),
            ResourceKind::Firewall => "/firewall-groups".to_string(),
            ResourceKind::LoadBalancer => "/load-balancers".to_string(),
            ResourceKind::DnsRecord => {
                let domain = parent.ok_or_else(|| {
                    ProviderError::invalid_response(PROVIDER, "DNS record without a domain")
                })?;
                format!("/domains/{domain}/records")
            }
        };
        Ok(path)
    }

    const fn envelope(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Droplet => "instance",
            ResourceKind::Volume => "block",
            ResourceKind::Domain => "domain",
            ResourceKind::DnsRecord => "record",
            ResourceKind::Firewall => "firewall_group",
            ResourceKind::LoadBalancer => "load_balancer",
        }
    }

    fn object_path(target: &ResourceRef) -> Result<String> {
        Ok(format!(
            "{}/{}",
            Self::collection(target.kind, target.parent.as_deref())?,
            target.id
        ))
    }

    /// Translates a neutral payload into a Vultr request body.
    fn request_body(kind: ResourceKind, payload: &Properties) -> Value {
        let get = |key: &str| payload.get(key).cloned();
        let mut body = Properties::new();
        let mut put = |key: &str, value: Option<Value>| {
            if let Some(value) = value.filter(|v| !v.is_null()) {
                body.insert(key.to_string(), value);
            }
        };

        match kind {
            ResourceKind::Droplet => {
                put("region", get("region"));
                put("plan", get("size"));
                put("label", get("name"));
                put("hostname", get("name"));
                match payload.get("image") {
                    Some(Value::Number(n)) => put("os_id", Some(Value::Number(n.clone()))),
                    Some(Value::String(s)) => match s.parse::<u64>() {
                        Ok(os_id) => put("os_id", Some(Value::from(os_id))),
                        Err(_) => put("image_id", Some(Value::String(s.clone()))),
                    },
                    _ => {}
                }
                put("sshkey_id", get("ssh_keys"));
                put("backups", get("backups").and_then(|v| v.as_bool()).map(backups_flag));
                put("enable_ipv6", get("ipv6"));
                put("tags", get("tags"));
                put("user_data", get("user_data"));
            }
            ResourceKind::Volume => {
                put("region", get("region"));
                put("size_gb", get("size"));
                put("label", get("name"));
            }
            ResourceKind::Domain => {
                put("domain", get("name"));
                put("ip", get("ip_address"));
            }
            ResourceKind::DnsRecord => {
                for key in ["name", "type", "data", "ttl", "priority"] {
                    put(key, get(key));
                }
            }
            ResourceKind::Firewall => {
                put("description", get("name"));
            }
            ResourceKind::LoadBalancer => {
                put("region", get("region"));
                put("label", get("name"));
                put(
                    "forwarding_rules",
                    get("forwarding_rules")
                        .and_then(|v| v.as_array().cloned())
                        .map(|rules| Value::Array(rules.iter().map(forwarding_rule).collect())),
                );
                put("health_check", get("health_check"));
                put("instances", get("droplet_ids"));
            }
        }
        Value::Object(body)
    }

    /// Unwraps a response envelope into neutral observed properties.
    fn observe(kind: ResourceKind, response: &Value) -> Result<Properties> {
        let object = response.get(Self::envelope(kind)).ok_or_else(|| {
            ProviderError::invalid_response(
                PROVIDER,
                format!("response has no '{}' object", Self::envelope(kind)),
            )
        })?;

        let mut observed = Properties::new();
        let id = match kind {
            ResourceKind::Domain => object.get("domain"),
            _ => object.get("id"),
        };
        if let Some(id) = id {
            observed.insert("id".into(), id.clone());
        }
        if let Some(status) = object.get("status") {
            observed.insert("status".into(), status.clone());
        }

        let ip_key = match kind {
            ResourceKind::Droplet => Some("main_ip"),
            ResourceKind::LoadBalancer => Some("ipv4"),
            _ => None,
        };
        if let Some(ip) = ip_key
            .and_then(|key| object.get(key))
            .and_then(Value::as_str)
            .filter(|ip| !ip.is_empty() && *ip != "0.0.0.0")
        {
            observed.insert("ip_address".into(), Value::String(ip.to_string()));
        }

        Ok(observed)
    }

    /// Adds each rule as its own sub-object.
    async fn add_rules(&self, path: &str, rules: &[Value], translate: fn(&Value) -> Value) -> Result<()> {
        for rule in rules {
            self.http.post(path, &translate(rule)).await?;
        }
        Ok(())
    }

    /// Deletes the listed sub-objects that match the given rules.
    async fn remove_rules(
        &self,
        path: &str,
        list_key: &str,
        rules: &[Value],
        translate: fn(&Value) -> Value,
        fields: &[&str],
    ) -> Result<()> {
        let listing = self.http.get(path).await?;
        let existing = listing
            .get(list_key)
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for rule in rules {
            let wanted = translate(rule);
            let found = existing
                .iter()
                .find(|candidate| fields.iter().all(|f| same_field(candidate, &wanted, f)))
                .and_then(|candidate| candidate.get("id"))
                .map(|id| match id {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            match found {
                Some(rule_id) => {
                    self.http.delete(&format!("{path}/{rule_id}"), None).await?;
                }
                None => warn!("No matching rule under {path} for {rule}, skipping"),
            }
        }
        Ok(())
    }

    /// Reads an object's string list property, changes it and writes it
    /// back.
    async fn edit_list(
        &self,
        path: &str,
        kind: ResourceKind,
        key: &str,
        edit: impl FnOnce(&mut Vec<String>),
    ) -> Result<()> {
        let response = self.http.get(path).await?;
        let mut values: Vec<String> = response
            .get(Self::envelope(kind))
            .and_then(|o| o.get(key))
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        edit(&mut values);

        let mut body = Properties::new();
        body.insert(key.to_string(), json!(values));
        self.http.patch(path, &Value::Object(body)).await?;
        Ok(())
    }
}

fn backups_flag(enabled: bool) -> Value {
    Value::String(if enabled { "enabled" } else { "disabled" }.to_string())
}

fn same_field(a: &Value, b: &Value, field: &str) -> bool {
    let normalize = |v: Option<&Value>| match v {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.to_lowercase(),
        _ => String::new(),
    };
    normalize(a.get(field)) == normalize(b.get(field))
}

/// Translates a firewall rule into a Vultr firewall group rule. Rules
/// already in Vultr form (with `ip_type`) pass through.
fn firewall_rule(rule: &Value) -> Value {
    if rule.get("ip_type").is_some() {
        return rule.clone();
    }

    let source = rule
        .get("sources")
        .and_then(|s| s.get("addresses"))
        .and_then(Value::as_array)
        .and_then(|a| a.first())
        .and_then(Value::as_str)
        .unwrap_or("0.0.0.0/0");
    let (subnet, size) = source.split_once('/').unwrap_or((source, "32"));
    let ip_type = if subnet.contains(':') { "v6" } else { "v4" };

    let mut out = json!({
        "ip_type": ip_type,
        "protocol": rule.get("protocol").cloned().unwrap_or_else(|| json!("tcp")),
        "subnet": subnet,
        "subnet_size": size.parse::<u64>().unwrap_or(0),
    });
    if let Some(ports) = rule
        .get("ports")
        .map(|p| match p {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .filter(|p| p != "all" && p != "0")
    {
        out["port"] = Value::String(ports);
    }
    out
}

/// Translates a forwarding rule into Vultr's frontend/backend naming.
fn forwarding_rule(rule: &Value) -> Value {
    if rule.get("frontend_port").is_some() {
        return rule.clone();
    }
    json!({
        "frontend_protocol": rule.get("entry_protocol").cloned().unwrap_or(Value::Null),
        "frontend_port": rule.get("entry_port").cloned().unwrap_or(Value::Null),
        "backend_protocol": rule.get("target_protocol").cloned().unwrap_or(Value::Null),
        "backend_port": rule.get("target_port").cloned().unwrap_or(Value::Null),
    })
}

fn looks_like_uuid(key: &str) -> bool {
    key.len() == 36 && key.chars().filter(|c| *c == '-').count() == 4
}

#[async_trait]
impl ProviderClient for VultrClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn create_resource(&self, kind: ResourceKind, payload: &Properties) -> Result<Properties> {
        let parent = payload.get("domain").and_then(Value::as_str);
        let path = Self::collection(kind, parent)?;

        info!("Creating Vultr {kind}");
        let response = self.http.post(&path, &Self::request_body(kind, payload)).await?;
        let observed = Self::observe(kind, &response)?;

        if kind == ResourceKind::Firewall {
            let group = ResourceRef::new(kind, observed_id_str(&observed)?);
            let base = Self::object_path(&group)?;
            if let Some(rules) = payload.get("inbound_rules").and_then(Value::as_array) {
                self.add_rules(&format!("{base}/rules"), rules, firewall_rule)
                    .await?;
            }
            if let Some(ids) = payload.get("droplet_ids").and_then(Value::as_array) {
                for id in ids {
                    let instance = match id {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    self.http
                        .patch(
                            &format!("/instances/{instance}"),
                            &json!({ "firewall_group_id": group.id }),
                        )
                        .await?;
                }
            }
        }

        Ok(observed)
    }

    async fn read_resource(&self, target: &ResourceRef) -> Result<Properties> {
        let response = self.http.get(&Self::object_path(target)?).await?;
        Self::observe(target.kind, &response)
    }

    async fn update_resource(&self, target: &ResourceRef, changes: &Properties) -> Result<Properties> {
        if target.kind != ResourceKind::DnsRecord {
            return Err(FerraformError::Provider(ProviderError::unsupported(
                PROVIDER,
                format!("in-place update of a {}", target.kind),
            )));
        }

        // Vultr answers 204 with no body.
        self.http
            .patch(&Self::object_path(target)?, &Value::Object(changes.clone()))
            .await?;
        Ok(Properties::new())
    }

    async fn delete_resource(&self, target: &ResourceRef) -> Result<()> {
        info!("Deleting Vultr {target}");
        self.http.delete(&Self::object_path(target)?, None).await?;
        Ok(())
    }

    async fn perform(&self, target: &ResourceRef, action: &ResourceAction) -> Result<()> {
        let base = Self::object_path(target)?;
        debug!("Vultr {target}: {}", action.name());

        match (target.kind, action) {
            (ResourceKind::Droplet, ResourceAction::Resize { size }) => {
                self.http.patch(&base, &json!({ "plan": size })).await?;
            }
            (ResourceKind::Droplet, ResourceAction::PowerOff) => {
                self.http.post(&format!("{base}/halt"), &json!({})).await?;
            }
            (ResourceKind::Droplet, ResourceAction::PowerOn) => {
                self.http.post(&format!("{base}/start"), &json!({})).await?;
            }
            (ResourceKind::Droplet, ResourceAction::EnableFeature(f)) if f == "backups" => {
                self.http.patch(&base, &json!({ "backups": "enabled" })).await?;
            }
            (ResourceKind::Droplet, ResourceAction::DisableFeature(f)) if f == "backups" => {
                self.http.patch(&base, &json!({ "backups": "disabled" })).await?;
            }
            (ResourceKind::Droplet, ResourceAction::AddTags(tags)) => {
                self.edit_list(&base, target.kind, "tags", |current| {
                    for tag in tags {
                        if !current.contains(tag) {
                            current.push(tag.clone());
                        }
                    }
                })
                .await?;
            }
            (ResourceKind::Droplet, ResourceAction::RemoveTags(tags)) => {
                self.edit_list(&base, target.kind, "tags", |current| {
                    current.retain(|t| !tags.contains(t));
                })
                .await?;
            }
            (ResourceKind::Volume, ResourceAction::ResizeVolume { size_gb, .. }) => {
                self.http.patch(&base, &json!({ "size_gb": size_gb })).await?;
            }
            (ResourceKind::Volume, ResourceAction::Attach { target_id, .. }) => {
                self.http
                    .post(
                        &format!("{base}/attach"),
                        &json!({ "instance_id": target_id, "live": true }),
                    )
                    .await?;
            }
            (ResourceKind::Volume, ResourceAction::Detach { .. }) => {
                self.http
                    .post(&format!("{base}/detach"), &json!({ "live": true }))
                    .await?;
            }
            (ResourceKind::Firewall, ResourceAction::AddRules { rules, .. }) => {
                self.add_rules(&format!("{base}/rules"), rules, firewall_rule)
                    .await?;
            }
            (ResourceKind::Firewall, ResourceAction::RemoveRules { rules, .. }) => {
                self.remove_rules(
                    &format!("{base}/rules"),
                    "firewall_rules",
                    rules,
                    firewall_rule,
                    &["ip_type", "protocol", "subnet", "subnet_size", "port"],
                )
                .await?;
            }
            (ResourceKind::Firewall, ResourceAction::Attach { target_id, .. }) => {
                self.http
                    .patch(
                        &format!("/instances/{target_id}"),
                        &json!({ "firewall_group_id": target.id }),
                    )
                    .await?;
            }
            (ResourceKind::Firewall, ResourceAction::Detach { target_id, .. }) => {
                self.http
                    .patch(
                        &format!("/instances/{target_id}"),
                        &json!({ "firewall_group_id": "" }),
                    )
                    .await?;
            }
            (ResourceKind::LoadBalancer, ResourceAction::AddRules { rules, .. }) => {
                self.add_rules(&format!("{base}/forwarding-rules"), rules, forwarding_rule)
                    .await?;
            }
            (ResourceKind::LoadBalancer, ResourceAction::RemoveRules { rules, .. }) => {
                self.remove_rules(
                    &format!("{base}/forwarding-rules"),
                    "forwarding_rules",
                    rules,
                    forwarding_rule,
                    &["frontend_protocol", "frontend_port", "backend_protocol", "backend_port"],
                )
                .await?;
            }
            (ResourceKind::LoadBalancer, ResourceAction::Attach { target_id, .. }) => {
                self.edit_list(&base, target.kind, "instances", |current| {
                    if !current.contains(target_id) {
                        current.push(target_id.clone());
                    }
                })
                .await?;
            }
            (ResourceKind::LoadBalancer, ResourceAction::Detach { target_id, .. }) => {
                self.edit_list(&base, target.kind, "instances", |current| {
                    current.retain(|id| id != target_id);
                })
                .await?;
            }
            (kind, action) => {
                return Err(FerraformError::Provider(ProviderError::unsupported(
                    PROVIDER,
                    format!("{} on a {kind}", action.name()),
                )));
            }
        }
        Ok(())
    }

    async fn resolve_ssh_key(&self, key: &str) -> Result<Option<Value>> {
        if looks_like_uuid(key) {
            return Ok(Some(Value::String(key.to_string())));
        }

        let response = self.http.get("/ssh-keys?per_page=500").await?;
        let found = response
            .get("ssh_keys")
            .and_then(Value::as_array)
            .and_then(|keys| {
                keys.iter()
                    .find(|k| k.get("name").and_then(Value::as_str) == Some(key))
            })
            .and_then(|k| k.get("id"))
            .cloned();
        Ok(found)
    }
}

fn observed_id_str(observed: &Properties) -> Result<String> {
    super::client::observed_id(observed).ok_or_else(|| {
        FerraformError::Provider(ProviderError::invalid_response(
            PROVIDER,
            "created object has no id",
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> VultrClient {
        let http = RestClient::new(PROVIDER, &server.uri(), "key")
            .expect("client")
            .with_retry_delay(Duration::from_millis(1));
        VultrClient::with_base_url(&server.uri(), "key")
            .expect("client")
            .with_http(http)
    }

    fn payload(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    #[test]
    fn test_instance_body_translation() {
        let body = VultrClient::request_body(
            ResourceKind::Droplet,
            &payload(json!({
                "name": "web1",
                "region": "ewr",
                "size": "vc2-1c-1gb",
                "image": "1743",
                "backups": true,
                "ssh_keys": ["cb676a46-66fd-4dfb-b839-443f2e6c0b60"]
            })),
        );
        assert_eq!(body["plan"], json!("vc2-1c-1gb"));
        assert_eq!(body["label"], json!("web1"));
        assert_eq!(body["hostname"], json!("web1"));
        assert_eq!(body["os_id"], json!(1743));
        assert_eq!(body["backups"], json!("enabled"));
        assert_eq!(body["sshkey_id"], json!(["cb676a46-66fd-4dfb-b839-443f2e6c0b60"]));
        assert!(body.get("image_id").is_none());
    }

    #[test]
    fn test_firewall_rule_translation() {
        let rule = firewall_rule(&json!({
            "protocol": "tcp",
            "ports": "22",
            "sources": {"addresses": ["10.0.0.0/8"]}
        }));
        assert_eq!(
            rule,
            json!({"ip_type": "v4", "protocol": "tcp", "subnet": "10.0.0.0", "subnet_size": 8, "port": "22"})
        );

        let native = json!({"ip_type": "v6", "protocol": "icmp", "subnet": "::", "subnet_size": 0});
        assert_eq!(firewall_rule(&native), native);
    }

    #[test]
    fn test_forwarding_rule_translation() {
        let rule = forwarding_rule(&json!({
            "entry_protocol": "http", "entry_port": 80,
            "target_protocol": "http", "target_port": 8080
        }));
        assert_eq!(rule["frontend_port"], json!(80));
        assert_eq!(rule["backend_port"], json!(8080));
    }

    #[tokio::test]
    async fn test_create_instance_ignores_placeholder_ip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/instances"))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "instance": {"id": "inst-1", "status": "pending", "main_ip": "0.0.0.0"}
            })))
            .mount(&server)
            .await;

        let observed = client(&server)
            .create_resource(
                ResourceKind::Droplet,
                &payload(json!({"name": "web1", "region": "ewr", "size": "vc2-1c-1gb"})),
            )
            .await
            .expect("create should succeed");
        assert_eq!(observed.get("id"), Some(&json!("inst-1")));
        assert!(observed.get("ip_address").is_none());
    }

    #[tokio::test]
    async fn test_block_attach() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/blocks/blk-1/attach"))
            .and(body_json(json!({"instance_id": "inst-1", "live": true})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Volume, "blk-1"),
                &ResourceAction::Attach {
                    target_id: "inst-1".to_string(),
                    region: None,
                },
            )
            .await
            .expect("attach should succeed");
    }

    #[tokio::test]
    async fn test_remove_firewall_rule_by_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/firewall-groups/fw-1/rules"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "firewall_rules": [
                    {"id": 1, "ip_type": "v4", "protocol": "tcp", "subnet": "0.0.0.0", "subnet_size": 0, "port": "80"},
                    {"id": 2, "ip_type": "v4", "protocol": "tcp", "subnet": "0.0.0.0", "subnet_size": 0, "port": "22"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/firewall-groups/fw-1/rules/2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Firewall, "fw-1"),
                &ResourceAction::RemoveRules {
                    field: "inbound_rules".to_string(),
                    rules: vec![json!({"protocol": "tcp", "ports": "22", "sources": {"addresses": ["0.0.0.0/0"]}})],
                },
            )
            .await
            .expect("rule should be removed");
    }

    #[tokio::test]
    async fn test_add_tags_merges_existing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instances/inst-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "instance": {"id": "inst-1", "tags": ["web"]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/instances/inst-1"))
            .and(body_json(json!({"tags": ["web", "prod"]})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"instance": {}})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Droplet, "inst-1"),
                &ResourceAction::AddTags(vec!["prod".to_string(), "web".to_string()]),
            )
            .await
            .expect("tags should be added");
    }

    #[tokio::test]
    async fn test_unknown_feature_unsupported() {
        let server = MockServer::start().await;
        let result = client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Droplet, "inst-1"),
                &ResourceAction::EnableFeature("monitoring".to_string()),
            )
            .await;
        assert!(matches!(
            result,
            Err(FerraformError::Provider(ProviderError::Unsupported { .. }))
        ));
    }

    #[test]
    fn test_uuid_detection() {
        assert!(looks_like_uuid("cb676a46-66fd-4dfb-b839-443f2e6c0b60"));
        assert!(!looks_like_uuid("laptop"));
    }
}
