//! DigitalOcean API client.
//!
//! Neutral payload keys mostly match the DigitalOcean v2 API already; the
//! client only renames the few that differ and unwraps the singular
//! response envelopes (`{"droplet": {...}}`).

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::Properties;
use crate::error::{FerraformError, ProviderError, Result};

use super::client::{ProviderClient, ResourceAction, ResourceKind, ResourceRef, id_value};
use super::http::RestClient;
use super::wait::{PollConfig, poll_until};

/// DigitalOcean API base URL.
pub const DIGITALOCEAN_API_URL: &str = "https://api.digitalocean.com/v2";

/// Canonical provider name.
const PROVIDER: &str = "digitalocean";

/// DigitalOcean API client.
#[derive(Debug, Clone)]
pub struct DigitalOceanClient {
    /// REST transport.
    http: RestClient,
    /// Polling used while waiting for droplet and volume actions.
    poll: PollConfig,
}

impl DigitalOceanClient {
    /// Creates a client against the public API.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(token: &str, poll: PollConfig) -> Result<Self> {
        Self::with_base_url(DIGITALOCEAN_API_URL, token, poll)
    }

    /// Creates a client against a custom base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_base_url(base_url: &str, token: &str, poll: PollConfig) -> Result<Self> {
        Ok(Self {
            http: RestClient::new(PROVIDER, base_url, token)?,
            poll,
        })
    }

    /// Replaces the REST transport (used to shorten retry delays).
    #[must_use]
    pub fn with_http(mut self, http: RestClient) -> Self {
        self.http = http;
        self
    }

    /// Collection path of a kind. DNS records live under their domain.
    fn collection(kind: ResourceKind, parent: Option<&str>) -> Result<String> {
        let path = match kind {
            ResourceKind::Droplet => "/droplets".to_string(),
            ResourceKind::Volume => "/volumes".to_string(),
            ResourceKind::Domain => "/domains".to_string(),
            ResourceKind::Firewall => "/firewalls".to_string(),
            ResourceKind::LoadBalancer => "/load_balancers".to_string(),
            ResourceKind::DnsRecord => {
                let domain = parent.ok_or_else(|| {
                    ProviderError::invalid_response(PROVIDER, "DNS record without a domain")
                })?;
                format!("/domains/{domain}/records")
            }
        };
        Ok(path)
    }

    /// Response envelope key of a kind.
    const fn envelope(kind: ResourceKind) -> &'static str {
        match kind {
            ResourceKind::Droplet => "droplet",
            ResourceKind::Volume => "volume",
            ResourceKind::Domain => "domain",
            ResourceKind::DnsRecord => "domain_record",
            ResourceKind::Firewall => "firewall",
            ResourceKind::LoadBalancer => "load_balancer",
        }
    }

    /// Path of an existing object.
    fn object_path(target: &ResourceRef) -> Result<String> {
        Ok(format!(
            "{}/{}",
            Self::collection(target.kind, target.parent.as_deref())?,
            target.id
        ))
    }

    /// Translates a neutral payload into a request body.
    fn request_body(kind: ResourceKind, payload: &Properties) -> Value {
        let mut body = payload.clone();
        match kind {
            ResourceKind::Volume => {
                if let Some(size) = body.shift_remove("size") {
                    body.insert("size_gigabytes".into(), size);
                }
            }
            ResourceKind::DnsRecord => {
                body.shift_remove("domain");
            }
            ResourceKind::Droplet
            | ResourceKind::Domain
            | ResourceKind::Firewall
            | ResourceKind::LoadBalancer => {}
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
            ResourceKind::Domain => object.get("name"),
            _ => object.get("id"),
        };
        if let Some(id) = id {
            observed.insert("id".into(), id.clone());
        }
        if let Some(status) = object.get("status") {
            observed.insert("status".into(), status.clone());
        }

        let ip = match kind {
            ResourceKind::Droplet => public_ipv4(object),
            ResourceKind::LoadBalancer => object
                .get("ip")
                .and_then(Value::as_str)
                .filter(|ip| !ip.is_empty())
                .map(str::to_string),
            _ => None,
        };
        if let Some(ip) = ip {
            observed.insert("ip_address".into(), Value::String(ip));
        }

        Ok(observed)
    }

    /// Starts an action and waits for it to complete.
    async fn run_action(&self, path: &str, body: Value) -> Result<()> {
        let response = self.http.post(path, &body).await?;
        let action_id = response
            .get("action")
            .and_then(|a| a.get("id"))
            .and_then(Value::as_u64)
            .ok_or_else(|| ProviderError::invalid_response(PROVIDER, "action response has no id"))?;

        debug!("Waiting for action {action_id} ({path})");
        let http = &self.http;
        let action_path = format!("/actions/{action_id}");
        let action_path = action_path.as_str();
        poll_until(self.poll, &format!("action {action_id}"), "completed", move || async move {
            let response = http.get(action_path).await?;
            match response
                .get("action")
                .and_then(|a| a.get("status"))
                .and_then(Value::as_str)
            {
                Some("completed") => Ok(Some(())),
                Some("errored") => Err(FerraformError::Provider(ProviderError::api_error(
                    PROVIDER,
                    500,
                    format!("action {action_id} errored"),
                ))),
                _ => Ok(None),
            }
        })
        .await
    }

    /// Applies tags to a droplet or volume through the tag resources API.
    async fn tag_resources(&self, target: &ResourceRef, tags: &[String], add: bool) -> Result<()> {
        let resource_type = match target.kind {
            ResourceKind::Droplet => "droplet",
            ResourceKind::Volume => "volume",
            _ => {
                return Err(FerraformError::Provider(ProviderError::unsupported(
                    PROVIDER,
                    format!("tagging a {}", target.kind),
                )));
            }
        };
        let body = json!({
            "resources": [{"resource_id": target.id, "resource_type": resource_type}]
        });

        for tag in tags {
            let path = format!("/tags/{tag}/resources");
            if add {
                if let Err(e) = self.http.post("/tags", &json!({ "name": tag })).await {
                    debug!("Creating tag '{tag}' failed, assuming it exists: {e}");
                }
                self.http.post(&path, &body).await?;
            } else {
                self.http.delete(&path, Some(&body)).await?;
            }
        }
        Ok(())
    }
}

/// Finds the public IPv4 address in a droplet's `networks` block.
fn public_ipv4(droplet: &Value) -> Option<String> {
    droplet
        .get("networks")?
        .get("v4")?
        .as_array()?
        .iter()
        .find(|net| net.get("type").and_then(Value::as_str) == Some("public"))
        .and_then(|net| net.get("ip_address"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Wraps a rule list in an object keyed by its property name.
fn rule_body(field: &str, rules: &[Value]) -> Value {
    let mut body = Properties::new();
    body.insert(field.to_string(), Value::Array(rules.to_vec()));
    Value::Object(body)
}

/// Converts identifiers to the numeric form DigitalOcean expects.
fn droplet_ids(ids: &[&str]) -> Value {
    Value::Array(ids.iter().map(|id| id_value(id)).collect())
}

#[async_trait]
impl ProviderClient for DigitalOceanClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn create_resource(&self, kind: ResourceKind, payload: &Properties) -> Result<Properties> {
        let parent = payload.get("domain").and_then(Value::as_str);
        let path = Self::collection(kind, parent)?;

        info!("Creating DigitalOcean {kind}");
        let response = self.http.post(&path, &Self::request_body(kind, payload)).await?;
        Self::observe(kind, &response)
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

        let response = self
            .http
            .patch(&Self::object_path(target)?, &Value::Object(changes.clone()))
            .await?;
        Self::observe(target.kind, &response)
    }

    async fn delete_resource(&self, target: &ResourceRef) -> Result<()> {
        info!("Deleting DigitalOcean {target}");
        self.http.delete(&Self::object_path(target)?, None).await?;
        Ok(())
    }

    async fn perform(&self, target: &ResourceRef, action: &ResourceAction) -> Result<()> {
        let base = Self::object_path(target)?;
        debug!("DigitalOcean {target}: {}", action.name());

        match (target.kind, action) {
            (ResourceKind::Droplet, ResourceAction::Resize { size }) => {
                self.run_action(
                    &format!("{base}/actions"),
                    json!({"type": "resize", "size": size, "disk": false}),
                )
                .await
            }
            (ResourceKind::Droplet, ResourceAction::PowerOff) => {
                self.run_action(&format!("{base}/actions"), json!({"type": "power_off"}))
                    .await
            }
            (ResourceKind::Droplet, ResourceAction::PowerOn) => {
                self.run_action(&format!("{base}/actions"), json!({"type": "power_on"}))
                    .await
            }
            (ResourceKind::Droplet, ResourceAction::EnableFeature(feature)) => {
                self.run_action(
                    &format!("{base}/actions"),
                    json!({"type": format!("enable_{feature}")}),
                )
                .await
            }
            (ResourceKind::Droplet, ResourceAction::DisableFeature(feature)) => {
                self.run_action(
                    &format!("{base}/actions"),
                    json!({"type": format!("disable_{feature}")}),
                )
                .await
            }
            (ResourceKind::Volume, ResourceAction::ResizeVolume { size_gb, region }) => {
                self.run_action(
                    &format!("{base}/actions"),
                    json!({"type": "resize", "size_gigabytes": size_gb, "region": region}),
                )
                .await
            }
            (ResourceKind::Volume, ResourceAction::Attach { target_id, region }) => {
                self.run_action(
                    &format!("{base}/actions"),
                    json!({"type": "attach", "droplet_id": id_value(target_id), "region": region}),
                )
                .await
            }
            (ResourceKind::Volume, ResourceAction::Detach { target_id, region }) => {
                self.run_action(
                    &format!("{base}/actions"),
                    json!({"type": "detach", "droplet_id": id_value(target_id), "region": region}),
                )
                .await
            }
            (ResourceKind::Droplet | ResourceKind::Volume, ResourceAction::AddTags(tags)) => {
                self.tag_resources(target, tags, true).await
            }
            (ResourceKind::Droplet | ResourceKind::Volume, ResourceAction::RemoveTags(tags)) => {
                self.tag_resources(target, tags, false).await
            }
            (ResourceKind::Firewall, ResourceAction::AddTags(tags)) => {
                self.http
                    .post(&format!("{base}/tags"), &json!({ "tags": tags }))
                    .await
                    .map(drop)
            }
            (ResourceKind::Firewall, ResourceAction::RemoveTags(tags)) => {
                self.http
                    .delete(&format!("{base}/tags"), Some(&json!({ "tags": tags })))
                    .await
                    .map(drop)
            }
            (ResourceKind::Firewall, ResourceAction::AddRules { field, rules }) => {
                self.http
                    .post(&format!("{base}/rules"), &rule_body(field, rules))
                    .await
                    .map(drop)
            }
            (ResourceKind::Firewall, ResourceAction::RemoveRules { field, rules }) => {
                self.http
                    .delete(&format!("{base}/rules"), Some(&rule_body(field, rules)))
                    .await
                    .map(drop)
            }
            (ResourceKind::LoadBalancer, ResourceAction::AddRules { rules, .. }) => {
                self.http
                    .post(
                        &format!("{base}/forwarding_rules"),
                        &json!({ "forwarding_rules": rules }),
                    )
                    .await
                    .map(drop)
            }
            (ResourceKind::LoadBalancer, ResourceAction::RemoveRules { rules, .. }) => {
                self.http
                    .delete(
                        &format!("{base}/forwarding_rules"),
                        Some(&json!({ "forwarding_rules": rules })),
                    )
                    .await
                    .map(drop)
            }
            (
                ResourceKind::Firewall | ResourceKind::LoadBalancer,
                ResourceAction::Attach { target_id, .. },
            ) => {
                self.http
                    .post(
                        &format!("{base}/droplets"),
                        &json!({ "droplet_ids": droplet_ids(&[target_id]) }),
                    )
                    .await
                    .map(drop)
            }
            (
                ResourceKind::Firewall | ResourceKind::LoadBalancer,
                ResourceAction::Detach { target_id, .. },
            ) => {
                self.http
                    .delete(
                        &format!("{base}/droplets"),
                        Some(&json!({ "droplet_ids": droplet_ids(&[target_id]) })),
                    )
                    .await
                    .map(drop)
            }
            (kind, action) => Err(FerraformError::Provider(ProviderError::unsupported(
                PROVIDER,
                format!("{} on a {kind}", action.name()),
            ))),
        }
    }

    async fn resolve_ssh_key(&self, key: &str) -> Result<Option<Value>> {
        if let Ok(id) = key.parse::<u64>() {
            return Ok(Some(Value::from(id)));
        }
        if key.contains(':') {
            return Ok(Some(Value::String(key.to_string())));
        }

        let response = self.http.get("/account/keys?per_page=200").await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_json, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DigitalOceanClient {
        let poll = PollConfig::new(Duration::from_millis(1), Duration::from_millis(500));
        let http = RestClient::new(PROVIDER, &server.uri(), "token")
            .expect("client")
            .with_retry_delay(Duration::from_millis(1));
        DigitalOceanClient::with_base_url(&server.uri(), "token", poll)
            .expect("client")
            .with_http(http)
    }

    fn payload(value: Value) -> Properties {
        match value {
            Value::Object(map) => map,
            _ => Properties::new(),
        }
    }

    #[tokio::test]
    async fn test_create_droplet_observes_id_and_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/droplets"))
            .and(body_json(json!({"name": "web1", "region": "nyc3", "size": "s-1vcpu-1gb"})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({
                "droplet": {"id": 3164444, "name": "web1", "status": "new", "networks": {"v4": []}}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let observed = client(&server)
            .create_resource(
                ResourceKind::Droplet,
                &payload(json!({"name": "web1", "region": "nyc3", "size": "s-1vcpu-1gb"})),
            )
            .await
            .expect("create should succeed");

        assert_eq!(observed.get("id"), Some(&json!(3164444)));
        assert_eq!(observed.get("status"), Some(&json!("new")));
        assert!(observed.get("ip_address").is_none());
    }

    #[tokio::test]
    async fn test_read_droplet_finds_public_ip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/droplets/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "droplet": {
                    "id": 1,
                    "status": "active",
                    "networks": {"v4": [
                        {"ip_address": "10.0.0.2", "type": "private"},
                        {"ip_address": "104.236.32.182", "type": "public"}
                    ]}
                }
            })))
            .mount(&server)
            .await;

        let observed = client(&server)
            .read_resource(&ResourceRef::new(ResourceKind::Droplet, "1"))
            .await
            .expect("read should succeed");
        assert_eq!(observed.get("ip_address"), Some(&json!("104.236.32.182")));
    }

    #[tokio::test]
    async fn test_volume_size_is_renamed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/volumes"))
            .and(body_json(json!({"name": "data", "region": "nyc3", "size_gigabytes": 10})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"volume": {"id": "vol-1"}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let observed = client(&server)
            .create_resource(
                ResourceKind::Volume,
                &payload(json!({"name": "data", "region": "nyc3", "size": 10})),
            )
            .await
            .expect("create should succeed");
        assert_eq!(observed.get("id"), Some(&json!("vol-1")));
    }

    #[tokio::test]
    async fn test_dns_record_goes_under_domain() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/domains/example.com/records"))
            .and(body_json(json!({"type": "A", "name": "www", "data": "1.2.3.4"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"domain_record": {"id": 28448433}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let observed = client(&server)
            .create_resource(
                ResourceKind::DnsRecord,
                &payload(json!({"domain": "example.com", "type": "A", "name": "www", "data": "1.2.3.4"})),
            )
            .await
            .expect("create should succeed");
        assert_eq!(observed.get("id"), Some(&json!(28448433)));
    }

    #[tokio::test]
    async fn test_resize_waits_for_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/droplets/1/actions"))
            .and(body_partial_json(json!({"type": "resize", "size": "s-2vcpu-2gb"})))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(json!({"action": {"id": 99, "status": "in-progress"}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/actions/99"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"action": {"id": 99, "status": "in-progress"}})),
            )
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/actions/99"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"action": {"id": 99, "status": "completed"}})),
            )
            .mount(&server)
            .await;

        client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Droplet, "1"),
                &ResourceAction::Resize {
                    size: "s-2vcpu-2gb".to_string(),
                },
            )
            .await
            .expect("resize should complete");
    }

    #[tokio::test]
    async fn test_errored_action_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/droplets/1/actions"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"action": {"id": 5}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/actions/5"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"action": {"id": 5, "status": "errored"}})),
            )
            .mount(&server)
            .await;

        let result = client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Droplet, "1"),
                &ResourceAction::PowerOff,
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_firewall_rules_added() {
        let server = MockServer::start().await;
        let rule = json!({"protocol": "tcp", "ports": "443", "sources": {"addresses": ["0.0.0.0/0"]}});
        Mock::given(method("POST"))
            .and(path("/firewalls/fw-1/rules"))
            .and(body_json(json!({"inbound_rules": [rule.clone()]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .perform(
                &ResourceRef::new(ResourceKind::Firewall, "fw-1"),
                &ResourceAction::AddRules {
                    field: "inbound_rules".to_string(),
                    rules: vec![rule],
                },
            )
            .await
            .expect("rules should be added");
    }

    #[tokio::test]
    async fn test_resolve_ssh_key_by_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ssh_keys": [{"id": 512189, "name": "laptop"}]
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(
            client.resolve_ssh_key("laptop").await.expect("lookup"),
            Some(json!(512189))
        );
        assert_eq!(client.resolve_ssh_key("desktop").await.expect("lookup"), None);
        assert_eq!(
            client.resolve_ssh_key("42").await.expect("numeric id"),
            Some(json!(42))
        );
    }

    #[tokio::test]
    async fn test_unsupported_update() {
        let server = MockServer::start().await;
        let result = client(&server)
            .update_resource(
                &ResourceRef::new(ResourceKind::Droplet, "1"),
                &Properties::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(FerraformError::Provider(ProviderError::Unsupported { .. }))
        ));
    }
}
