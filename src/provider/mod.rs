//! Cloud provider clients.
//!
//! Each supported provider implements [`ProviderClient`] on top of the
//! shared [`RestClient`] transport. [`ProviderSet`] holds one client per
//! configured provider and picks the right one for each resource.

mod client;
mod digitalocean;
mod http;
#[cfg(test)]
pub(crate) mod mock;
mod vultr;
mod wait;

pub use client::{ProviderClient, ResourceAction, ResourceKind, ResourceRef, id_value, observed_id};
pub use digitalocean::{DIGITALOCEAN_API_URL, DigitalOceanClient};
pub use http::RestClient;
pub use vultr::{VULTR_API_URL, VultrClient};
pub use wait::{PollConfig, poll_until};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::UserSettings;
use crate::error::{ConfigError, Result};

/// Providers this build can talk to.
pub const SUPPORTED_PROVIDERS: &[&str] = &["digitalocean", "vultr"];

/// Normalizes a provider name, mapping the `do` shorthand.
#[must_use]
pub fn canonical_provider_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.as_str() {
        "do" | "digital_ocean" => "digitalocean".to_string(),
        _ => lower,
    }
}

/// Returns true if the name refers to a supported provider.
#[must_use]
pub fn is_supported_provider(name: &str) -> bool {
    SUPPORTED_PROVIDERS.contains(&canonical_provider_name(name).as_str())
}

/// Returns the credential if it is set and not an unresolved `${VAR}`.
fn usable_credential(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() || (value.starts_with("${") && value.ends_with('}')) {
        None
    } else {
        Some(value)
    }
}

/// The configured provider clients.
#[derive(Clone)]
pub struct ProviderSet {
    /// Provider used by resources that do not name one.
    default: String,
    /// Clients by canonical provider name.
    clients: HashMap<String, Arc<dyn ProviderClient>>,
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.clients.keys().collect();
        names.sort();
        f.debug_struct("ProviderSet")
            .field("default", &self.default)
            .field("clients", &names)
            .finish()
    }
}

impl ProviderSet {
    /// Creates an empty set with the given default provider.
    #[must_use]
    pub fn new(default: &str) -> Self {
        Self {
            default: canonical_provider_name(default),
            clients: HashMap::new(),
        }
    }

    /// Adds a client under the given provider name.
    #[must_use]
    pub fn with_client(mut self, name: &str, client: Arc<dyn ProviderClient>) -> Self {
        self.insert(name, client);
        self
    }

    /// Adds or replaces a client.
    pub fn insert(&mut self, name: &str, client: Arc<dyn ProviderClient>) {
        self.clients.insert(canonical_provider_name(name), client);
    }

    /// Builds clients for every provider with usable credentials.
    ///
    /// Missing credentials are not an error here; they surface per
    /// resource when [`resolve`](Self::resolve) is asked for that provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the default provider is not supported or an
    /// HTTP client cannot be created.
    pub fn from_settings(settings: &UserSettings) -> Result<Self> {
        if !is_supported_provider(&settings.provider) {
            return Err(ConfigError::UnsupportedProvider {
                provider: settings.provider.clone(),
            }
            .into());
        }

        let poll = PollConfig::from(settings.poll);
        let mut set = Self::new(&settings.provider);

        if let Some(creds) = &settings.do_credentials {
            match usable_credential(&creds.token) {
                Some(token) => {
                    let url = creds.api_url.as_deref().unwrap_or(DIGITALOCEAN_API_URL);
                    debug!("Configured DigitalOcean client ({url})");
                    set.insert(
                        "digitalocean",
                        Arc::new(DigitalOceanClient::with_base_url(url, token, poll)?),
                    );
                }
                None => warn!("DigitalOcean token is empty or unresolved, provider disabled"),
            }
        }

        if let Some(creds) = &settings.vultr_credentials {
            match usable_credential(&creds.api_key) {
                Some(key) => {
                    let url = creds.api_url.as_deref().unwrap_or(VULTR_API_URL);
                    debug!("Configured Vultr client ({url})");
                    set.insert("vultr", Arc::new(VultrClient::with_base_url(url, key)?));
                }
                None => warn!("Vultr API key is empty or unresolved, provider disabled"),
            }
        }

        Ok(set)
    }

    /// Default provider name.
    #[must_use]
    pub fn default_provider(&self) -> &str {
        &self.default
    }

    /// Returns true if a client exists for the provider.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.clients.contains_key(&canonical_provider_name(name))
    }

    /// Picks the client for a resource's provider, falling back to the
    /// default. Returns the canonical provider name with the client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingCredentials`] if no client is
    /// configured for that provider, or [`ConfigError::UnsupportedProvider`]
    /// for an unknown provider name.
    pub fn resolve(&self, provider: Option<&str>) -> Result<(String, Arc<dyn ProviderClient>)> {
        let name = provider.map_or_else(|| self.default.clone(), canonical_provider_name);

        if let Some(client) = self.clients.get(&name) {
            return Ok((name, Arc::clone(client)));
        }

        if is_supported_provider(&name) {
            Err(ConfigError::MissingCredentials { provider: name }.into())
        } else {
            Err(ConfigError::UnsupportedProvider { provider: name }.into())
        }
    }
}
