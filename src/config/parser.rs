//! Configuration parser for loading the infrastructure and settings files.
//!
//! This module handles loading YAML documents, substituting `${VAR}`
//! placeholders from the environment, and applying credential overrides,
//! with proper precedence and error handling.

use crate::error::{ConfigError, FerraformError, Result};
use serde::de::DeserializeOwned;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::{DigitalOceanCredentials, InfraConfig, UserSettings, VultrCredentials};

/// Environment variable naming the infrastructure file.
pub const INFRA_ENV_VAR: &str = "FERRAFORM_INFRA";

/// Environment variable naming the settings file.
pub const SETTINGS_ENV_VAR: &str = "FERRAFORM_SETTINGS";

/// Default infrastructure file name.
pub const DEFAULT_INFRA_FILE: &str = "infrastructure.yml";

/// Default settings file name.
pub const DEFAULT_SETTINGS_FILE: &str = "settings.yml";

/// Environment override for the DigitalOcean token.
const DIGITALOCEAN_TOKEN_VAR: &str = "DIGITALOCEAN_TOKEN";

/// Environment override for the Vultr API key.
const VULTR_API_KEY_VAR: &str = "VULTR_API_KEY";

/// Configuration parser for loading infrastructure and settings documents.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the infrastructure document from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_infrastructure(&self, path: impl AsRef<Path>) -> Result<InfraConfig> {
        let path = path.as_ref();
        info!("Loading infrastructure from: {}", path.display());

        let content = read_file(path)?;
        let config: InfraConfig = self.parse_yaml(&content, Some(path))?;

        debug!("Parsed {} desired resources", config.resources.len());
        Ok(config)
    }

    /// Loads the user settings from a YAML file and applies environment
    /// credential overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_settings(&self, path: impl AsRef<Path>) -> Result<UserSettings> {
        let path = path.as_ref();
        info!("Loading settings from: {}", path.display());

        let content = read_file(path)?;
        let mut settings: UserSettings = self.parse_yaml(&content, Some(path))?;
        Self::apply_env_overrides(&mut settings);

        Ok(settings)
    }

    /// Builds settings purely from the environment, for runs without a
    /// settings file.
    #[must_use]
    pub fn settings_from_env(&self) -> UserSettings {
        let mut settings = UserSettings::default();
        Self::apply_env_overrides(&mut settings);
        settings
    }

    /// Parses a YAML document, substituting `${VAR}` placeholders first.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or does not match the target
    /// type.
    pub fn parse_yaml<T: DeserializeOwned>(&self, content: &str, source: Option<&Path>) -> Result<T> {
        let location = source.map(|p| p.display().to_string());

        let mut document: Value = serde_yaml::from_str(content).map_err(|e| {
            FerraformError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: location.clone(),
            })
        })?;

        // An empty file parses as null; treat it as an empty mapping.
        if document.is_null() {
            document = Value::Mapping(serde_yaml::Mapping::new());
        }

        substitute_env(&mut document, &|name| std::env::var(name).ok());

        serde_yaml::from_value(document).map_err(|e| {
            FerraformError::Config(ConfigError::ParseError {
                message: format!("Invalid document: {e}"),
                location,
            })
        })
    }

    /// Applies environment credential overrides to the settings.
    fn apply_env_overrides(settings: &mut UserSettings) {
        if let Ok(token) = std::env::var(DIGITALOCEAN_TOKEN_VAR) {
            debug!("Overriding do_credentials.token from environment");
            settings
                .do_credentials
                .get_or_insert_with(DigitalOceanCredentials::default)
                .token = token;
        }

        if let Ok(api_key) = std::env::var(VULTR_API_KEY_VAR) {
            debug!("Overriding vultr_credentials.api_key from environment");
            settings
                .vultr_credentials
                .get_or_insert_with(VultrCredentials::default)
                .api_key = api_key;
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                FerraformError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

/// Reads a configuration file into a string.
fn read_file(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(FerraformError::Config(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        }));
    }

    std::fs::read_to_string(path).map_err(|e| {
        FerraformError::Config(ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })
    })
}

/// Replaces every string of the exact form `${VAR}` with the value returned
/// by `lookup`. Unset variables leave the placeholder untouched.
pub fn substitute_env(value: &mut Value, lookup: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                if let Some(resolved) = lookup(name) {
                    *s = resolved;
                }
            }
        }
        Value::Sequence(items) => {
            for item in items {
                substitute_env(item, lookup);
            }
        }
        Value::Mapping(map) => {
            for item in map.values_mut() {
                substitute_env(item, lookup);
            }
        }
        Value::Tagged(tagged) => substitute_env(&mut tagged.value, lookup),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Resolves the path of a configuration file.
///
/// Precedence: the explicit path, then the environment variable, then the
/// default file name searched from `start_dir` upwards, then the user
/// configuration directory.
///
/// # Errors
///
/// Returns an error if no candidate exists.
pub fn resolve_config_path(
    explicit: Option<&Path>,
    env_var: &str,
    default_name: &str,
    start_dir: impl AsRef<Path>,
) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var) {
        debug!("Using {env_var}={path}");
        return Ok(PathBuf::from(path));
    }

    match find_config_file(start_dir, default_name) {
        Ok(path) => Ok(path),
        Err(err) => {
            if let Some(path) = user_config_path(default_name).filter(|p| p.exists()) {
                info!("Found configuration file: {}", path.display());
                return Ok(path);
            }
            Err(err)
        }
    }
}

/// Returns `<user config dir>/ferraform/<file_name>` if a config dir exists.
#[must_use]
pub fn user_config_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ferraform").join(file_name))
}

/// Finds a configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>, file_name: &str) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(file_name);
        if config_path.exists() {
            info!("Found configuration file: {}", config_path.display());
            return Ok(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    Err(FerraformError::Config(ConfigError::FileNotFound {
        path: start.join(file_name),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_parse_infrastructure() {
        let yaml = r"
resources:
  - name: web1
    type: droplet
    properties:
      region: nyc3
      size: s-1vcpu-1gb
      image: ubuntu-22-04-x64
  - name: data
    type: Volume
    properties:
      size: 10
      attach_to: web1
";
        let parser = ConfigParser::new();
        let config: InfraConfig = parser.parse_yaml(yaml, None).expect("should parse");

        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[0].name, "web1");
        assert_eq!(config.resources[1].resource_type, "volume");
        assert_eq!(config.resources[1].property("size"), Some(&json!(10)));
    }

    #[test]
    fn test_properties_keep_declaration_order() {
        let yaml = r"
resources:
  - name: web1
    type: droplet
    properties:
      size: s-1vcpu-1gb
      region: nyc3
      backups: true
";
        let config: InfraConfig = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("should parse");
        let keys: Vec<&str> = config.resources[0]
            .properties
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["size", "region", "backups"]);
    }

    #[test]
    fn test_empty_document_is_empty_config() {
        let config: InfraConfig = ConfigParser::new()
            .parse_yaml("", None)
            .expect("should parse");
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_substitute_env_exact_placeholders_only() {
        let mut doc: Value = serde_yaml::from_str(
            r"
token: ${DO_TOKEN}
inline: prefix-${DO_TOKEN}
missing: ${NOT_SET}
nested:
  - ${DO_TOKEN}
",
        )
        .expect("should parse");

        let lookup = |name: &str| (name == "DO_TOKEN").then(|| "secret".to_string());
        substitute_env(&mut doc, &lookup);

        assert_eq!(doc["token"], Value::String("secret".into()));
        assert_eq!(doc["inline"], Value::String("prefix-${DO_TOKEN}".into()));
        assert_eq!(doc["missing"], Value::String("${NOT_SET}".into()));
        assert_eq!(doc["nested"][0], Value::String("secret".into()));
    }

    #[test]
    fn test_load_missing_file() {
        let parser = ConfigParser::new();
        let result = parser.load_infrastructure("/nonexistent/infrastructure.yml");
        assert!(matches!(
            result,
            Err(FerraformError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_walks_parents() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("Failed to create dirs");
        std::fs::write(temp.path().join(DEFAULT_INFRA_FILE), "resources: []")
            .expect("Failed to write file");

        let found = find_config_file(&nested, DEFAULT_INFRA_FILE).expect("should find file");
        assert_eq!(found, temp.path().join(DEFAULT_INFRA_FILE));
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = PathBuf::from("/tmp/custom.yml");
        let resolved = resolve_config_path(
            Some(&explicit),
            "FERRAFORM_TEST_UNUSED_VAR",
            DEFAULT_INFRA_FILE,
            ".",
        )
        .expect("explicit path resolves");
        assert_eq!(resolved, explicit);
    }
}
