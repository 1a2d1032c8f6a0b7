//! Configuration module for ferraform.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `infrastructure.yml` and `settings.yml`
//! - Validation of the desired resources and settings
//! - Computing configuration hashes for run history

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    ConfigParser, DEFAULT_INFRA_FILE, DEFAULT_SETTINGS_FILE, INFRA_ENV_VAR, SETTINGS_ENV_VAR,
    find_config_file, resolve_config_path, substitute_env, user_config_path,
};
pub use spec::{
    DEFAULT_PROVIDER, DigitalOceanCredentials, InfraConfig, PollSettings, Properties,
    ResourceSpec, StateBackend, StateConfig, UserSettings, VultrCredentials, normalize_type,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
