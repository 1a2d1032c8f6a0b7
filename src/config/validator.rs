//! Configuration validation for infrastructure documents.
//!
//! Structural problems (empty names, duplicate keys, unusable state
//! backends) are errors. Problems that only affect a single resource at
//! apply time (unknown types, missing required properties) are warnings,
//! since the reconciler reports those per resource and carries on.

use crate::error::{ConfigError, FerraformError, Result};
use crate::provider::is_supported_provider;
use crate::resources::HandlerRegistry;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{InfraConfig, ResourceSpec, StateBackend, UserSettings, normalize_type};

/// Validator for infrastructure and settings documents.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
    /// First duplicated `(name, type)` key, if any.
    duplicate: Option<(String, String)>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates the desired resources against the registered handlers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateResource`] for a repeated key, or the
    /// first other validation error.
    pub fn validate(
        &self,
        config: &InfraConfig,
        registry: &HandlerRegistry,
    ) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (index, resource) in config.resources.iter().enumerate() {
            Self::validate_resource(index, resource, registry, &mut result);

            let key = (resource.name.clone(), normalize_type(&resource.resource_type));
            if !seen.insert(key) {
                result.errors.push(ValidationError {
                    field: format!("resources[{index}]"),
                    message: format!(
                        "Duplicate resource: {} '{}'",
                        resource.resource_type, resource.name
                    ),
                });
                if result.duplicate.is_none() {
                    result.duplicate =
                        Some((resource.resource_type.clone(), resource.name.clone()));
                }
            }
        }

        result.into_outcome()
    }

    /// Validates the user settings.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate_settings(&self, settings: &UserSettings) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        if !is_supported_provider(&settings.provider) {
            result.errors.push(ValidationError {
                field: String::from("provider"),
                message: format!("Unsupported provider '{}'", settings.provider),
            });
        }

        if settings.state.backend == StateBackend::S3
            && settings.state.bucket.as_ref().is_none_or(String::is_empty)
        {
            result.errors.push(ValidationError {
                field: String::from("state.bucket"),
                message: String::from("S3 bucket name is required when using S3 backend"),
            });
        }

        if settings.poll.interval_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("poll.interval_secs"),
                message: String::from("Poll interval must be at least one second"),
            });
        }

        if settings.poll.timeout_secs < settings.poll.interval_secs {
            result.warnings.push(String::from(
                "poll.timeout_secs is shorter than poll.interval_secs; waits will check once",
            ));
        }

        result.into_outcome()
    }

    /// Validates a single resource.
    fn validate_resource(
        index: usize,
        resource: &ResourceSpec,
        registry: &HandlerRegistry,
        result: &mut ValidationResult,
    ) {
        if resource.name.trim().is_empty() {
            result.errors.push(ValidationError {
                field: format!("resources[{index}].name"),
                message: String::from("Resource name cannot be empty"),
            });
        } else if resource.name.chars().any(char::is_whitespace) {
            result.warnings.push(format!(
                "Resource name '{}' contains whitespace; most providers reject it",
                resource.name
            ));
        }

        if resource.resource_type.trim().is_empty() {
            result.errors.push(ValidationError {
                field: format!("resources[{index}].type"),
                message: String::from("Resource type cannot be empty"),
            });
            return;
        }

        let Some(handler) = registry.get(&resource.resource_type) else {
            result.warnings.push(format!(
                "Unsupported resource type '{}' for '{}'; it will be skipped",
                resource.resource_type, resource.name
            ));
            return;
        };

        for property in handler.required_properties() {
            if !resource.properties.contains_key(*property) {
                result.warnings.push(format!(
                    "{} '{}' is missing required property '{property}'",
                    resource.resource_type, resource.name
                ));
            }
        }

        if let Some(provider) = &resource.provider
            && !is_supported_provider(provider)
        {
            result.warnings.push(format!(
                "Resource '{}' names unknown provider '{provider}'",
                resource.name
            ));
        }
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn into_outcome(self) -> Result<Self> {
        if let Some((resource_type, name)) = self.duplicate {
            return Err(FerraformError::Config(ConfigError::DuplicateResource {
                resource_type,
                name,
            }));
        }

        match self.errors.first() {
            None => {
                debug!("Configuration validation passed");
                Ok(self)
            }
            Some(first_error) => Err(FerraformError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            })),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
