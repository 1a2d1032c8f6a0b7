//! Error types for ferraform.
//!
//! This module provides the error hierarchy for every stage of a run:
//! configuration loading, state persistence, provider API calls, planning,
//! and reconciliation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for ferraform.
#[derive(Debug, Error)]
pub enum FerraformError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider API errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Two resources share the same name and type.
    #[error("Duplicate resource: {resource_type} '{name}'")]
    DuplicateResource {
        /// Type of the duplicated resource.
        resource_type: String,
        /// The duplicated name.
        name: String,
    },

    /// No credentials are configured for a provider.
    #[error("No credentials configured for provider '{provider}'")]
    MissingCredentials {
        /// Provider name.
        provider: String,
    },

    /// The named provider is not supported.
    #[error("Unsupported provider: {provider}")]
    UnsupportedProvider {
        /// Provider name as written in the configuration.
        provider: String,
    },

    /// No handler is registered for the resource type.
    #[error("Unsupported resource type: {resource_type}")]
    UnsupportedResourceType {
        /// The unknown type string.
        resource_type: String,
    },

    /// A property required by the resource type is missing.
    #[error("Resource '{resource}' is missing required property '{property}'")]
    MissingProperty {
        /// Resource name.
        resource: String,
        /// Missing property key.
        property: String,
    },

    /// A property refers to a resource that is not recorded in state.
    #[error("Cannot resolve {kind} '{name}' from recorded state")]
    UnresolvedReference {
        /// Referenced resource name.
        name: String,
        /// Expected kind of the referenced resource.
        kind: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Two records share the same (name, type) key.
    #[error("State holds more than one record for {resource_type} '{name}'")]
    DuplicateKey {
        /// Type of the duplicated record.
        resource_type: String,
        /// Name of the duplicated record.
        name: String,
    },

    /// The state could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },
}

/// Provider API errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication failed.
    #[error("{provider} authentication failed: {message}")]
    AuthenticationFailed {
        /// Provider name.
        provider: String,
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("{provider} API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// Provider name.
        provider: String,
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("{provider} API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Provider name.
        provider: String,
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The remote object does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing object.
        kind: String,
        /// Provider identifier of the missing object.
        id: String,
    },

    /// Network error.
    #[error("Network error communicating with {provider}: {message}")]
    NetworkError {
        /// Provider name.
        provider: String,
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from {provider} API: {message}")]
    InvalidResponse {
        /// Provider name.
        provider: String,
        /// Description of the response issue.
        message: String,
    },

    /// Timeout waiting for a resource.
    #[error("Timeout waiting for {resource} to reach state {expected_state}")]
    Timeout {
        /// Description of the awaited resource.
        resource: String,
        /// Expected state that was not reached.
        expected_state: String,
    },

    /// The provider has no API path for the requested operation.
    #[error("{provider} does not support {operation}")]
    Unsupported {
        /// Provider name.
        provider: String,
        /// Description of the operation.
        operation: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A plan was handed to the wrong apply path.
    #[error("Cannot apply a {found} plan as a {expected} run")]
    ModeMismatch {
        /// Mode the caller expected.
        expected: String,
        /// Mode the plan was built for.
        found: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A recorded resource carries no provider identifier.
    #[error("{resource_type} '{name}' has no recorded '{key}'")]
    MissingIdentifier {
        /// Type of resource.
        resource_type: String,
        /// Name of the resource.
        name: String,
        /// Property that should hold the identifier.
        key: String,
    },
}

/// Result type alias for ferraform operations.
pub type Result<T> = std::result::Result<T, FerraformError>;

impl FerraformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Provider(
                ProviderError::RateLimited { .. } | ProviderError::NetworkError { .. }
            ) | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the delay the server asked for before a retry, if any.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(ProviderError::RateLimited {
                retry_after_secs, ..
            }) => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Returns true if the error must stop the whole run rather than a
    /// single resource.
    #[must_use]
    pub const fn is_fatal_for_run(&self) -> bool {
        matches!(self, Self::State(_) | Self::Io(_))
    }

    /// Returns true if the error is a provider "not found" response.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Provider(ProviderError::NotFound { .. }))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(provider: &str, status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            provider: provider.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(provider: &str, message: impl Into<String>) -> Self {
        Self::NetworkError {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(provider: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    /// Creates an unsupported operation error.
    #[must_use]
    pub fn unsupported(provider: &str, operation: impl Into<String>) -> Self {
        Self::Unsupported {
            provider: provider.to_string(),
            operation: operation.into(),
        }
    }
}
