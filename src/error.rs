//! Error types for the Local Volume Converter
//!
//! Provides structured error types for the conversion orchestrator, the
//! chart patchers, the migration launchers and the cluster adapter.

use thiserror::Error;

/// Unified error type for the converter
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("{kind}/{name} is not visible yet")]
    TransientLookup { kind: String, name: String },

    // =========================================================================
    // Chart Values Errors
    // =========================================================================
    #[error("{section} not found on resource {resource}")]
    ValuesNotFound { resource: String, section: String },

    #[error("Invalid values on resource {resource}: {reason}")]
    InvalidValues { resource: String, reason: String },

    #[error("Patch rejected for {kind}/{name}: {reason}")]
    PatchConflict {
        kind: String,
        name: String,
        reason: String,
    },

    // =========================================================================
    // Migration Errors
    // =========================================================================
    #[error("{tool} failed for {target}: {reason}")]
    ExternalToolFailure {
        tool: String,
        target: String,
        reason: String,
    },

    #[error("Interrupted while {during}")]
    Interrupted { during: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error only means "not there yet".
    ///
    /// Pollers treat transient errors as an unsatisfied condition instead of
    /// aborting the wait.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::TransientLookup { .. } | Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404 || ae.code >= 500,
            _ => false,
        }
    }

    /// Check if this error was caused by cancellation
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted { .. })
    }
}

/// Result type alias for the converter
pub type Result<T> = std::result::Result<T, Error>;
