//! Error types for the catalog subsystem.

use thiserror::Error;

/// Errors that can occur while building or querying the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Plan not present in the catalog
    #[error("plan not found: {plan_id}")]
    PlanNotFound {
        /// The plan ID that was not found
        plan_id: String,
    },

    /// Service offering not present in the catalog
    #[error("service not found: {service_id}")]
    ServiceNotFound {
        /// The service ID that was not found
        service_id: String,
    },

    /// Plan exists but belongs to another offering
    #[error("plan {plan_id} does not belong to service {service_id}")]
    PlanNotInService {
        /// The requested plan
        plan_id: String,
        /// The requested service
        service_id: String,
    },

    /// Catalog source path does not exist
    #[error("catalog source not found at {path}")]
    SourceNotFound {
        /// Expected file or directory path
        path: String,
    },

    /// Failed to read a catalog file
    #[error("failed to load catalog from {path}: {source}")]
    LoadError {
        /// Path to the catalog file
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse catalog TOML
    #[error("failed to parse catalog TOML in {path}: {source}")]
    ParseError {
        /// Path to the catalog file
        path: String,
        /// TOML parse error
        #[source]
        source: toml::de::Error,
    },

    /// Invalid service offering (validation failed)
    #[error("invalid service offering {service_id}: {reason}")]
    ValidationError {
        /// Service ID being validated
        service_id: String,
        /// Reason for validation failure
        reason: String,
    },

    /// Two offerings share a service ID
    #[error("duplicate service id in catalog: {service_id}")]
    DuplicateService {
        /// The repeated service ID
        service_id: String,
    },

    /// Two plans share a plan ID
    #[error("duplicate plan id in catalog: {plan_id}")]
    DuplicatePlan {
        /// The repeated plan ID
        plan_id: String,
    },

    /// I/O error while walking the catalog directory
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid identifier in a built-in definition
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] rsb_core::CoreError),
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;
