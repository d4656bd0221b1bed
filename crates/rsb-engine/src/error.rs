//! Error types for the broker engine.

use rsb_catalog::CatalogError;
use rsb_core::CoreError;
use thiserror::Error;

/// Errors returned by broker operations.
///
/// An identical repeat of a create is reported through the operation's
/// outcome type (`AlreadyExists`), never as an error.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Service instance does not exist (or has been deleted)
    #[error("service instance not found: {instance_id}")]
    NotFound {
        /// The instance ID that was not found
        instance_id: String,
    },

    /// Plan is not in the catalog
    #[error("plan not found: {plan_id}")]
    PlanNotFound {
        /// The plan ID that was not found
        plan_id: String,
    },

    /// Service offering is not in the catalog
    #[error("service not found: {service_id}")]
    ServiceNotFound {
        /// The service ID that was not found
        service_id: String,
    },

    /// Binding target does not exist or is not active
    #[error("service instance {instance_id} does not exist or is not active")]
    InstanceNotFound {
        /// The instance the binding was requested against
        instance_id: String,
    },

    /// Same identifier, divergent attributes
    #[error("{resource} {id} already exists with different attributes")]
    Conflict {
        /// Kind of record (`service instance` or `binding`)
        resource: &'static str,
        /// The conflicting identifier
        id: String,
    },

    /// Instance still has bindings and cascade was not requested
    #[error("service instance {instance_id} has {count} active binding(s)")]
    HasActiveBindings {
        /// The instance being deprovisioned
        instance_id: String,
        /// Number of live bindings
        count: usize,
    },

    /// Lock acquisition timed out; safe to retry
    #[error("timed out waiting for lock on {key}")]
    Busy {
        /// The contended lock key
        key: String,
    },

    /// Another long-running operation holds the instance in a transient state
    #[error("an operation is already in progress for service instance {instance_id}")]
    OperationInProgress {
        /// The busy instance
        instance_id: String,
    },

    /// The broker only completes this operation asynchronously
    #[error("this service plan requires client support for asynchronous service operations")]
    AsyncRequired,

    /// The offering does not allow plan changes
    #[error("service instance {instance_id} cannot change plan from {from} to {to}")]
    PlanChangeNotSupported {
        /// The instance being updated
        instance_id: String,
        /// Current plan
        from: String,
        /// Requested plan
        to: String,
    },

    /// The instance's plan does not allow bindings
    #[error("plan {plan_id} is not bindable")]
    NotBindable {
        /// The non-bindable plan
        plan_id: String,
    },

    /// Service keys are disabled and no application was given
    #[error("this service supports generation of credentials through binding an application only")]
    RequiresApp,

    /// Malformed request (missing or inconsistent fields)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Downstream provisioning failed
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Internal invariant violated; not retryable
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Whether the caller may retry the identical request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy { .. } | Self::OperationInProgress { .. } => true,
            Self::Backend(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Whether this error reports a broken internal invariant.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

impl From<CatalogError> for BrokerError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::PlanNotFound { plan_id } => Self::PlanNotFound { plan_id },
            CatalogError::ServiceNotFound { service_id } => Self::ServiceNotFound { service_id },
            err @ CatalogError::PlanNotInService { .. } => Self::InvalidRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CoreError> for BrokerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(reason) => Self::InvalidRequest(reason),
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Errors reported by a [`ServiceBackend`](crate::ServiceBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Temporary failure (timeout, unavailable dependency)
    #[error("temporarily unavailable: {0}")]
    Transient(String),

    /// The backend refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend call panicked
    #[error("backend panicked: {0}")]
    Panicked(String),
}

impl BackendError {
    /// Whether retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
