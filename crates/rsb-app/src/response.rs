//! Status codes and error bodies for broker outcomes.
//!
//! A routing collaborator turns these into HTTP responses.

use crate::routes::Operation;
use rsb_engine::{
    BindOutcome, BrokerError, DeprovisionOutcome, ProvisionOutcome, UnbindOutcome, UpdateOutcome,
};
use serde::Serialize;

/// Serializable error body in Open Service Broker form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorResponse {
    /// HTTP status code
    #[serde(skip)]
    pub status: u16,
    /// Machine-readable error code (e.g. `AsyncRequired`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    /// User-facing message
    pub description: String,
}

impl ErrorResponse {
    /// Create an error body without a machine-readable code.
    pub fn new(status: u16, description: impl Into<String>) -> Self {
        Self {
            status,
            error: None,
            description: description.into(),
        }
    }

    /// Create an error body with a machine-readable code.
    pub fn with_code(status: u16, error: &'static str, description: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error),
            description: description.into(),
        }
    }

    /// Map a broker error raised while serving `operation`.
    #[must_use]
    pub fn from_error(operation: Operation, err: &BrokerError) -> Self {
        let description = err.to_string();
        match err {
            BrokerError::NotFound { .. } if operation == Operation::Deprovision => {
                Self::new(410, description)
            }
            BrokerError::NotFound { .. } | BrokerError::InstanceNotFound { .. } => {
                Self::new(404, description)
            }
            BrokerError::PlanNotFound { .. }
            | BrokerError::ServiceNotFound { .. }
            | BrokerError::NotBindable { .. }
            | BrokerError::InvalidRequest(_) => Self::new(400, description),
            BrokerError::Conflict { .. } => Self::new(409, description),
            BrokerError::AsyncRequired => Self::with_code(422, "AsyncRequired", description),
            BrokerError::RequiresApp => Self::with_code(422, "RequiresApp", description),
            BrokerError::Busy { .. } | BrokerError::OperationInProgress { .. } => {
                Self::with_code(422, "ConcurrencyError", description)
            }
            BrokerError::HasActiveBindings { .. } | BrokerError::PlanChangeNotSupported { .. } => {
                Self::new(422, description)
            }
            BrokerError::Backend(_) => Self::new(502, description),
            BrokerError::Internal(_) => Self::new(500, description),
        }
    }
}

/// Status code for a provision outcome.
#[must_use]
pub fn provision_status(outcome: &ProvisionOutcome) -> u16 {
    match outcome {
        ProvisionOutcome::Created(_) => 201,
        ProvisionOutcome::AlreadyExists(_) => 200,
        ProvisionOutcome::InProgress { .. } => 202,
    }
}

/// Status code for an update outcome.
#[must_use]
pub fn update_status(outcome: &UpdateOutcome) -> u16 {
    match outcome {
        UpdateOutcome::Updated(_) | UpdateOutcome::Unchanged(_) => 200,
        UpdateOutcome::InProgress { .. } => 202,
    }
}

/// Status code for a deprovision outcome.
#[must_use]
pub fn deprovision_status(outcome: &DeprovisionOutcome) -> u16 {
    match outcome {
        DeprovisionOutcome::Deleted(_) => 200,
        DeprovisionOutcome::InProgress { .. } => 202,
    }
}

/// Status code for a bind outcome.
#[must_use]
pub fn bind_status(outcome: &BindOutcome) -> u16 {
    match outcome {
        BindOutcome::Created(_) => 201,
        BindOutcome::AlreadyExists(_) => 200,
    }
}

/// Status code for an unbind outcome. An absent binding is `410 Gone`.
#[must_use]
pub fn unbind_status(outcome: &UnbindOutcome) -> u16 {
    match outcome {
        UnbindOutcome::Deleted(_) => 200,
        UnbindOutcome::NotFound => 410,
    }
}
