//! Request and outcome values exchanged with the broker.
//!
//! Requests are plain data a request-handling layer builds from whatever
//! wire format it speaks. Outcomes carry the committed record so that a
//! retried request can be answered without a second lookup.

use crate::error::{BrokerError, Result};
use crate::model::{Binding, Credentials, LastOperation, ServiceInstance};
use rsb_core::{
    BindingId, InstanceId, OriginatingIdentity, Parameters, PlanId, RequestContext, ServiceId,
};
use serde::{Deserialize, Serialize};

/// Create a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Caller-chosen instance identifier
    pub instance_id: InstanceId,
    /// Offering to provision from
    pub service_id: ServiceId,
    /// Plan within the offering
    pub plan_id: PlanId,
    /// Opaque provisioning parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// Platform context
    #[serde(default)]
    pub context: Option<RequestContext>,
    /// Whether the caller can poll for a deferred result
    #[serde(default)]
    pub accepts_incomplete: bool,
    /// Who asked
    #[serde(default)]
    pub originating_identity: Option<OriginatingIdentity>,
}

impl ProvisionRequest {
    /// Create a request with empty parameters and no context.
    #[must_use]
    pub fn new(instance_id: InstanceId, service_id: ServiceId, plan_id: PlanId) -> Self {
        Self {
            instance_id,
            service_id,
            plan_id,
            parameters: Parameters::new(),
            context: None,
            accepts_incomplete: false,
            originating_identity: None,
        }
    }

    /// Set the provisioning parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the platform context.
    #[must_use]
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = Some(context);
        self
    }

    /// Allow a deferred (`InProgress`) result.
    #[must_use]
    pub fn accepts_incomplete(mut self, accepts: bool) -> Self {
        self.accepts_incomplete = accepts;
        self
    }

    /// Attach the originating identity.
    #[must_use]
    pub fn with_originating_identity(mut self, identity: OriginatingIdentity) -> Self {
        self.originating_identity = Some(identity);
        self
    }

    /// Validate the request context, if any.
    pub fn validate(&self) -> Result<()> {
        if let Some(context) = &self.context {
            context.validate()?;
        }
        Ok(())
    }
}

/// Change an instance's plan or parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    /// Instance to update
    pub instance_id: InstanceId,
    /// Offering the instance must belong to
    pub service_id: ServiceId,
    /// New plan; `None` keeps the current one
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// New parameters; `None` keeps the current ones
    #[serde(default)]
    pub parameters: Option<Parameters>,
    /// Plan the caller believes the instance is on
    #[serde(default)]
    pub previous_plan_id: Option<PlanId>,
    /// Platform context
    #[serde(default)]
    pub context: Option<RequestContext>,
    /// Whether the caller can poll for a deferred result
    #[serde(default)]
    pub accepts_incomplete: bool,
    /// Who asked
    #[serde(default)]
    pub originating_identity: Option<OriginatingIdentity>,
}

impl UpdateRequest {
    /// Create a request that changes nothing yet.
    #[must_use]
    pub fn new(instance_id: InstanceId, service_id: ServiceId) -> Self {
        Self {
            instance_id,
            service_id,
            plan_id: None,
            parameters: None,
            previous_plan_id: None,
            context: None,
            accepts_incomplete: false,
            originating_identity: None,
        }
    }

    /// Request a plan change.
    #[must_use]
    pub fn with_plan(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    /// Replace the parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Record the plan the caller believes is current.
    #[must_use]
    pub fn with_previous_plan(mut self, plan_id: PlanId) -> Self {
        self.previous_plan_id = Some(plan_id);
        self
    }

    /// Allow a deferred (`InProgress`) result.
    #[must_use]
    pub fn accepts_incomplete(mut self, accepts: bool) -> Self {
        self.accepts_incomplete = accepts;
        self
    }

    /// Validate the request context, if any.
    pub fn validate(&self) -> Result<()> {
        if let Some(context) = &self.context {
            context.validate()?;
        }
        Ok(())
    }
}

/// Delete a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprovisionRequest {
    /// Instance to delete
    pub instance_id: InstanceId,
    /// Offering the caller believes the instance belongs to
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    /// Plan the caller believes the instance is on
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// Remove live bindings first instead of failing
    #[serde(default)]
    pub cascade: bool,
    /// Whether the caller can poll for a deferred result
    #[serde(default)]
    pub accepts_incomplete: bool,
    /// Who asked
    #[serde(default)]
    pub originating_identity: Option<OriginatingIdentity>,
}

impl DeprovisionRequest {
    /// Create a non-cascading request.
    #[must_use]
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            service_id: None,
            plan_id: None,
            cascade: false,
            accepts_incomplete: false,
            originating_identity: None,
        }
    }

    /// Unbind every live binding before deleting.
    #[must_use]
    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade = cascade;
        self
    }

    /// Allow a deferred (`InProgress`) result.
    #[must_use]
    pub fn accepts_incomplete(mut self, accepts: bool) -> Self {
        self.accepts_incomplete = accepts;
        self
    }
}

/// Issue credentials against an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindRequest {
    /// Owning instance
    pub instance_id: InstanceId,
    /// Caller-chosen binding identifier
    pub binding_id: BindingId,
    /// Offering the caller believes the instance belongs to
    #[serde(default)]
    pub service_id: Option<ServiceId>,
    /// Plan the caller believes the instance is on
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// Opaque bind parameters
    #[serde(default)]
    pub parameters: Parameters,
    /// Application to bind; absent for a service key
    #[serde(default)]
    pub app_guid: Option<String>,
    /// Platform context
    #[serde(default)]
    pub context: Option<RequestContext>,
    /// Who asked
    #[serde(default)]
    pub originating_identity: Option<OriginatingIdentity>,
}

impl BindRequest {
    /// Create a service key request with empty parameters.
    #[must_use]
    pub fn new(instance_id: InstanceId, binding_id: BindingId) -> Self {
        Self {
            instance_id,
            binding_id,
            service_id: None,
            plan_id: None,
            parameters: Parameters::new(),
            app_guid: None,
            context: None,
            originating_identity: None,
        }
    }

    /// Set the bind parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Bind to an application.
    #[must_use]
    pub fn with_app(mut self, app_guid: impl Into<String>) -> Self {
        self.app_guid = Some(app_guid.into());
        self
    }

    /// Whether `binding` was created by an identical request.
    #[must_use]
    pub fn matches(&self, binding: &Binding) -> bool {
        binding.parameters == self.parameters && binding.app_guid == self.app_guid
    }
}

/// Revoke a binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnbindRequest {
    /// Owning instance
    pub instance_id: InstanceId,
    /// Binding to remove
    pub binding_id: BindingId,
    /// Who asked
    #[serde(default)]
    pub originating_identity: Option<OriginatingIdentity>,
}

impl UnbindRequest {
    /// Create a request.
    #[must_use]
    pub fn new(instance_id: InstanceId, binding_id: BindingId) -> Self {
        Self {
            instance_id,
            binding_id,
            originating_identity: None,
        }
    }
}

/// Enable or disable an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableRequest {
    /// Target enablement flag
    pub enabled: bool,
    /// Who initiated the change
    pub initiator_id: String,
    /// Why the change was made
    pub reason_code: String,
}

impl EnableRequest {
    /// Create a request.
    #[must_use]
    pub fn new(enabled: bool, initiator_id: impl Into<String>, reason_code: impl Into<String>) -> Self {
        Self {
            enabled,
            initiator_id: initiator_id.into(),
            reason_code: reason_code.into(),
        }
    }

    /// Both attribution fields must be non-blank.
    pub fn validate(&self) -> Result<()> {
        if self.initiator_id.trim().is_empty() {
            return Err(BrokerError::InvalidRequest(
                "initiator_id cannot be empty".to_string(),
            ));
        }
        if self.reason_code.trim().is_empty() {
            return Err(BrokerError::InvalidRequest(
                "reason_code cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a provision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum ProvisionOutcome {
    /// A new instance was committed
    Created(ServiceInstance),
    /// An identical instance already exists
    AlreadyExists(ServiceInstance),
    /// Accepted; poll `last_operation` with the operation id
    InProgress {
        /// Snapshot in the `Provisioning` state
        instance: ServiceInstance,
        /// The pending operation
        operation: LastOperation,
    },
}

impl ProvisionOutcome {
    /// The instance record, whichever way the request resolved.
    #[must_use]
    pub fn instance(&self) -> &ServiceInstance {
        match self {
            Self::Created(instance)
            | Self::AlreadyExists(instance)
            | Self::InProgress { instance, .. } => instance,
        }
    }
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The change was committed
    Updated(ServiceInstance),
    /// The request matched the current record
    Unchanged(ServiceInstance),
    /// Accepted; poll `last_operation`
    InProgress {
        /// Snapshot in the `Updating` state
        instance: ServiceInstance,
        /// The pending operation
        operation: LastOperation,
    },
}

impl UpdateOutcome {
    /// The instance record, whichever way the request resolved.
    #[must_use]
    pub fn instance(&self) -> &ServiceInstance {
        match self {
            Self::Updated(instance)
            | Self::Unchanged(instance)
            | Self::InProgress { instance, .. } => instance,
        }
    }
}

/// Result of a deprovision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum DeprovisionOutcome {
    /// The tombstone left behind
    Deleted(ServiceInstance),
    /// Accepted; poll `last_operation`
    InProgress {
        /// The pending operation
        operation: LastOperation,
    },
}

/// Result of a bind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum BindOutcome {
    /// New credentials were issued
    Created(Binding),
    /// An identical binding exists; same credentials returned
    AlreadyExists(Binding),
}

impl BindOutcome {
    /// The binding record.
    #[must_use]
    pub fn binding(&self) -> &Binding {
        match self {
            Self::Created(binding) | Self::AlreadyExists(binding) => binding,
        }
    }

    /// The issued credentials.
    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.binding().credentials
    }
}

/// Result of an unbind.
///
/// `NotFound` is informational; callers treat it as success.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "body", rename_all = "snake_case")]
pub enum UnbindOutcome {
    /// The binding that was removed
    Deleted(Binding),
    /// Nothing to remove
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsb_core::Timestamp;

    fn binding_with(parameters: Parameters, app_guid: Option<&str>) -> Binding {
        Binding {
            id: BindingId::new("b1").expect("valid binding ID"),
            instance_id: InstanceId::new("i1").expect("valid instance ID"),
            parameters,
            app_guid: app_guid.map(str::to_string),
            credentials: Credentials::default(),
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn test_bind_request_matches() {
        let request = BindRequest::new(
            InstanceId::new("i1").expect("valid instance ID"),
            BindingId::new("b1").expect("valid binding ID"),
        )
        .with_app("app-1");

        assert!(request.matches(&binding_with(Parameters::new(), Some("app-1"))));
        assert!(!request.matches(&binding_with(Parameters::new(), None)));

        let mut params = Parameters::new();
        params.insert("role".to_string(), "admin".into());
        assert!(!request.matches(&binding_with(params, Some("app-1"))));
    }

    #[test]
    fn test_enable_request_validation() {
        assert!(EnableRequest::new(false, "ops", "billing").validate().is_ok());
        assert!(matches!(
            EnableRequest::new(false, " ", "billing").validate(),
            Err(BrokerError::InvalidRequest(_))
        ));
        assert!(matches!(
            EnableRequest::new(true, "ops", "").validate(),
            Err(BrokerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_provision_request_rejects_incomplete_ibm_context() {
        let mut context = RequestContext::ibm_cloud("acct", "crn:v1:a", "crn:v1:rg", "crn:v1:t");
        context.crn = None;

        let request = ProvisionRequest::new(
            InstanceId::new("i1").expect("valid instance ID"),
            ServiceId::new("svc").expect("valid service ID"),
            PlanId::new("gold").expect("valid plan ID"),
        )
        .with_context(context);

        let err = request.validate().expect_err("missing crn must fail");
        assert_eq!(err.to_string(), "invalid request: context.crn not found");
    }

    #[test]
    fn test_provision_request_from_json() {
        let request: ProvisionRequest = serde_json::from_value(serde_json::json!({
            "instance_id": "i1",
            "service_id": "svc",
            "plan_id": "gold",
            "accepts_incomplete": true
        }))
        .expect("deserialize request");

        assert!(request.accepts_incomplete);
        assert!(request.parameters.is_empty());
        assert!(request.context.is_none());
    }
}
