//! Instance, binding and operation records.

use rsb_core::{BindingId, InstanceId, Parameters, PlanId, RequestContext, ServiceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a service instance.
///
/// `Provisioning`, `Updating` and `Deprovisioning` are transient: an
/// instance sits in them only while a backend call is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Backend provisioning pending
    Provisioning,
    /// Ready for use and binding
    Active,
    /// Backend plan or parameter change pending
    Updating,
    /// Backend teardown pending
    Deprovisioning,
    /// Tombstone; the identifier may be provisioned again
    Deleted,
}

impl InstanceState {
    /// Whether a backend operation is pending.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Provisioning | Self::Updating | Self::Deprovisioning
        )
    }

    /// Whether `self -> next` is a legal lifecycle transition.
    ///
    /// `Provisioning -> Deprovisioning` is only taken when a provisioning
    /// attempt has failed and the caller tears the instance down instead of
    /// retrying it.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Provisioning, Self::Active | Self::Deprovisioning)
                | (Self::Active, Self::Updating | Self::Deprovisioning)
                | (Self::Updating, Self::Active)
                | (Self::Deprovisioning, Self::Deleted | Self::Active)
        )
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provisioning => "provisioning",
            Self::Active => "active",
            Self::Updating => "updating",
            Self::Deprovisioning => "deprovisioning",
            Self::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Kind of broker operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Create an instance
    Provision,
    /// Change an instance's plan or parameters
    Update,
    /// Delete an instance
    Deprovision,
    /// Issue credentials
    Bind,
    /// Revoke credentials
    Unbind,
    /// Enable or disable an instance
    Enable,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Provision => "provision",
            Self::Update => "update",
            Self::Deprovision => "deprovision",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
            Self::Enable => "enable",
        };
        f.write_str(name)
    }
}

/// Progress of the most recent lifecycle operation on an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationState {
    /// Backend work still running
    #[serde(rename = "in progress")]
    InProgress,
    /// Backend work finished and was committed
    #[serde(rename = "succeeded")]
    Succeeded,
    /// Backend work failed
    #[serde(rename = "failed")]
    Failed,
}

/// The last provision, update or deprovision performed on an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastOperation {
    /// Operation handle returned to asynchronous callers
    pub id: Uuid,
    /// What was attempted
    pub kind: OperationKind,
    /// Where it stands
    pub state: OperationState,
    /// User-facing message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When it began
    pub started_at: Timestamp,
    /// When it reached `Succeeded` or `Failed`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl LastOperation {
    /// Start a new operation.
    #[must_use]
    pub fn start(kind: OperationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            state: OperationState::InProgress,
            description: None,
            started_at: Timestamp::now(),
            finished_at: None,
        }
    }

    /// Mark the operation as committed.
    #[must_use]
    pub fn succeed(mut self) -> Self {
        self.state = OperationState::Succeeded;
        self.description = Some(format!("{} completed", self.kind));
        self.finished_at = Some(Timestamp::now());
        self
    }

    /// Mark the operation as failed with a reason.
    #[must_use]
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.state = OperationState::Failed;
        self.description = Some(reason.into());
        self.finished_at = Some(Timestamp::now());
        self
    }

    /// Whether backend work is still pending.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        self.state == OperationState::InProgress
    }
}

/// A provisioned unit of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Caller-supplied identifier
    pub id: InstanceId,
    /// Offering the instance belongs to
    pub service_id: ServiceId,
    /// Current plan; always resolves in the catalog
    pub plan_id: PlanId,
    /// Lifecycle state
    pub state: InstanceState,
    /// Caller-supplied provisioning parameters
    pub parameters: Parameters,
    /// Platform context from the last provision or update
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    /// Management dashboard link issued by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    /// Enablement flag controlled by the platform
    pub enabled: bool,
    /// When the instance was first provisioned
    pub created_at: Timestamp,
    /// When the record last changed
    pub updated_at: Timestamp,
    /// When the instance was last used or modified
    pub last_active: Timestamp,
    /// Most recent provision, update or deprovision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,
}

impl ServiceInstance {
    /// Whether the instance is ready for binding.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == InstanceState::Active
    }

    /// Whether the instance has been deprovisioned.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.state == InstanceState::Deleted
    }

    /// Whether a provisioning attempt failed and left the instance waiting
    /// for a retry or a teardown.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.state == InstanceState::Provisioning
            && self
                .last_operation
                .as_ref()
                .is_some_and(|op| op.state == OperationState::Failed)
    }
}

/// Opaque credentials payload issued on bind.
///
/// `Debug` prints only the key names.
#[derive(Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(Parameters);

impl Credentials {
    /// Wrap an arbitrary credentials map.
    #[must_use]
    pub fn new(values: Parameters) -> Self {
        Self(values)
    }

    /// A `userid` / `password` pair.
    #[must_use]
    pub fn user_password(userid: impl Into<String>, password: impl Into<String>) -> Self {
        let mut values = Parameters::new();
        values.insert("userid".to_string(), userid.into().into());
        values.insert("password".to_string(), password.into().into());
        Self(values)
    }

    /// Look up one credential value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// The full payload.
    #[must_use]
    pub fn values(&self) -> &Parameters {
        &self.0
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credentials")
            .field(&self.0.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Credentials issued against a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    /// Caller-supplied identifier, unique within the instance
    pub id: BindingId,
    /// Owning instance (reference only)
    pub instance_id: InstanceId,
    /// Caller-supplied bind parameters
    pub parameters: Parameters,
    /// Bound application, absent for service keys
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_guid: Option<String>,
    /// Issued credentials
    pub credentials: Credentials,
    /// When the binding was created
    pub created_at: Timestamp,
}

impl Binding {
    /// Whether this binding is a service key (not attached to an application).
    #[must_use]
    pub fn is_service_key(&self) -> bool {
        self.app_guid.is_none()
    }
}

/// Enablement extension view of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    /// Platform enablement flag
    pub enabled: bool,
    /// Whether the instance is `Active`
    pub active: bool,
    /// Last access in milliseconds since the Unix epoch
    pub last_active: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use InstanceState::{Active, Deleted, Deprovisioning, Provisioning, Updating};

        assert!(Provisioning.can_transition_to(Active));
        assert!(Active.can_transition_to(Deprovisioning));
        assert!(Deprovisioning.can_transition_to(Deleted));
        assert!(Deprovisioning.can_transition_to(Active));
        assert!(Active.can_transition_to(Updating));
        assert!(Updating.can_transition_to(Active));

        assert!(!Active.can_transition_to(Deleted));
        assert!(!Deleted.can_transition_to(Active));
        assert!(!Provisioning.can_transition_to(Deleted));
        assert!(!Updating.can_transition_to(Deprovisioning));
    }

    #[test]
    fn test_transient_states() {
        assert!(InstanceState::Provisioning.is_transient());
        assert!(InstanceState::Updating.is_transient());
        assert!(InstanceState::Deprovisioning.is_transient());
        assert!(!InstanceState::Active.is_transient());
        assert!(!InstanceState::Deleted.is_transient());
    }

    #[test]
    fn test_last_operation_lifecycle() {
        let op = LastOperation::start(OperationKind::Provision);
        assert!(op.is_in_progress());
        assert!(op.finished_at.is_none());

        let done = op.clone().succeed();
        assert_eq!(done.id, op.id);
        assert_eq!(done.state, OperationState::Succeeded);
        assert_eq!(done.description.as_deref(), Some("provision completed"));

        let failed = op.fail("quota exceeded");
        assert_eq!(failed.state, OperationState::Failed);
        assert!(failed.finished_at.is_some());
    }

    #[test]
    fn test_operation_state_wire_names() {
        let json = serde_json::to_string(&OperationState::InProgress).expect("serialize state");
        assert_eq!(json, "\"in progress\"");
    }

    #[test]
    fn test_credentials_debug_hides_values() {
        let creds = Credentials::user_password("user-1", "s3cret");
        let debug = format!("{creds:?}");
        assert!(debug.contains("password"));
        assert!(!debug.contains("s3cret"));
        assert_eq!(creds.get("userid"), Some(&serde_json::json!("user-1")));
    }
}
