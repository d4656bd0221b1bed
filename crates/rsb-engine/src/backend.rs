//! Downstream provisioning contract.
//!
//! The broker calls a [`ServiceBackend`] for the side effects of each
//! lifecycle step. Synchronous calls run under the instance lock; a failed
//! provision is rolled back to absent and a failed update or deprovision
//! leaves the instance `Active`. Asynchronous calls run without the lock
//! while the instance sits in its transient state; a failed asynchronous
//! provision leaves a stalled `Provisioning` record that an identical
//! provision retries and a deprovision discards. A panicking call is
//! reported as [`BackendError::Panicked`].

use crate::error::BackendError;
use crate::model::{Binding, Credentials, ServiceInstance};
use crate::request::BindRequest;
use async_trait::async_trait;
use rsb_core::{Parameters, PlanId};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// What the backend created for a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    /// Management dashboard for the instance
    pub dashboard_url: Option<String>,
}

/// Infrastructure that actually realizes instances and bindings.
#[async_trait]
pub trait ServiceBackend: Send + Sync {
    /// Create the resources behind a new instance.
    async fn provision(
        &self,
        instance: &ServiceInstance,
    ) -> std::result::Result<ProvisionedResource, BackendError>;

    /// Apply a plan or parameter change.
    async fn update(
        &self,
        instance: &ServiceInstance,
        plan_id: &PlanId,
        parameters: &Parameters,
    ) -> std::result::Result<(), BackendError>;

    /// Tear down an instance's resources.
    async fn deprovision(&self, instance: &ServiceInstance)
        -> std::result::Result<(), BackendError>;

    /// Issue credentials for a binding.
    async fn bind(
        &self,
        instance: &ServiceInstance,
        request: &BindRequest,
    ) -> std::result::Result<Credentials, BackendError>;

    /// Revoke a binding's credentials.
    async fn unbind(&self, binding: &Binding) -> std::result::Result<(), BackendError>;
}

/// In-memory backend that completes immediately.
///
/// Issues a dashboard link under `base_url` and random `userid` / `password`
/// credentials.
#[derive(Debug, Clone)]
pub struct DefaultBackend {
    base_url: String,
}

impl DefaultBackend {
    /// Create a backend that links dashboards under `base_url`.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Dashboard link for an instance.
    #[must_use]
    pub fn dashboard_url(&self, instance: &ServiceInstance) -> String {
        format!("{}/dashboard/{}", self.base_url, instance.id)
    }
}

#[async_trait]
impl ServiceBackend for DefaultBackend {
    async fn provision(
        &self,
        instance: &ServiceInstance,
    ) -> std::result::Result<ProvisionedResource, BackendError> {
        debug!(instance_id = %instance.id, "Default backend provision");
        Ok(ProvisionedResource {
            dashboard_url: Some(self.dashboard_url(instance)),
        })
    }

    async fn update(
        &self,
        instance: &ServiceInstance,
        plan_id: &PlanId,
        _parameters: &Parameters,
    ) -> std::result::Result<(), BackendError> {
        debug!(instance_id = %instance.id, plan_id = %plan_id, "Default backend update");
        Ok(())
    }

    async fn deprovision(
        &self,
        instance: &ServiceInstance,
    ) -> std::result::Result<(), BackendError> {
        debug!(instance_id = %instance.id, "Default backend deprovision");
        Ok(())
    }

    async fn bind(
        &self,
        instance: &ServiceInstance,
        request: &BindRequest,
    ) -> std::result::Result<Credentials, BackendError> {
        debug!(
            instance_id = %instance.id,
            binding_id = %request.binding_id,
            "Default backend bind"
        );
        Ok(Credentials::user_password(
            Uuid::new_v4().to_string(),
            Uuid::new_v4().to_string(),
        ))
    }

    async fn unbind(&self, binding: &Binding) -> std::result::Result<(), BackendError> {
        debug!(
            instance_id = %binding.instance_id,
            binding_id = %binding.id,
            "Default backend unbind"
        );
        Ok(())
    }
}
