//! Instance Registry: exclusive owner of service instance records.
//!
//! The registry validates plans against the catalog and enforces the
//! lifecycle state machine. It does not serialize callers on its own; the
//! broker holds the per-instance lock around every mutating call.

use crate::bindings::BindingRegistry;
use crate::error::{BrokerError, Result};
use crate::model::{InstanceState, LastOperation, ServiceInstance};
use crate::request::ProvisionRequest;
use rsb_catalog::Catalog;
use rsb_core::{InstanceId, Parameters, PlanId, RequestContext, Timestamp};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

/// Result of a registry provision.
#[derive(Debug, Clone, PartialEq)]
pub enum Provisioned {
    /// A new record was inserted
    Created(ServiceInstance),
    /// A record with the same service, plan and parameters already exists
    AlreadyExists(ServiceInstance),
}

impl Provisioned {
    /// The record, new or existing.
    #[must_use]
    pub fn instance(&self) -> &ServiceInstance {
        match self {
            Self::Created(instance) | Self::AlreadyExists(instance) => instance,
        }
    }
}

/// Registry of service instances keyed by instance id.
#[derive(Debug)]
pub struct InstanceRegistry {
    catalog: Arc<Catalog>,
    instances: RwLock<HashMap<InstanceId, ServiceInstance>>,
}

impl InstanceRegistry {
    /// Create an empty registry validating against `catalog`.
    #[must_use]
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new instance in `initial_state`, or return the identical one.
    ///
    /// A `Deleted` tombstone is replaced. An existing record with a different
    /// service, plan or parameters fails with `Conflict` and is left as is.
    pub fn provision(
        &self,
        request: &ProvisionRequest,
        initial_state: InstanceState,
    ) -> Result<Provisioned> {
        self.catalog
            .plan_for(&request.service_id, &request.plan_id)?;
        request.validate()?;

        let mut instances = self.write();

        if let Some(existing) = instances.get(&request.instance_id) {
            if !existing.is_deleted() {
                if existing.service_id == request.service_id
                    && existing.plan_id == request.plan_id
                    && existing.parameters == request.parameters
                {
                    debug!(instance_id = %request.instance_id, "Provision matches existing instance");
                    return Ok(Provisioned::AlreadyExists(existing.clone()));
                }

                warn!(
                    instance_id = %request.instance_id,
                    existing_plan = %existing.plan_id,
                    requested_plan = %request.plan_id,
                    "Provision conflicts with existing instance"
                );
                return Err(BrokerError::Conflict {
                    resource: "service instance",
                    id: request.instance_id.to_string(),
                });
            }
        }

        let now = Timestamp::now();
        let instance = ServiceInstance {
            id: request.instance_id.clone(),
            service_id: request.service_id.clone(),
            plan_id: request.plan_id.clone(),
            state: initial_state,
            parameters: request.parameters.clone(),
            context: request.context.clone(),
            dashboard_url: None,
            enabled: true,
            created_at: now,
            updated_at: now,
            last_active: now,
            last_operation: None,
        };
        instances.insert(instance.id.clone(), instance.clone());

        info!(
            instance_id = %instance.id,
            plan_id = %instance.plan_id,
            state = %instance.state,
            "Instance record created"
        );
        Ok(Provisioned::Created(instance))
    }

    /// Look up an instance, including tombstones.
    pub fn get(&self, instance_id: &InstanceId) -> Result<ServiceInstance> {
        self.read()
            .get(instance_id)
            .cloned()
            .ok_or_else(|| not_found(instance_id))
    }

    /// Look up an instance that has not been deleted.
    pub fn get_live(&self, instance_id: &InstanceId) -> Result<ServiceInstance> {
        match self.get(instance_id)? {
            instance if instance.is_deleted() => Err(not_found(instance_id)),
            instance => Ok(instance),
        }
    }

    /// Whether `instance_id` names an instance that has not been deleted.
    #[must_use]
    pub fn is_live(&self, instance_id: &InstanceId) -> bool {
        self.read()
            .get(instance_id)
            .is_some_and(|instance| !instance.is_deleted())
    }

    /// Move an instance from `from` to `to`.
    ///
    /// Fails with `Internal` if the instance is not in `from` or the
    /// transition is not part of the lifecycle.
    pub fn transition(
        &self,
        instance_id: &InstanceId,
        from: InstanceState,
        to: InstanceState,
    ) -> Result<ServiceInstance> {
        self.modify(instance_id, |instance| {
            if instance.state != from || !from.can_transition_to(to) {
                error!(
                    instance_id = %instance_id,
                    current = %instance.state,
                    from = %from,
                    to = %to,
                    "Illegal instance transition"
                );
                return Err(BrokerError::Internal(format!(
                    "illegal transition {from} -> {to} for instance {instance_id} in state {}",
                    instance.state
                )));
            }
            instance.state = to;
            debug!(instance_id = %instance_id, from = %from, to = %to, "Instance transitioned");
            Ok(())
        })
    }

    /// Commit a new plan, parameters and context.
    pub fn update_plan(
        &self,
        instance_id: &InstanceId,
        plan_id: &PlanId,
        parameters: Parameters,
        context: Option<RequestContext>,
    ) -> Result<ServiceInstance> {
        self.catalog.plan_for(&self.get(instance_id)?.service_id, plan_id)?;

        self.modify(instance_id, |instance| {
            instance.plan_id = plan_id.clone();
            instance.parameters = parameters;
            if context.is_some() {
                instance.context = context;
            }
            Ok(())
        })
    }

    /// Record the dashboard link issued by the backend.
    pub fn set_dashboard_url(
        &self,
        instance_id: &InstanceId,
        dashboard_url: Option<String>,
    ) -> Result<ServiceInstance> {
        self.modify(instance_id, |instance| {
            instance.dashboard_url = dashboard_url;
            Ok(())
        })
    }

    /// Set the enablement flag.
    pub fn set_enabled(&self, instance_id: &InstanceId, enabled: bool) -> Result<ServiceInstance> {
        self.modify(instance_id, |instance| {
            instance.enabled = enabled;
            Ok(())
        })
    }

    /// Mark the instance as used now.
    pub fn touch(&self, instance_id: &InstanceId) -> Result<()> {
        self.modify(instance_id, |_| Ok(())).map(|_| ())
    }

    /// Replace the instance's last operation record.
    pub fn record_operation(
        &self,
        instance_id: &InstanceId,
        operation: LastOperation,
    ) -> Result<ServiceInstance> {
        self.modify(instance_id, |instance| {
            instance.last_operation = Some(operation);
            Ok(())
        })
    }

    /// Roll back a failed provision so the id is absent again.
    ///
    /// Only records still in `Provisioning` may be removed.
    pub fn remove(&self, instance_id: &InstanceId) -> Result<ServiceInstance> {
        let mut instances = self.write();
        match instances.get(instance_id) {
            Some(instance) if instance.state == InstanceState::Provisioning => {
                let removed = instances.remove(instance_id).ok_or_else(|| not_found(instance_id))?;
                warn!(instance_id = %instance_id, "Rolled back failed provision");
                Ok(removed)
            }
            Some(instance) => Err(BrokerError::Internal(format!(
                "cannot roll back instance {instance_id} in state {}",
                instance.state
            ))),
            None => Err(not_found(instance_id)),
        }
    }

    /// Finish a deprovision: `Deprovisioning -> Deleted`.
    ///
    /// Re-checks that `bindings` holds nothing for the instance; the caller
    /// holds the exclusive instance lock, so no bind can race this check.
    pub fn deprovision(
        &self,
        instance_id: &InstanceId,
        bindings: &BindingRegistry,
    ) -> Result<ServiceInstance> {
        let count = bindings.count_for(instance_id);
        if count > 0 {
            return Err(BrokerError::HasActiveBindings {
                instance_id: instance_id.to_string(),
                count,
            });
        }

        let tombstone = self.transition(
            instance_id,
            InstanceState::Deprovisioning,
            InstanceState::Deleted,
        )?;
        info!(instance_id = %instance_id, "Instance deleted");
        Ok(tombstone)
    }

    /// Number of records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Check if the registry has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of instances that have not been deleted.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.read()
            .values()
            .filter(|instance| !instance.is_deleted())
            .count()
    }

    /// Confirm every live instance's plan resolves in the catalog.
    pub fn verify_plans(&self) -> Result<()> {
        for instance in self.read().values().filter(|i| !i.is_deleted()) {
            if self.catalog.find_plan(&instance.plan_id).is_err() {
                error!(instance_id = %instance.id, plan_id = %instance.plan_id, "Instance plan missing from catalog");
                return Err(BrokerError::Internal(format!(
                    "instance {} references unknown plan {}",
                    instance.id, instance.plan_id
                )));
            }
        }
        Ok(())
    }

    fn modify<F>(&self, instance_id: &InstanceId, f: F) -> Result<ServiceInstance>
    where
        F: FnOnce(&mut ServiceInstance) -> Result<()>,
    {
        let mut instances = self.write();
        let instance = instances
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;
        f(instance)?;
        let now = Timestamp::now();
        instance.updated_at = now;
        instance.last_active = now;
        Ok(instance.clone())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<InstanceId, ServiceInstance>> {
        self.instances.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<InstanceId, ServiceInstance>> {
        self.instances.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(instance_id: &InstanceId) -> BrokerError {
    BrokerError::NotFound {
        instance_id: instance_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsb_catalog::{Plan, PlanMetadata, ServiceMetadata, ServiceOffering};
    use rsb_core::ServiceId;

    fn plan(id: &str) -> Plan {
        Plan {
            id: PlanId::new(id).expect("valid plan ID"),
            name: id.to_string(),
            description: format!("{id} plan"),
            free: false,
            bindable: None,
            metadata: PlanMetadata::default(),
        }
    }

    fn registry() -> InstanceRegistry {
        let service = ServiceOffering {
            id: ServiceId::new("db").expect("valid service ID"),
            name: "database".to_string(),
            description: "Managed database".to_string(),
            bindable: true,
            plan_updateable: true,
            tags: Vec::new(),
            metadata: ServiceMetadata::default(),
            plans: vec![plan("gold"), plan("silver")],
        };
        InstanceRegistry::new(Arc::new(Catalog::new(vec![service]).expect("valid catalog")))
    }

    fn request(instance: &str, plan: &str) -> ProvisionRequest {
        ProvisionRequest::new(
            InstanceId::new(instance).expect("valid instance ID"),
            ServiceId::new("db").expect("valid service ID"),
            PlanId::new(plan).expect("valid plan ID"),
        )
    }

    #[test]
    fn test_provision_is_idempotent() {
        let registry = registry();

        let first = registry
            .provision(&request("i1", "gold"), InstanceState::Active)
            .expect("first provision");
        assert!(matches!(first, Provisioned::Created(_)));

        let second = registry
            .provision(&request("i1", "gold"), InstanceState::Active)
            .expect("second provision");
        assert!(matches!(second, Provisioned::AlreadyExists(_)));
        assert_eq!(first.instance(), second.instance());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_provision_conflict_leaves_record() {
        let registry = registry();
        registry
            .provision(&request("i1", "gold"), InstanceState::Active)
            .expect("provision gold");

        let result = registry.provision(&request("i1", "silver"), InstanceState::Active);
        assert!(matches!(result, Err(BrokerError::Conflict { .. })));

        let id = InstanceId::new("i1").expect("valid instance ID");
        assert_eq!(registry.get(&id).expect("get").plan_id.as_str(), "gold");
    }

    #[test]
    fn test_provision_unknown_plan() {
        let registry = registry();
        let result = registry.provision(&request("i1", "bronze"), InstanceState::Active);
        assert!(matches!(result, Err(BrokerError::PlanNotFound { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_illegal_transition_is_internal() {
        let registry = registry();
        registry
            .provision(&request("i1", "gold"), InstanceState::Active)
            .expect("provision");
        let id = InstanceId::new("i1").expect("valid instance ID");

        let err = registry
            .transition(&id, InstanceState::Active, InstanceState::Deleted)
            .expect_err("active -> deleted is illegal");
        assert!(err.is_internal());

        let err = registry
            .transition(&id, InstanceState::Provisioning, InstanceState::Active)
            .expect_err("state mismatch");
        assert!(err.is_internal());
    }

    #[test]
    fn test_remove_only_while_provisioning() {
        let registry = registry();
        registry
            .provision(&request("i1", "gold"), InstanceState::Provisioning)
            .expect("provision i1");
        registry
            .provision(&request("i2", "gold"), InstanceState::Active)
            .expect("provision i2");

        let i1 = InstanceId::new("i1").expect("valid instance ID");
        let i2 = InstanceId::new("i2").expect("valid instance ID");

        registry.remove(&i1).expect("roll back i1");
        assert!(matches!(registry.get(&i1), Err(BrokerError::NotFound { .. })));
        assert!(registry.remove(&i2).expect_err("active").is_internal());
    }

    #[test]
    fn test_tombstone_can_be_reprovisioned() {
        let registry = registry();
        let bindings = BindingRegistry::new();
        let id = InstanceId::new("i1").expect("valid instance ID");

        registry
            .provision(&request("i1", "gold"), InstanceState::Active)
            .expect("provision");
        registry
            .transition(&id, InstanceState::Active, InstanceState::Deprovisioning)
            .expect("mark deprovisioning");
        let tombstone = registry.deprovision(&id, &bindings).expect("deprovision");
        assert!(tombstone.is_deleted());
        assert!(!registry.is_live(&id));
        assert!(registry.get_live(&id).is_err());

        let again = registry
            .provision(&request("i1", "silver"), InstanceState::Active)
            .expect("re-provision");
        assert!(matches!(again, Provisioned::Created(_)));
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn test_update_plan_rejects_foreign_plan() {
        let registry = registry();
        registry
            .provision(&request("i1", "gold"), InstanceState::Active)
            .expect("provision");
        let id = InstanceId::new("i1").expect("valid instance ID");

        let updated = registry
            .update_plan(&id, &PlanId::new("silver").expect("valid plan ID"), Parameters::new(), None)
            .expect("update to silver");
        assert_eq!(updated.plan_id.as_str(), "silver");

        let result =
            registry.update_plan(&id, &PlanId::new("bronze").expect("valid plan ID"), Parameters::new(), None);
        assert!(matches!(result, Err(BrokerError::PlanNotFound { .. })));
    }
}
