//! Broker state machine.
//!
//! Every public operation runs in its own spawned task. A caller that drops
//! the returned future therefore never interrupts a transition halfway; the
//! task finishes, commits, and records its outcome, and a retried identical
//! request observes the committed result.
//!
//! Lock discipline:
//! - provision, update, deprovision and enablement take the instance lock
//!   exclusively;
//! - bind and unbind take the instance lock shared, then the binding lock
//!   exclusively.
//!
//! Asynchronous work runs without the instance lock; the transient state
//! (`Provisioning`, `Updating`, `Deprovisioning`) keeps other operations off
//! the instance until the background task re-takes the lock and commits.
//!
//! Backend calls are awaited through [`contained`], so a panicking backend
//! takes the same rollback path as a failing one.

use crate::backend::{DefaultBackend, ServiceBackend};
use crate::bindings::BindingRegistry;
use crate::error::{BackendError, BrokerError, Result};
use crate::instances::{InstanceRegistry, Provisioned};
use crate::lock::{BindingKey, LockGuard, LockTable};
use crate::model::{
    Binding, InstanceState, InstanceStatus, LastOperation, OperationKind, ServiceInstance,
};
use crate::oplog::{OperationLog, RecordedOutcome};
use crate::request::{
    BindOutcome, BindRequest, DeprovisionOutcome, DeprovisionRequest, EnableRequest,
    ProvisionOutcome, ProvisionRequest, UnbindOutcome, UnbindRequest, UpdateOutcome,
    UpdateRequest,
};
use rsb_catalog::Catalog;
use rsb_core::{
    BrokerConfig, BrokerSettings, InstanceId, Parameters, PlanId, RequestContext,
};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The resource service broker.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    catalog: Arc<Catalog>,
    instances: InstanceRegistry,
    bindings: BindingRegistry,
    instance_locks: LockTable<InstanceId>,
    binding_locks: LockTable<BindingKey>,
    backend: Arc<dyn ServiceBackend>,
    settings: BrokerSettings,
    oplog: OperationLog,
}

impl Broker {
    /// Create a broker over `catalog` that drives `backend`.
    #[must_use]
    pub fn new(
        catalog: Arc<Catalog>,
        settings: BrokerSettings,
        backend: Arc<dyn ServiceBackend>,
    ) -> Self {
        let timeout = Duration::from_millis(settings.lock_timeout_ms);
        info!(
            plans = catalog.plan_count(),
            async_supported = settings.async_supported,
            async_required = settings.async_required,
            lock_timeout_ms = settings.lock_timeout_ms,
            "Broker initialized"
        );

        Self {
            inner: Arc::new(BrokerInner {
                instances: InstanceRegistry::new(Arc::clone(&catalog)),
                catalog,
                bindings: BindingRegistry::new(),
                instance_locks: LockTable::new(timeout),
                binding_locks: LockTable::new(timeout),
                backend,
                settings,
                oplog: OperationLog::new(),
            }),
        }
    }

    /// Create a broker from configuration with the [`DefaultBackend`].
    #[must_use]
    pub fn from_config(config: &BrokerConfig, catalog: Arc<Catalog>) -> Self {
        let backend = Arc::new(DefaultBackend::new(config.general.base_url.clone()));
        Self::new(catalog, config.broker.clone(), backend)
    }

    /// Provision a service instance.
    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionOutcome> {
        let inner = Arc::clone(&self.inner);
        run(async move {
            let result = inner.provision(&request).await;
            inner.oplog.record(
                OperationKind::Provision,
                &request.instance_id,
                None,
                recorded(&result, |outcome| match outcome {
                    ProvisionOutcome::Created(_) => RecordedOutcome::Created,
                    ProvisionOutcome::AlreadyExists(_) => RecordedOutcome::AlreadyExists,
                    ProvisionOutcome::InProgress { .. } => RecordedOutcome::Accepted,
                }),
                request.originating_identity.as_ref(),
            );
            result
        })
        .await
    }

    /// Change an instance's plan or parameters.
    pub async fn update(&self, request: UpdateRequest) -> Result<UpdateOutcome> {
        let inner = Arc::clone(&self.inner);
        run(async move {
            let result = inner.update(&request).await;
            inner.oplog.record(
                OperationKind::Update,
                &request.instance_id,
                None,
                recorded(&result, |outcome| match outcome {
                    UpdateOutcome::Updated(_) => RecordedOutcome::Updated,
                    UpdateOutcome::Unchanged(_) => RecordedOutcome::Unchanged,
                    UpdateOutcome::InProgress { .. } => RecordedOutcome::Accepted,
                }),
                request.originating_identity.as_ref(),
            );
            result
        })
        .await
    }

    /// Deprovision a service instance, optionally unbinding it first.
    pub async fn deprovision(&self, request: DeprovisionRequest) -> Result<DeprovisionOutcome> {
        let inner = Arc::clone(&self.inner);
        run(async move {
            let result = inner.deprovision(&request).await;
            inner.oplog.record(
                OperationKind::Deprovision,
                &request.instance_id,
                None,
                recorded(&result, |outcome| match outcome {
                    DeprovisionOutcome::Deleted(_) => RecordedOutcome::Deleted,
                    DeprovisionOutcome::InProgress { .. } => RecordedOutcome::Accepted,
                }),
                request.originating_identity.as_ref(),
            );
            result
        })
        .await
    }

    /// Issue credentials against an active instance.
    pub async fn bind(&self, request: BindRequest) -> Result<BindOutcome> {
        let inner = Arc::clone(&self.inner);
        run(async move {
            let result = inner.bind(&request).await;
            inner.oplog.record(
                OperationKind::Bind,
                &request.instance_id,
                Some(&request.binding_id),
                recorded(&result, |outcome| match outcome {
                    BindOutcome::Created(_) => RecordedOutcome::Created,
                    BindOutcome::AlreadyExists(_) => RecordedOutcome::AlreadyExists,
                }),
                request.originating_identity.as_ref(),
            );
            result
        })
        .await
    }

    /// Revoke a binding. An absent binding is reported as `NotFound`.
    pub async fn unbind(&self, request: UnbindRequest) -> Result<UnbindOutcome> {
        let inner = Arc::clone(&self.inner);
        run(async move {
            let result = inner.unbind(&request).await;
            inner.oplog.record(
                OperationKind::Unbind,
                &request.instance_id,
                Some(&request.binding_id),
                recorded(&result, |outcome| match outcome {
                    UnbindOutcome::Deleted(_) => RecordedOutcome::Deleted,
                    UnbindOutcome::NotFound => RecordedOutcome::NotFound,
                }),
                request.originating_identity.as_ref(),
            );
            result
        })
        .await
    }

    /// Enable or disable an instance.
    pub async fn set_enabled(
        &self,
        instance_id: &InstanceId,
        request: EnableRequest,
    ) -> Result<ServiceInstance> {
        let inner = Arc::clone(&self.inner);
        let instance_id = instance_id.clone();
        run(async move {
            let result = inner.set_enabled(&instance_id, &request).await;
            inner.oplog.record(
                OperationKind::Enable,
                &instance_id,
                None,
                recorded(&result, |(_, changed)| {
                    if *changed {
                        RecordedOutcome::Updated
                    } else {
                        RecordedOutcome::Unchanged
                    }
                }),
                None,
            );
            result.map(|(instance, _)| instance)
        })
        .await
    }

    /// Look up an instance. Deleted instances are returned as tombstones.
    pub fn get_instance(&self, instance_id: &InstanceId) -> Result<ServiceInstance> {
        self.inner.instances.get(instance_id)
    }

    /// Poll the last provision, update or deprovision on an instance.
    ///
    /// When `operation_id` is given it must name the instance's most recent
    /// operation.
    pub fn last_operation(
        &self,
        instance_id: &InstanceId,
        operation_id: Option<Uuid>,
    ) -> Result<LastOperation> {
        let instance = self.inner.instances.get(instance_id)?;
        let operation = instance
            .last_operation
            .ok_or_else(|| BrokerError::NotFound {
                instance_id: instance_id.to_string(),
            })?;

        match operation_id {
            Some(id) if id != operation.id => {
                debug!(instance_id = %instance_id, requested = %id, "Stale operation handle");
                Err(BrokerError::InvalidRequest(format!(
                    "operation {id} is not the latest operation on instance {instance_id}"
                )))
            }
            _ => Ok(operation),
        }
    }

    /// Enablement view of a live instance.
    pub fn instance_status(&self, instance_id: &InstanceId) -> Result<InstanceStatus> {
        let instance = self.inner.instances.get_live(instance_id)?;
        Ok(InstanceStatus {
            enabled: instance.enabled,
            active: instance.is_active(),
            last_active: instance.last_active.timestamp_millis(),
        })
    }

    /// The immutable catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    /// Runtime settings.
    #[must_use]
    pub fn settings(&self) -> &BrokerSettings {
        &self.inner.settings
    }

    /// Terminal outcome of every operation so far.
    #[must_use]
    pub fn operation_log(&self) -> &OperationLog {
        &self.inner.oplog
    }

    /// All bindings owned by an instance.
    #[must_use]
    pub fn bindings_for(&self, instance_id: &InstanceId) -> Vec<Binding> {
        self.inner.bindings.list_by_instance(instance_id)
    }

    /// Verify cross-registry invariants.
    ///
    /// Fails with `Internal` if a binding outlived its instance or a live
    /// instance references a plan missing from the catalog.
    pub fn check_invariants(&self) -> Result<()> {
        self.inner.bindings.verify_owners(&self.inner.instances)?;
        self.inner.instances.verify_plans()
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("settings", &self.inner.settings)
            .field("instances", &self.inner.instances.len())
            .field("bindings", &self.inner.bindings.len())
            .finish_non_exhaustive()
    }
}

impl BrokerInner {
    fn admit(&self, accepts_incomplete: bool) -> Result<bool> {
        if self.settings.async_required && !accepts_incomplete {
            warn!("Rejected synchronous request; broker requires async");
            return Err(BrokerError::AsyncRequired);
        }
        Ok(self.settings.async_supported && accepts_incomplete)
    }

    async fn provision(self: &Arc<Self>, request: &ProvisionRequest) -> Result<ProvisionOutcome> {
        let run_async = self.admit(request.accepts_incomplete)?;
        let guard = self.instance_locks.write(&request.instance_id).await?;

        let instance = match self
            .instances
            .provision(request, InstanceState::Provisioning)?
        {
            Provisioned::Created(instance) => instance,
            Provisioned::AlreadyExists(existing) => match existing.state {
                InstanceState::Provisioning if existing.is_stalled() => {
                    info!(instance_id = %existing.id, "Retrying failed provision");
                    existing
                }
                InstanceState::Provisioning if request.accepts_incomplete => {
                    let operation = existing
                        .last_operation
                        .clone()
                        .ok_or_else(|| missing_operation(&existing.id))?;
                    return Ok(ProvisionOutcome::InProgress {
                        instance: existing,
                        operation,
                    });
                }
                state if state.is_transient() => {
                    return Err(BrokerError::OperationInProgress {
                        instance_id: existing.id.to_string(),
                    })
                }
                _ => return Ok(ProvisionOutcome::AlreadyExists(existing)),
            },
        };

        let operation = LastOperation::start(OperationKind::Provision);
        let instance = self
            .instances
            .record_operation(&instance.id, operation.clone())?;

        if run_async {
            info!(instance_id = %instance.id, operation_id = %operation.id, "Provision accepted");
            drop(guard);
            tokio::spawn(Arc::clone(self).complete_provision(instance.clone(), operation.clone()));
            return Ok(ProvisionOutcome::InProgress {
                instance,
                operation,
            });
        }

        match contained(self.backend.provision(&instance)).await {
            Ok(resource) => {
                let instance = self.commit_provision(&instance.id, resource.dashboard_url, operation)?;
                drop(guard);
                Ok(ProvisionOutcome::Created(instance))
            }
            Err(err) => {
                warn!(instance_id = %instance.id, error = %err, "Backend provision failed");
                self.instances.remove(&instance.id)?;
                Err(err.into())
            }
        }
    }

    fn commit_provision(
        &self,
        instance_id: &InstanceId,
        dashboard_url: Option<String>,
        operation: LastOperation,
    ) -> Result<ServiceInstance> {
        self.instances.set_dashboard_url(instance_id, dashboard_url)?;
        self.instances
            .transition(instance_id, InstanceState::Provisioning, InstanceState::Active)?;
        let instance = self.instances.record_operation(instance_id, operation.succeed())?;
        info!(instance_id = %instance_id, plan_id = %instance.plan_id, "Instance provisioned");
        Ok(instance)
    }

    async fn complete_provision(self: Arc<Self>, instance: ServiceInstance, operation: LastOperation) {
        let result = contained(self.backend.provision(&instance)).await;
        let _guard = self.relock(&instance.id).await;

        let committed = match result {
            Ok(resource) => self
                .commit_provision(&instance.id, resource.dashboard_url, operation)
                .map(|_| RecordedOutcome::Created),
            Err(err) => {
                warn!(instance_id = %instance.id, error = %err, "Async provision failed");
                self.record_failure(&instance.id, operation, err)
            }
        };
        self.finish(OperationKind::Provision, &instance.id, committed);
    }

    async fn update(self: &Arc<Self>, request: &UpdateRequest) -> Result<UpdateOutcome> {
        let run_async = self.admit(request.accepts_incomplete)?;
        request.validate()?;
        let guard = self.instance_locks.write(&request.instance_id).await?;

        let instance = self.instances.get_live(&request.instance_id)?;
        if instance.state.is_transient() {
            return Err(BrokerError::OperationInProgress {
                instance_id: instance.id.to_string(),
            });
        }
        if instance.service_id != request.service_id {
            return Err(BrokerError::InvalidRequest(format!(
                "service instance {} belongs to service {}, not {}",
                instance.id, instance.service_id, request.service_id
            )));
        }
        if let Some(previous) = &request.previous_plan_id {
            if previous != &instance.plan_id {
                warn!(
                    instance_id = %instance.id,
                    previous = %previous,
                    current = %instance.plan_id,
                    "Previous plan does not match current plan"
                );
            }
        }

        let plan_id = request
            .plan_id
            .clone()
            .unwrap_or_else(|| instance.plan_id.clone());
        self.catalog.plan_for(&instance.service_id, &plan_id)?;
        if plan_id != instance.plan_id && !self.catalog.is_plan_updateable(&instance.plan_id)? {
            return Err(BrokerError::PlanChangeNotSupported {
                instance_id: instance.id.to_string(),
                from: instance.plan_id.to_string(),
                to: plan_id.to_string(),
            });
        }

        let parameters = request
            .parameters
            .clone()
            .unwrap_or_else(|| instance.parameters.clone());
        if plan_id == instance.plan_id && parameters == instance.parameters {
            debug!(instance_id = %instance.id, "Update matches current instance");
            return Ok(UpdateOutcome::Unchanged(instance));
        }

        let operation = LastOperation::start(OperationKind::Update);
        self.instances
            .record_operation(&instance.id, operation.clone())?;

        if run_async {
            let instance = self.instances.transition(
                &instance.id,
                InstanceState::Active,
                InstanceState::Updating,
            )?;
            info!(instance_id = %instance.id, operation_id = %operation.id, "Update accepted");
            drop(guard);
            tokio::spawn(Arc::clone(self).complete_update(
                instance.clone(),
                PendingUpdate {
                    plan_id,
                    parameters,
                    context: request.context.clone(),
                },
                operation.clone(),
            ));
            return Ok(UpdateOutcome::InProgress {
                instance,
                operation,
            });
        }

        match contained(self.backend.update(&instance, &plan_id, &parameters)).await {
            Ok(()) => {
                self.instances.update_plan(
                    &instance.id,
                    &plan_id,
                    parameters,
                    request.context.clone(),
                )?;
                let updated = self
                    .instances
                    .record_operation(&instance.id, operation.succeed())?;
                info!(instance_id = %updated.id, plan_id = %updated.plan_id, "Instance updated");
                drop(guard);
                Ok(UpdateOutcome::Updated(updated))
            }
            Err(err) => {
                warn!(instance_id = %instance.id, error = %err, "Backend update failed");
                self.instances
                    .record_operation(&instance.id, operation.fail(err.to_string()))?;
                Err(err.into())
            }
        }
    }

    async fn complete_update(
        self: Arc<Self>,
        instance: ServiceInstance,
        pending: PendingUpdate,
        operation: LastOperation,
    ) {
        let result = contained(self.backend.update(
            &instance,
            &pending.plan_id,
            &pending.parameters,
        ))
        .await;
        let _guard = self.relock(&instance.id).await;

        let committed = self
            .instances
            .transition(&instance.id, InstanceState::Updating, InstanceState::Active)
            .and_then(|_| match result {
                Ok(()) => {
                    self.instances.update_plan(
                        &instance.id,
                        &pending.plan_id,
                        pending.parameters,
                        pending.context,
                    )?;
                    info!(instance_id = %instance.id, plan_id = %pending.plan_id, "Instance updated");
                    self.instances
                        .record_operation(&instance.id, operation.succeed())
                        .map(|_| RecordedOutcome::Updated)
                }
                Err(err) => {
                    warn!(instance_id = %instance.id, error = %err, "Async update failed");
                    self.record_failure(&instance.id, operation, err)
                }
            });
        self.finish(OperationKind::Update, &instance.id, committed);
    }

    async fn deprovision(
        self: &Arc<Self>,
        request: &DeprovisionRequest,
    ) -> Result<DeprovisionOutcome> {
        let run_async = self.admit(request.accepts_incomplete)?;
        let guard = self.instance_locks.write(&request.instance_id).await?;

        let instance = self.instances.get_live(&request.instance_id)?;
        if let Some(service_id) = &request.service_id {
            if service_id != &instance.service_id {
                return Err(BrokerError::InvalidRequest(format!(
                    "service instance {} belongs to service {}, not {service_id}",
                    instance.id, instance.service_id
                )));
            }
        }

        match instance.state {
            InstanceState::Active => {}
            InstanceState::Provisioning if instance.is_stalled() => {
                return self.discard_stalled(&instance);
            }
            InstanceState::Deprovisioning if request.accepts_incomplete => {
                let operation = instance
                    .last_operation
                    .ok_or_else(|| missing_operation(&instance.id))?;
                return Ok(DeprovisionOutcome::InProgress { operation });
            }
            _ => {
                return Err(BrokerError::OperationInProgress {
                    instance_id: instance.id.to_string(),
                })
            }
        }

        let bindings = self.bindings.list_by_instance(&instance.id);
        if !bindings.is_empty() {
            if !request.cascade {
                warn!(
                    instance_id = %instance.id,
                    count = bindings.len(),
                    "Deprovision refused; instance has bindings"
                );
                return Err(BrokerError::HasActiveBindings {
                    instance_id: instance.id.to_string(),
                    count: bindings.len(),
                });
            }

            for binding in bindings {
                contained(self.backend.unbind(&binding)).await?;
                self.bindings.unbind(&binding.instance_id, &binding.id);
                debug!(instance_id = %instance.id, binding_id = %binding.id, "Cascade unbind");
            }
        }

        self.instances.transition(
            &instance.id,
            InstanceState::Active,
            InstanceState::Deprovisioning,
        )?;
        let operation = LastOperation::start(OperationKind::Deprovision);
        let instance = self
            .instances
            .record_operation(&instance.id, operation.clone())?;

        if run_async {
            info!(instance_id = %instance.id, operation_id = %operation.id, "Deprovision accepted");
            drop(guard);
            tokio::spawn(Arc::clone(self).complete_deprovision(instance, operation.clone()));
            return Ok(DeprovisionOutcome::InProgress { operation });
        }

        let result = contained(self.backend.deprovision(&instance)).await;
        let tombstone = self.commit_deprovision(&instance.id, result, operation)?;
        drop(guard);
        Ok(DeprovisionOutcome::Deleted(tombstone))
    }

    /// Tear down an instance whose provisioning failed. The backend holds
    /// nothing for it, so the record goes straight to `Deleted`.
    fn discard_stalled(&self, instance: &ServiceInstance) -> Result<DeprovisionOutcome> {
        self.instances.transition(
            &instance.id,
            InstanceState::Provisioning,
            InstanceState::Deprovisioning,
        )?;
        let operation = LastOperation::start(OperationKind::Deprovision);
        self.instances.deprovision(&instance.id, &self.bindings)?;
        let tombstone = self
            .instances
            .record_operation(&instance.id, operation.succeed())?;
        info!(instance_id = %instance.id, "Discarded failed provision");
        Ok(DeprovisionOutcome::Deleted(tombstone))
    }

    fn commit_deprovision(
        &self,
        instance_id: &InstanceId,
        result: std::result::Result<(), BackendError>,
        operation: LastOperation,
    ) -> Result<ServiceInstance> {
        match result {
            Ok(()) => {
                self.instances.deprovision(instance_id, &self.bindings)?;
                self.instances
                    .record_operation(instance_id, operation.succeed())
            }
            Err(err) => {
                warn!(instance_id = %instance_id, error = %err, "Backend deprovision failed");
                self.instances.transition(
                    instance_id,
                    InstanceState::Deprovisioning,
                    InstanceState::Active,
                )?;
                self.instances
                    .record_operation(instance_id, operation.fail(err.to_string()))?;
                Err(err.into())
            }
        }
    }

    async fn complete_deprovision(self: Arc<Self>, instance: ServiceInstance, operation: LastOperation) {
        let result = contained(self.backend.deprovision(&instance)).await;
        let _guard = self.relock(&instance.id).await;

        let committed = match self.commit_deprovision(&instance.id, result, operation) {
            Ok(_) => Ok(RecordedOutcome::Deleted),
            Err(err @ BrokerError::Backend(_)) => Ok(RecordedOutcome::Rejected {
                error: err.to_string(),
            }),
            Err(err) => Err(err),
        };
        self.finish(OperationKind::Deprovision, &instance.id, committed);
    }

    async fn bind(&self, request: &BindRequest) -> Result<BindOutcome> {
        let _instance_guard = self.instance_locks.read(&request.instance_id).await?;
        let _binding_guard = self
            .binding_locks
            .write(&BindingKey::new(
                request.instance_id.clone(),
                request.binding_id.clone(),
            ))
            .await?;

        if let Some(existing) = self.bindings.check_existing(request)? {
            return Ok(BindOutcome::AlreadyExists(existing));
        }

        let instance = match self.instances.get(&request.instance_id) {
            Ok(instance) if instance.is_active() => instance,
            _ => {
                return Err(BrokerError::InstanceNotFound {
                    instance_id: request.instance_id.to_string(),
                })
            }
        };

        if !self.catalog.is_bindable(&instance.plan_id)? {
            return Err(BrokerError::NotBindable {
                plan_id: instance.plan_id.to_string(),
            });
        }
        if request.app_guid.is_none() && !self.settings.service_keys_supported {
            return Err(BrokerError::RequiresApp);
        }

        let credentials = contained(self.backend.bind(&instance, request)).await?;
        let outcome = self.bindings.bind(&self.instances, request, credentials)?;
        self.instances.touch(&instance.id)?;
        Ok(outcome)
    }

    async fn unbind(&self, request: &UnbindRequest) -> Result<UnbindOutcome> {
        let _instance_guard = self.instance_locks.read(&request.instance_id).await?;
        let _binding_guard = self
            .binding_locks
            .write(&BindingKey::new(
                request.instance_id.clone(),
                request.binding_id.clone(),
            ))
            .await?;

        let Some(binding) = self
            .bindings
            .find(&request.instance_id, &request.binding_id)
        else {
            debug!(
                instance_id = %request.instance_id,
                binding_id = %request.binding_id,
                "Unbind of absent binding"
            );
            return Ok(UnbindOutcome::NotFound);
        };

        contained(self.backend.unbind(&binding)).await?;
        let outcome = self.bindings.unbind(&request.instance_id, &request.binding_id);
        if self.instances.is_live(&request.instance_id) {
            self.instances.touch(&request.instance_id)?;
        }
        Ok(outcome)
    }

    async fn set_enabled(
        &self,
        instance_id: &InstanceId,
        request: &EnableRequest,
    ) -> Result<(ServiceInstance, bool)> {
        request.validate()?;
        let _guard = self.instance_locks.write(instance_id).await?;

        let instance = self.instances.get_live(instance_id)?;
        if instance.enabled == request.enabled {
            return Ok((instance, false));
        }

        let instance = self.instances.set_enabled(instance_id, request.enabled)?;
        info!(
            instance_id = %instance_id,
            enabled = request.enabled,
            initiator = %request.initiator_id,
            reason = %request.reason_code,
            "Instance enablement changed"
        );
        Ok((instance, true))
    }

    /// Mark a background operation failed and describe it for the log.
    fn record_failure(
        &self,
        instance_id: &InstanceId,
        operation: LastOperation,
        err: BackendError,
    ) -> Result<RecordedOutcome> {
        self.instances
            .record_operation(instance_id, operation.fail(err.to_string()))?;
        Ok(RecordedOutcome::Rejected {
            error: BrokerError::Backend(err).to_string(),
        })
    }

    /// Log how a background operation ended.
    fn finish(&self, kind: OperationKind, instance_id: &InstanceId, committed: Result<RecordedOutcome>) {
        let outcome = committed.unwrap_or_else(|err| {
            error!(
                instance_id = %instance_id,
                operation = %kind,
                error = %err,
                "Failed to commit background operation"
            );
            RecordedOutcome::Rejected {
                error: err.to_string(),
            }
        });
        self.oplog.record(kind, instance_id, None, outcome, None);
    }

    /// Re-take the instance lock for a background commit. Only short-lived
    /// holders contend here, so the loop ends once they release.
    async fn relock(&self, instance_id: &InstanceId) -> LockGuard<InstanceId> {
        loop {
            match self.instance_locks.write(instance_id).await {
                Ok(guard) => return guard,
                Err(err) => debug!(instance_id = %instance_id, error = %err, "Retrying commit lock"),
            }
        }
    }
}

struct PendingUpdate {
    plan_id: PlanId,
    parameters: Parameters,
    context: Option<RequestContext>,
}

/// Await a backend call, reporting a panic as [`BackendError::Panicked`].
async fn contained<T>(
    call: impl Future<Output = std::result::Result<T, BackendError>>,
) -> std::result::Result<T, BackendError> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|message| (*message).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(reason = %reason, "Backend call panicked");
            Err(BackendError::Panicked(reason))
        }
    }
}

/// Run an operation to completion on its own task.
async fn run<T, F>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|err| BrokerError::Internal(format!("operation task failed: {err}")))?
}

fn recorded<T>(result: &Result<T>, success: impl FnOnce(&T) -> RecordedOutcome) -> RecordedOutcome {
    match result {
        Ok(value) => success(value),
        Err(err) => RecordedOutcome::Rejected {
            error: err.to_string(),
        },
    }
}

fn missing_operation(instance_id: &InstanceId) -> BrokerError {
    BrokerError::Internal(format!(
        "instance {instance_id} is in a transient state without an operation"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsb_catalog::{Plan, PlanMetadata, ServiceMetadata, ServiceOffering};
    use rsb_core::{BindingId, ServiceId};

    fn catalog() -> Arc<Catalog> {
        let plan = |id: &str, bindable: Option<bool>| Plan {
            id: PlanId::new(id).expect("valid plan ID"),
            name: id.to_string(),
            description: format!("{id} plan"),
            free: false,
            bindable,
            metadata: PlanMetadata::default(),
        };
        let service = ServiceOffering {
            id: ServiceId::new("db").expect("valid service ID"),
            name: "database".to_string(),
            description: "Managed database".to_string(),
            bindable: true,
            plan_updateable: true,
            tags: Vec::new(),
            metadata: ServiceMetadata::default(),
            plans: vec![plan("gold", None), plan("silver", None), plan("archive", Some(false))],
        };
        Arc::new(Catalog::new(vec![service]).expect("valid catalog"))
    }

    fn broker(settings: BrokerSettings) -> Broker {
        Broker::new(
            catalog(),
            settings,
            Arc::new(DefaultBackend::new("http://localhost:3000")),
        )
    }

    fn instance_id() -> InstanceId {
        InstanceId::new("i1").expect("valid instance ID")
    }

    fn provision_request(plan: &str) -> ProvisionRequest {
        ProvisionRequest::new(
            instance_id(),
            ServiceId::new("db").expect("valid service ID"),
            PlanId::new(plan).expect("valid plan ID"),
        )
    }

    fn bind_request(binding: &str) -> BindRequest {
        BindRequest::new(instance_id(), BindingId::new(binding).expect("valid binding ID"))
    }

    #[tokio::test]
    async fn test_provision_sets_dashboard() {
        let broker = broker(BrokerSettings::default());
        let outcome = broker
            .provision(provision_request("gold"))
            .await
            .expect("provision");

        assert!(matches!(outcome, ProvisionOutcome::Created(_)));
        let instance = outcome.instance();
        assert!(instance.is_active());
        assert_eq!(
            instance.dashboard_url.as_deref(),
            Some("http://localhost:3000/dashboard/i1")
        );

        let op = broker
            .last_operation(&instance_id(), None)
            .expect("last operation");
        assert_eq!(op.state, crate::model::OperationState::Succeeded);
    }

    #[tokio::test]
    async fn test_async_required_rejects_sync_caller() {
        let broker = broker(BrokerSettings {
            async_supported: true,
            async_required: true,
            ..BrokerSettings::default()
        });

        let result = broker.provision(provision_request("gold")).await;
        assert!(matches!(result, Err(BrokerError::AsyncRequired)));
        assert!(broker.get_instance(&instance_id()).is_err());
        assert_eq!(broker.operation_log().len(), 1);
    }

    #[tokio::test]
    async fn test_update_plan_and_parameters() {
        let broker = broker(BrokerSettings::default());
        broker
            .provision(provision_request("gold"))
            .await
            .expect("provision");

        let update = UpdateRequest::new(instance_id(), ServiceId::new("db").expect("valid service ID"))
            .with_plan(PlanId::new("silver").expect("valid plan ID"));
        let outcome = broker.update(update.clone()).await.expect("update");
        assert!(matches!(outcome, UpdateOutcome::Updated(_)));
        assert_eq!(outcome.instance().plan_id.as_str(), "silver");

        let again = broker.update(update).await.expect("repeat update");
        assert!(matches!(again, UpdateOutcome::Unchanged(_)));
    }

    #[tokio::test]
    async fn test_update_missing_instance() {
        let broker = broker(BrokerSettings::default());
        let update = UpdateRequest::new(instance_id(), ServiceId::new("db").expect("valid service ID"));
        assert!(matches!(
            broker.update(update).await,
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_rejects_non_bindable_plan() {
        let broker = broker(BrokerSettings::default());
        broker
            .provision(provision_request("archive"))
            .await
            .expect("provision");

        let result = broker.bind(bind_request("b1")).await;
        assert!(matches!(result, Err(BrokerError::NotBindable { .. })));
    }

    #[tokio::test]
    async fn test_service_keys_disabled_requires_app() {
        let broker = broker(BrokerSettings {
            service_keys_supported: false,
            ..BrokerSettings::default()
        });
        broker
            .provision(provision_request("gold"))
            .await
            .expect("provision");

        assert!(matches!(
            broker.bind(bind_request("b1")).await,
            Err(BrokerError::RequiresApp)
        ));
        let outcome = broker
            .bind(bind_request("b1").with_app("app-guid"))
            .await
            .expect("bind with app");
        assert!(!outcome.binding().is_service_key());
    }

    #[tokio::test]
    async fn test_enablement_and_status() {
        let broker = broker(BrokerSettings::default());
        broker
            .provision(provision_request("gold"))
            .await
            .expect("provision");

        let status = broker.instance_status(&instance_id()).expect("status");
        assert!(status.enabled);
        assert!(status.active);

        let instance = broker
            .set_enabled(&instance_id(), EnableRequest::new(false, "ops", "billing"))
            .await
            .expect("disable");
        assert!(!instance.enabled);
        assert!(!broker.instance_status(&instance_id()).expect("status").enabled);

        let missing = InstanceId::new("missing").expect("valid instance ID");
        assert!(matches!(
            broker.instance_status(&missing),
            Err(BrokerError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_operation_handle() {
        let broker = broker(BrokerSettings::default());
        broker
            .provision(provision_request("gold"))
            .await
            .expect("provision");

        let result = broker.last_operation(&instance_id(), Some(Uuid::new_v4()));
        assert!(matches!(result, Err(BrokerError::InvalidRequest(_))));
    }
}
