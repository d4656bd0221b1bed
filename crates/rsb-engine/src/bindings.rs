//! Binding Registry: exclusive owner of binding records.
//!
//! Bindings are grouped by owning instance id. A binding holds the instance
//! id only; the instance record itself lives in the
//! [`InstanceRegistry`](crate::InstanceRegistry).

use crate::error::{BrokerError, Result};
use crate::instances::InstanceRegistry;
use crate::model::{Binding, Credentials};
use crate::request::{BindOutcome, BindRequest, UnbindOutcome};
use rsb_core::{BindingId, InstanceId, Timestamp};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, error, info, warn};

type ByInstance = HashMap<InstanceId, BTreeMap<BindingId, Binding>>;

/// Registry of bindings keyed by owning instance, then binding id.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: RwLock<ByInstance>,
}

impl BindingRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a binding with `credentials`, or return the identical one.
    ///
    /// Fails with `InstanceNotFound` unless the owning instance is `Active`,
    /// and with `Conflict` when the id is taken by a different request.
    pub fn bind(
        &self,
        instances: &InstanceRegistry,
        request: &BindRequest,
        credentials: Credentials,
    ) -> Result<BindOutcome> {
        if let Some(existing) = self.check_existing(request)? {
            return Ok(BindOutcome::AlreadyExists(existing));
        }

        let active = instances
            .get(&request.instance_id)
            .is_ok_and(|instance| instance.is_active());
        if !active {
            warn!(instance_id = %request.instance_id, "Bind against missing or inactive instance");
            return Err(BrokerError::InstanceNotFound {
                instance_id: request.instance_id.to_string(),
            });
        }

        let binding = Binding {
            id: request.binding_id.clone(),
            instance_id: request.instance_id.clone(),
            parameters: request.parameters.clone(),
            app_guid: request.app_guid.clone(),
            credentials,
            created_at: Timestamp::now(),
        };

        self.write()
            .entry(request.instance_id.clone())
            .or_default()
            .insert(binding.id.clone(), binding.clone());

        info!(
            instance_id = %binding.instance_id,
            binding_id = %binding.id,
            service_key = binding.is_service_key(),
            "Binding created"
        );
        Ok(BindOutcome::Created(binding))
    }

    /// Return the binding an identical earlier request created.
    ///
    /// `Ok(None)` when the id is free; `Conflict` when it is taken by a
    /// request with different parameters or application.
    pub fn check_existing(&self, request: &BindRequest) -> Result<Option<Binding>> {
        match self.find(&request.instance_id, &request.binding_id) {
            Some(existing) if request.matches(&existing) => {
                debug!(
                    instance_id = %request.instance_id,
                    binding_id = %request.binding_id,
                    "Bind matches existing binding"
                );
                Ok(Some(existing))
            }
            Some(_) => {
                warn!(
                    instance_id = %request.instance_id,
                    binding_id = %request.binding_id,
                    "Bind conflicts with existing binding"
                );
                Err(BrokerError::Conflict {
                    resource: "binding",
                    id: request.binding_id.to_string(),
                })
            }
            None => Ok(None),
        }
    }

    /// Look up one binding.
    #[must_use]
    pub fn find(&self, instance_id: &InstanceId, binding_id: &BindingId) -> Option<Binding> {
        self.read()
            .get(instance_id)
            .and_then(|bindings| bindings.get(binding_id))
            .cloned()
    }

    /// Remove a binding. An absent binding yields `NotFound`.
    pub fn unbind(&self, instance_id: &InstanceId, binding_id: &BindingId) -> UnbindOutcome {
        let mut all = self.write();
        let Some(bindings) = all.get_mut(instance_id) else {
            return UnbindOutcome::NotFound;
        };

        let removed = bindings.remove(binding_id);
        if bindings.is_empty() {
            all.remove(instance_id);
        }

        match removed {
            Some(binding) => {
                info!(instance_id = %instance_id, binding_id = %binding_id, "Binding deleted");
                UnbindOutcome::Deleted(binding)
            }
            None => UnbindOutcome::NotFound,
        }
    }

    /// All bindings owned by an instance, ordered by binding id.
    #[must_use]
    pub fn list_by_instance(&self, instance_id: &InstanceId) -> Vec<Binding> {
        self.read()
            .get(instance_id)
            .map(|bindings| bindings.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of bindings owned by an instance.
    #[must_use]
    pub fn count_for(&self, instance_id: &InstanceId) -> usize {
        self.read().get(instance_id).map_or(0, BTreeMap::len)
    }

    /// Total number of bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().values().map(BTreeMap::len).sum()
    }

    /// Check if no bindings exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Confirm every binding's owning instance is still live.
    ///
    /// A binding that outlived its instance is an invariant violation.
    pub fn verify_owners(&self, instances: &InstanceRegistry) -> Result<()> {
        let owners: Vec<(InstanceId, usize)> = self
            .read()
            .iter()
            .map(|(id, bindings)| (id.clone(), bindings.len()))
            .collect();

        for (instance_id, count) in owners {
            if !instances.is_live(&instance_id) {
                error!(instance_id = %instance_id, count, "Bindings outlived their instance");
                return Err(BrokerError::Internal(format!(
                    "{count} binding(s) reference missing instance {instance_id}"
                )));
            }
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ByInstance> {
        self.bindings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ByInstance> {
        self.bindings.write().unwrap_or_else(PoisonError::into_inner)
    }
}
