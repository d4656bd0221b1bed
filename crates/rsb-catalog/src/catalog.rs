//! Immutable, ordered catalog of service offerings and plans.

use crate::{
    definition::{Plan, PlanMetadata, ServiceMetadata, ServiceOffering},
    error::{CatalogError, Result},
};
use rsb_core::{Parameters, PlanId, ServiceId};
use std::collections::HashMap;
use tracing::info;

/// Read-only view of the offerings a broker exposes.
///
/// Plans keep their declaration order: offerings in the order they were
/// loaded, then plans in the order each offering lists them. Lookups by
/// identifier go through indexes built at construction.
#[derive(Debug, Clone)]
pub struct Catalog {
    services: Vec<ServiceOffering>,
    /// service id -> index into `services`
    service_index: HashMap<ServiceId, usize>,
    /// plan id -> (service index, plan index)
    plan_index: HashMap<PlanId, (usize, usize)>,
}

impl Catalog {
    /// Build a catalog from offerings in declaration order.
    ///
    /// # Errors
    /// Returns error if an offering is invalid or if service or plan IDs repeat.
    pub fn new(services: Vec<ServiceOffering>) -> Result<Self> {
        let mut service_index = HashMap::new();
        let mut plan_index = HashMap::new();

        for (service_pos, service) in services.iter().enumerate() {
            service.validate()?;

            if service_index
                .insert(service.id.clone(), service_pos)
                .is_some()
            {
                return Err(CatalogError::DuplicateService {
                    service_id: service.id.to_string(),
                });
            }

            for (plan_pos, plan) in service.plans.iter().enumerate() {
                if plan_index
                    .insert(plan.id.clone(), (service_pos, plan_pos))
                    .is_some()
                {
                    return Err(CatalogError::DuplicatePlan {
                        plan_id: plan.id.to_string(),
                    });
                }
            }
        }

        info!(
            services = services.len(),
            plans = plan_index.len(),
            "built service catalog"
        );

        Ok(Self {
            services,
            service_index,
            plan_index,
        })
    }

    /// The sample offering: one bindable, plan-updateable service with a free `lite` plan.
    pub fn sample(service_name: &str, base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/');

        let plan = Plan {
            id: PlanId::new("2a1d139b-1b05-4e33-b72e-a1f8c14be559")?,
            name: "lite".to_string(),
            description: "Resource Service Broker Plan Description".to_string(),
            free: true,
            bindable: Some(true),
            metadata: PlanMetadata {
                display_name: Some("Lite".to_string()),
                bullets: vec!["Test bullet 1".to_string(), "Test bullet 2".to_string()],
                extra: Parameters::new(),
            },
        };

        let service = ServiceOffering {
            id: ServiceId::new("df35cab6-347b-4ba5-8f39-e9c23a237f5b")?,
            name: service_name.to_string(),
            description: "Resource Service Broker Description".to_string(),
            bindable: true,
            plan_updateable: true,
            tags: vec!["lite".to_string()],
            metadata: ServiceMetadata {
                display_name: Some("Resource Service Broker".to_string()),
                long_description: Some("Resource Service Broker Long Description".to_string()),
                provider_display_name: Some("Company Name".to_string()),
                documentation_url: Some(format!("{base_url}/documentation.html")),
                support_url: Some(format!("{base_url}/support.html")),
                image_url: Some(format!("{base_url}/services.svg")),
                extra: Parameters::new(),
            },
            plans: vec![plan],
        };

        Self::new(vec![service])
    }

    /// All offerings in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceOffering] {
        &self.services
    }

    /// All plans in declaration order.
    #[must_use]
    pub fn list_plans(&self) -> Vec<&Plan> {
        self.services
            .iter()
            .flat_map(|service| service.plans.iter())
            .collect()
    }

    /// Find a plan by ID.
    ///
    /// # Errors
    /// Returns `PlanNotFound` if no offering declares the plan.
    pub fn find_plan(&self, plan_id: &PlanId) -> Result<&Plan> {
        self.locate(plan_id).map(|(_, plan)| plan)
    }

    /// Find an offering by ID.
    pub fn find_service(&self, service_id: &ServiceId) -> Result<&ServiceOffering> {
        self.service_index
            .get(service_id)
            .map(|&pos| &self.services[pos])
            .ok_or_else(|| CatalogError::ServiceNotFound {
                service_id: service_id.to_string(),
            })
    }

    /// The offering that declares a plan.
    pub fn service_for_plan(&self, plan_id: &PlanId) -> Result<&ServiceOffering> {
        self.locate(plan_id).map(|(service, _)| service)
    }

    /// Resolve a plan and check that it belongs to the given offering.
    pub fn plan_for(&self, service_id: &ServiceId, plan_id: &PlanId) -> Result<&Plan> {
        let service = self.find_service(service_id)?;
        let (owner, plan) = self.locate(plan_id)?;

        if owner.id != service.id {
            return Err(CatalogError::PlanNotInService {
                plan_id: plan_id.to_string(),
                service_id: service_id.to_string(),
            });
        }

        Ok(plan)
    }

    /// Whether instances on this plan can be bound.
    pub fn is_bindable(&self, plan_id: &PlanId) -> Result<bool> {
        let (service, plan) = self.locate(plan_id)?;
        Ok(plan.bindable.unwrap_or(service.bindable))
    }

    /// Whether instances on this plan may change plan.
    pub fn is_plan_updateable(&self, plan_id: &PlanId) -> Result<bool> {
        self.service_for_plan(plan_id)
            .map(|service| service.plan_updateable)
    }

    /// Number of plans across all offerings.
    #[must_use]
    pub fn plan_count(&self) -> usize {
        self.plan_index.len()
    }

    fn locate(&self, plan_id: &PlanId) -> Result<(&ServiceOffering, &Plan)> {
        let &(service_pos, plan_pos) =
            self.plan_index
                .get(plan_id)
                .ok_or_else(|| CatalogError::PlanNotFound {
                    plan_id: plan_id.to_string(),
                })?;

        let service = &self.services[service_pos];
        Ok((service, &service.plans[plan_pos]))
    }
}
