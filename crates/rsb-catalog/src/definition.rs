//! Service offering and plan definitions.
//!
//! This module defines the data structures loaded from catalog TOML files.

use crate::error::{CatalogError, Result};
use rsb_core::{Parameters, PlanId, ServiceId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level shape of a catalog TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDocument {
    /// Offerings declared in the file, in declaration order
    #[serde(default)]
    pub services: Vec<ServiceOffering>,
}

/// A service offering advertised by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceOffering {
    /// Unique service identifier
    pub id: ServiceId,

    /// Service name, unique within the platform marketplace
    pub name: String,

    /// Short description shown in the marketplace
    pub description: String,

    /// Whether instances of this service can be bound
    #[serde(default = "default_true")]
    pub bindable: bool,

    /// Whether an instance may change plan after provisioning
    #[serde(default)]
    pub plan_updateable: bool,

    /// Marketplace tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// Display metadata
    #[serde(default)]
    pub metadata: ServiceMetadata,

    /// Plans offered, in declaration order
    #[serde(default)]
    pub plans: Vec<Plan>,
}

fn default_true() -> bool {
    true
}

impl ServiceOffering {
    /// Validate the offering for completeness and internal consistency.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("service name cannot be empty"));
        }

        if self.description.trim().is_empty() {
            return Err(self.invalid("service description cannot be empty"));
        }

        if self.plans.is_empty() {
            return Err(self.invalid("service must offer at least one plan"));
        }

        let mut plan_names = HashSet::new();
        for plan in &self.plans {
            if plan.name.trim().is_empty() {
                return Err(self.invalid(&format!("plan {} has an empty name", plan.id)));
            }
            if plan.description.trim().is_empty() {
                return Err(self.invalid(&format!("plan {} has an empty description", plan.id)));
            }
            if !plan_names.insert(plan.name.as_str()) {
                return Err(self.invalid(&format!("plan name '{}' is not unique", plan.name)));
            }
        }

        Ok(())
    }

    /// Look up one of this offering's plans.
    #[must_use]
    pub fn plan(&self, plan_id: &PlanId) -> Option<&Plan> {
        self.plans.iter().find(|plan| &plan.id == plan_id)
    }

    fn invalid(&self, reason: &str) -> CatalogError {
        CatalogError::ValidationError {
            service_id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Marketplace display metadata for an offering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Long description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,

    /// Name of the providing company
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_display_name: Option<String>,

    /// Link to documentation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_url: Option<String>,

    /// Link to support
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_url: Option<String>,

    /// Link to an icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,

    /// Any other metadata keys
    #[serde(flatten)]
    pub extra: Parameters,
}

/// A named tier of a service offering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan identifier
    pub id: PlanId,

    /// Plan name, unique within its offering
    pub name: String,

    /// Short description
    pub description: String,

    /// Whether the plan is free of charge
    #[serde(default)]
    pub free: bool,

    /// Overrides the offering's `bindable` flag when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindable: Option<bool>,

    /// Display metadata
    #[serde(default)]
    pub metadata: PlanMetadata,
}

/// Marketplace display metadata for a plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanMetadata {
    /// Human-readable name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Feature bullets
    #[serde(default)]
    pub bullets: Vec<String>,

    /// Any other metadata keys
    #[serde(flatten)]
    pub extra: Parameters,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(id: &str, name: &str) -> Plan {
        Plan {
            id: PlanId::new(id).expect("valid plan ID"),
            name: name.to_string(),
            description: format!("{name} plan"),
            free: true,
            bindable: None,
            metadata: PlanMetadata::default(),
        }
    }

    fn offering(plans: Vec<Plan>) -> ServiceOffering {
        ServiceOffering {
            id: ServiceId::new("svc-1").expect("valid service ID"),
            name: "test-service".to_string(),
            description: "Test service".to_string(),
            bindable: true,
            plan_updateable: false,
            tags: vec![],
            metadata: ServiceMetadata::default(),
            plans,
        }
    }

    #[test]
    fn test_validate_ok() {
        let svc = offering(vec![plan("gold", "gold"), plan("silver", "silver")]);
        assert!(svc.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_plans() {
        let svc = offering(vec![]);
        let err = svc.validate().expect_err("no plans");
        assert!(err.to_string().contains("at least one plan"));
    }

    #[test]
    fn test_validate_rejects_duplicate_plan_names() {
        let svc = offering(vec![plan("gold-1", "gold"), plan("gold-2", "gold")]);
        assert!(matches!(
            svc.validate(),
            Err(CatalogError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_blank_name() {
        let mut svc = offering(vec![plan("gold", "gold")]);
        svc.name = "  ".to_string();
        assert!(svc.validate().is_err());
    }

    #[test]
    fn test_plan_lookup() {
        let svc = offering(vec![plan("gold", "gold")]);
        let gold = PlanId::new("gold").expect("valid plan ID");
        let bronze = PlanId::new("bronze").expect("valid plan ID");
        assert_eq!(svc.plan(&gold).map(|p| p.name.as_str()), Some("gold"));
        assert!(svc.plan(&bronze).is_none());
    }

    #[test]
    fn test_parse_toml_defaults() {
        let toml_str = r#"
[[services]]
id = "svc-1"
name = "test-service"
description = "Test service"

[[services.plans]]
id = "gold"
name = "gold"
description = "Gold plan"

[services.plans.metadata]
display_name = "Gold"
bullets = ["Fast", "Big"]
color = "yellow"
"#;

        let doc: CatalogDocument = toml::from_str(toml_str).expect("parse catalog document");
        let svc = &doc.services[0];
        assert!(svc.bindable);
        assert!(!svc.plan_updateable);
        assert_eq!(svc.plans.len(), 1);

        let gold = &svc.plans[0];
        assert!(!gold.free);
        assert_eq!(gold.metadata.display_name.as_deref(), Some("Gold"));
        assert_eq!(gold.metadata.bullets, vec!["Fast", "Big"]);
        assert_eq!(
            gold.metadata.extra.get("color"),
            Some(&serde_json::json!("yellow"))
        );
    }
}
