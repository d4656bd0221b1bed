//! Integration tests for catalog loading
//!
//! Loads a multi-offering catalog from disk and exercises the lookup API
//! the broker engine relies on.

use rsb_catalog::{CatalogError, CatalogLoader};
use rsb_core::{PlanId, ServiceId};
use tempfile::TempDir;

const CATALOG: &str = r#"
[[services]]
id = "db-service"
name = "database"
description = "Managed database"
plan_updateable = true
tags = ["database", "sql"]

[services.metadata]
display_name = "Database"
provider_display_name = "Example Corp"

[[services.plans]]
id = "db-gold"
name = "gold"
description = "Dedicated database"

[services.plans.metadata]
bullets = ["Dedicated host", "Daily backups"]

[[services.plans]]
id = "db-silver"
name = "silver"
description = "Shared database"
free = true

[[services]]
id = "queue-service"
name = "queue"
description = "Message queue"
bindable = false

[[services.plans]]
id = "queue-basic"
name = "basic"
description = "Basic queue"

[[services.plans]]
id = "queue-bound"
name = "bound"
description = "Queue with credentials"
bindable = true
"#;

fn plan(id: &str) -> PlanId {
    PlanId::new(id).expect("valid plan ID")
}

#[test]
fn test_catalog_round_trip_from_disk() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let path = temp_dir.path().join("catalog.toml");
    std::fs::write(&path, CATALOG).expect("write catalog");

    let catalog = CatalogLoader::new(&path)
        .expect("create loader")
        .load()
        .expect("load catalog");

    let ids: Vec<&str> = catalog
        .list_plans()
        .iter()
        .map(|p| p.id.as_str())
        .collect();
    assert_eq!(ids, vec!["db-gold", "db-silver", "queue-basic", "queue-bound"]);

    let db = ServiceId::new("db-service").expect("valid service ID");
    let queue = ServiceId::new("queue-service").expect("valid service ID");

    assert!(catalog.plan_for(&db, &plan("db-gold")).is_ok());
    assert!(matches!(
        catalog.plan_for(&queue, &plan("db-gold")),
        Err(CatalogError::PlanNotInService { .. })
    ));

    assert!(catalog.is_plan_updateable(&plan("db-silver")).expect("db-silver"));
    assert!(!catalog.is_plan_updateable(&plan("queue-basic")).expect("queue-basic"));

    assert!(catalog.is_bindable(&plan("db-gold")).expect("db-gold"));
    assert!(!catalog.is_bindable(&plan("queue-basic")).expect("queue-basic"));
    assert!(catalog.is_bindable(&plan("queue-bound")).expect("queue-bound"));

    let gold = catalog.find_plan(&plan("db-gold")).expect("find gold");
    assert_eq!(gold.metadata.bullets.len(), 2);
    assert!(catalog.find_plan(&plan("db-gold")).is_ok());
    assert_eq!(
        catalog.find_service(&db).expect("find db").metadata.provider_display_name.as_deref(),
        Some("Example Corp")
    );
}

#[test]
fn test_duplicate_plan_across_files() {
    let temp_dir = TempDir::new().expect("create temp dir");
    std::fs::write(temp_dir.path().join("a.toml"), CATALOG).expect("write first file");

    let renamed = CATALOG
        .replace("db-service", "db-service-2")
        .replace("queue-service", "queue-service-2");
    std::fs::write(temp_dir.path().join("b.toml"), renamed).expect("write second file");

    let result = CatalogLoader::new(temp_dir.path())
        .expect("create loader")
        .load();
    assert!(matches!(result, Err(CatalogError::DuplicatePlan { .. })));
}
