use rsb_app::{
    response::{bind_status, deprovision_status, provision_status, unbind_status},
    Application, ErrorResponse, HttpMethod, Operation,
};
use rsb_core::{BindingId, BrokerConfig, InstanceId, PlanId, ServiceId};
use rsb_engine::{BindRequest, DeprovisionRequest, ProvisionRequest, UnbindRequest};
use std::fs;
use tempfile::TempDir;

const CATALOG: &str = r#"
[[services]]
id = "db"
name = "database"
description = "Managed database"
plan_updateable = true

[[services.plans]]
id = "gold"
name = "gold"
description = "Dedicated"

[[services.plans]]
id = "silver"
name = "silver"
description = "Shared"
"#;

fn bootstrap(temp_dir: &TempDir) -> Application {
    let catalog_dir = temp_dir.path().join("catalog");
    fs::create_dir_all(&catalog_dir).expect("create catalog dir");
    fs::write(catalog_dir.join("db.toml"), CATALOG).expect("write catalog");

    let mut config = BrokerConfig::default();
    config.catalog.path = Some(catalog_dir);
    Application::bootstrap(config).expect("bootstrap")
}

fn ids() -> (InstanceId, BindingId, ServiceId, PlanId) {
    (
        InstanceId::new("i1").expect("instance id"),
        BindingId::new("b1").expect("binding id"),
        ServiceId::new("db").expect("service id"),
        PlanId::new("gold").expect("plan id"),
    )
}

#[tokio::test]
async fn test_lifecycle_through_route_table() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let app = bootstrap(&temp_dir);
    let broker = app.broker();
    let (instance_id, binding_id, service_id, plan_id) = ids();

    let (route, params) = app
        .routes()
        .resolve(HttpMethod::Put, "/v2/service_instances/i1")
        .expect("provision route");
    assert_eq!(route.operation, Operation::Provision);
    assert_eq!(params.get("instance_id").map(String::as_str), Some("i1"));

    let request = ProvisionRequest::new(instance_id.clone(), service_id.clone(), plan_id.clone());
    let outcome = broker.provision(request.clone()).await.expect("provision");
    assert_eq!(provision_status(&outcome), 201);
    let replay = broker.provision(request).await.expect("replay provision");
    assert_eq!(provision_status(&replay), 200);

    let outcome = broker
        .bind(BindRequest::new(instance_id.clone(), binding_id.clone()).with_app("app-1"))
        .await
        .expect("bind");
    assert_eq!(bind_status(&outcome), 201);

    let err = broker
        .deprovision(DeprovisionRequest::new(instance_id.clone()))
        .await
        .expect_err("bindings remain");
    assert_eq!(ErrorResponse::from_error(Operation::Deprovision, &err).status, 422);

    let outcome = broker
        .unbind(UnbindRequest::new(instance_id.clone(), binding_id.clone()))
        .await
        .expect("unbind");
    assert_eq!(unbind_status(&outcome), 200);
    let outcome = broker
        .unbind(UnbindRequest::new(instance_id.clone(), binding_id))
        .await
        .expect("repeat unbind");
    assert_eq!(unbind_status(&outcome), 410);

    let outcome = broker
        .deprovision(DeprovisionRequest::new(instance_id.clone()))
        .await
        .expect("deprovision");
    assert_eq!(deprovision_status(&outcome), 200);

    let err = broker
        .deprovision(DeprovisionRequest::new(instance_id))
        .await
        .expect_err("already deleted");
    assert_eq!(ErrorResponse::from_error(Operation::Deprovision, &err).status, 410);
}

#[tokio::test]
async fn test_conflict_maps_to_409() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let app = bootstrap(&temp_dir);
    let (instance_id, _, service_id, plan_id) = ids();

    app.broker()
        .provision(ProvisionRequest::new(instance_id.clone(), service_id.clone(), plan_id))
        .await
        .expect("provision");

    let silver = PlanId::new("silver").expect("plan id");
    let err = app
        .broker()
        .provision(ProvisionRequest::new(instance_id, service_id, silver))
        .await
        .expect_err("conflict");

    let body = ErrorResponse::from_error(Operation::Provision, &err);
    assert_eq!(body.status, 409);
    assert!(body.error.is_none());
}

#[test]
fn test_catalog_document_lists_plans_in_order() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let app = bootstrap(&temp_dir);

    let doc = app.catalog_document().expect("catalog document");
    let plans = doc["services"][0]["plans"]
        .as_array()
        .expect("plans array");
    let names: Vec<&str> = plans.iter().filter_map(|plan| plan["name"].as_str()).collect();
    assert_eq!(names, vec!["gold", "silver"]);
}

#[test]
fn test_every_route_resolves_to_itself() {
    let temp_dir = TempDir::new().expect("create temp dir");
    let app = bootstrap(&temp_dir);

    for route in app.routes().routes() {
        let concrete = route
            .path
            .replace(":instance_id", "i1")
            .replace(":binding_id", "b1");
        let (resolved, _) = app
            .routes()
            .resolve(route.method, &concrete)
            .expect("route resolves");
        assert_eq!(resolved.operation, route.operation);
    }
}
