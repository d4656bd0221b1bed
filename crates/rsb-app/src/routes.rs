//! Route registration table.
//!
//! Maps each broker endpoint to the operation that serves it. A routing
//! collaborator receives the table by value at startup; nothing here serves
//! HTTP.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// HTTP verbs used by the broker API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    Get,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Upper-case verb name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported HTTP method: {other}")),
        }
    }
}

/// Broker operation an endpoint is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// List offerings and plans
    Catalog,
    /// Create an instance
    Provision,
    /// Change plan or parameters
    Update,
    /// Delete an instance
    Deprovision,
    /// Issue credentials
    Bind,
    /// Revoke credentials
    Unbind,
    /// Poll an asynchronous operation
    LastOperation,
    /// Enable or disable an instance
    SetEnabled,
    /// Read enablement state
    InstanceStatus,
}

/// One registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// HTTP verb
    pub method: HttpMethod,
    /// Path template; `:name` segments capture parameters
    pub path: String,
    /// Operation that serves the endpoint
    pub operation: Operation,
}

impl Route {
    /// Create a route.
    #[must_use]
    pub fn new(method: HttpMethod, path: impl Into<String>, operation: Operation) -> Self {
        Self {
            method,
            path: path.into(),
            operation,
        }
    }

    /// Match `path` against this route's template, capturing parameters.
    #[must_use]
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let template: Vec<&str> = self.path.trim_matches('/').split('/').collect();
        let actual: Vec<&str> = path.trim_matches('/').split('/').collect();
        if template.len() != actual.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (expected, segment) in template.iter().zip(&actual) {
            if let Some(name) = expected.strip_prefix(':') {
                if segment.is_empty() {
                    return None;
                }
                params.insert(name.to_string(), (*segment).to_string());
            } else if expected != segment {
                return None;
            }
        }
        Some(params)
    }
}

/// The full set of registered endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The Open Service Broker endpoints plus the enablement extension.
    #[must_use]
    pub fn open_service_broker() -> Self {
        const INSTANCE: &str = "/v2/service_instances/:instance_id";
        const BINDING: &str = "/v2/service_instances/:instance_id/service_bindings/:binding_id";
        const ENABLEMENT: &str = "/bluemix_v1/service_instances/:instance_id";

        Self::new()
            .route(HttpMethod::Get, "/v2/catalog", Operation::Catalog)
            .route(HttpMethod::Put, INSTANCE, Operation::Provision)
            .route(HttpMethod::Patch, INSTANCE, Operation::Update)
            .route(HttpMethod::Delete, INSTANCE, Operation::Deprovision)
            .route(HttpMethod::Put, BINDING, Operation::Bind)
            .route(HttpMethod::Delete, BINDING, Operation::Unbind)
            .route(
                HttpMethod::Get,
                "/v2/service_instances/:instance_id/last_operation",
                Operation::LastOperation,
            )
            .route(HttpMethod::Put, ENABLEMENT, Operation::SetEnabled)
            .route(HttpMethod::Get, ENABLEMENT, Operation::InstanceStatus)
    }

    /// Register a route.
    #[must_use]
    pub fn route(mut self, method: HttpMethod, path: &str, operation: Operation) -> Self {
        self.routes.push(Route::new(method, path, operation));
        self
    }

    /// All routes in registration order.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Find the route serving `method` and `path`.
    #[must_use]
    pub fn resolve(&self, method: HttpMethod, path: &str) -> Option<(&Route, HashMap<String, String>)> {
        self.routes
            .iter()
            .filter(|route| route.method == method)
            .find_map(|route| route.matches(path).map(|params| (route, params)))
    }

    /// Number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Check if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
