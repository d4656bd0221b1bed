//! RSB Engine - Provisioning state machine for the resource service broker.
//!
//! This crate owns every service instance and binding the broker knows about
//! and drives them through the provision / update / bind / unbind /
//! deprovision lifecycle. It is format agnostic: callers hand in plain
//! request values and get plain outcome values back.
//!
//! # Architecture
//!
//! - **Model** ([`model`]): Instances, bindings, credentials, last operations
//! - **Requests** ([`request`]): Request and outcome types for each operation
//! - **Instance Registry** ([`instances`]): Instance records and lifecycle transitions
//! - **Binding Registry** ([`bindings`]): Binding records keyed by owning instance
//! - **Locks** ([`lock`]): Per-identifier reader/writer locks with bounded waits
//! - **Backend** ([`backend`]): Downstream provisioning contract and default implementation
//! - **Operation Log** ([`oplog`]): One terminal outcome per broker operation
//! - **Broker** ([`broker`]): The state machine tying the above together
//!
//! # Example
//!
//! ```rust
//! use rsb_catalog::Catalog;
//! use rsb_core::{BrokerSettings, InstanceId, PlanId, ServiceId};
//! use rsb_engine::{Broker, DefaultBackend, ProvisionRequest};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Arc::new(Catalog::sample("demo", "http://localhost:3000")?);
//! let broker = Broker::new(
//!     catalog,
//!     BrokerSettings::default(),
//!     Arc::new(DefaultBackend::new("http://localhost:3000")),
//! );
//!
//! let request = ProvisionRequest::new(
//!     InstanceId::new("i1")?,
//!     ServiceId::new("df35cab6-347b-4ba5-8f39-e9c23a237f5b")?,
//!     PlanId::new("2a1d139b-1b05-4e33-b72e-a1f8c14be559")?,
//! );
//! let outcome = broker.provision(request).await?;
//! println!("dashboard: {:?}", outcome.instance().dashboard_url);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod backend;
pub mod bindings;
pub mod broker;
pub mod error;
pub mod instances;
pub mod lock;
pub mod model;
pub mod oplog;
pub mod request;

// Re-export commonly used types
pub use backend::{DefaultBackend, ProvisionedResource, ServiceBackend};
pub use bindings::BindingRegistry;
pub use broker::Broker;
pub use error::{BackendError, BrokerError, Result};
pub use instances::{InstanceRegistry, Provisioned};
pub use lock::{BindingKey, LockGuard, LockTable};
pub use model::{
    Binding, Credentials, InstanceState, InstanceStatus, LastOperation, OperationKind,
    OperationState, ServiceInstance,
};
pub use oplog::{OperationLog, OperationRecord, RecordedOutcome};
pub use request::{
    BindOutcome, BindRequest, DeprovisionOutcome, DeprovisionRequest, EnableRequest,
    ProvisionOutcome, ProvisionRequest, UnbindOutcome, UnbindRequest, UpdateOutcome,
    UpdateRequest,
};
