//! RSB Core - Foundation crate for the resource service broker.
//!
//! This crate provides the identifiers, request types, error handling and
//! configuration management that the catalog, engine and application crates
//! depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Validated identifiers (`InstanceId`, `BindingId`, `PlanId`, `ServiceId`),
//!   request context and timestamps
//!
//! # Example
//!
//! ```rust
//! use rsb_core::{BrokerConfig, InstanceId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BrokerConfig::default();
//! assert!(!config.broker.async_supported);
//!
//! let instance_id = InstanceId::new("8a1d139b-1b05-4e33-b72e-a1f8c14be559")?;
//! println!("instance: {instance_id}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{BrokerConfig, BrokerSettings, CatalogConfig, GeneralConfig, LoggingConfig};
pub use error::{ConfigError, ConfigResult, CoreError, Result};
pub use types::{
    BindingId, InstanceId, OriginatingIdentity, Parameters, PlanId, RequestContext, ServiceId,
    Timestamp,
};
