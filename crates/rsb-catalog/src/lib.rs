//! RSB Catalog - Static description of the service offerings a broker exposes.
//!
//! The catalog is built once at startup, either from TOML files or from the
//! built-in sample offering, and is read-only afterwards.
//!
//! # Architecture
//!
//! - **Definition Types** ([`definition`]): Service offerings, plans and their metadata
//! - **Loader** ([`loader`]): TOML loading from a file or a directory tree
//! - **Catalog** ([`catalog`]): Ordered, indexed, immutable lookup structure
//! - **Errors** ([`error`]): Catalog-specific error types
//!
//! # Example
//!
//! ```rust
//! use rsb_catalog::Catalog;
//! use rsb_core::PlanId;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Catalog::sample("rsb-resource-service", "http://localhost:3000")?;
//!
//! for plan in catalog.list_plans() {
//!     println!("{}: {}", plan.id, plan.name);
//! }
//!
//! let lite = PlanId::new("2a1d139b-1b05-4e33-b72e-a1f8c14be559")?;
//! assert_eq!(catalog.find_plan(&lite)?.name, "lite");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod catalog;
pub mod definition;
pub mod error;
pub mod loader;

// Re-export commonly used types
pub use catalog::Catalog;
pub use definition::{CatalogDocument, Plan, PlanMetadata, ServiceMetadata, ServiceOffering};
pub use error::{CatalogError, Result};
pub use loader::CatalogLoader;
