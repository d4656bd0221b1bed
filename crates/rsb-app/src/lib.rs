//! RSB App - Application shell for the resource service broker.
//!
//! Builds the catalog, broker and route table once at startup and hands
//! them to whatever request-handling layer fronts the broker.
//!
//! # Modules
//!
//! - [`application`] - Startup bootstrap
//! - [`routes`] - Explicit endpoint registration table
//! - [`response`] - Status codes and error bodies for broker outcomes

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod application;
pub mod response;
pub mod routes;

pub use application::Application;
pub use response::ErrorResponse;
pub use routes::{HttpMethod, Operation, Route, RouteTable};

use anyhow::Context;
use rsb_core::BrokerConfig;
use tracing::info;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this more than
/// once is harmless; later calls are ignored.
pub fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

/// Load configuration, bootstrap the broker and print its catalog and routes.
pub async fn run() -> anyhow::Result<()> {
    let config = BrokerConfig::load_with_env().context("failed to load configuration")?;
    init_tracing(&config.logging.filter);

    info!("Starting rsb v{}", env!("CARGO_PKG_VERSION"));

    let app = Application::bootstrap(config)?;
    let summary = serde_json::json!({
        "catalog": app.catalog_document()?,
        "routes": app.routes(),
        "settings": app.broker().settings(),
    });

    println!(
        "{}",
        serde_json::to_string_pretty(&summary).context("failed to render summary")?
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice() {
        init_tracing("info");
        init_tracing("debug");
    }
}
