//! Application bootstrap.

use crate::routes::RouteTable;
use anyhow::Context;
use rsb_catalog::{Catalog, CatalogLoader};
use rsb_core::BrokerConfig;
use rsb_engine::Broker;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the broker needs at runtime, built once at startup.
#[derive(Debug)]
pub struct Application {
    config: BrokerConfig,
    catalog: Arc<Catalog>,
    broker: Broker,
    routes: RouteTable,
}

impl Application {
    /// Build the catalog, broker and route table from `config`.
    ///
    /// Uses `[catalog] path` when set, then `catalog.toml` beside the config
    /// file, and finally the built-in sample offering.
    pub fn bootstrap(config: BrokerConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let catalog = Arc::new(load_catalog(&config)?);
        let broker = Broker::from_config(&config, Arc::clone(&catalog));
        let routes = RouteTable::open_service_broker();

        info!(
            service = %config.general.service_name,
            services = catalog.services().len(),
            plans = catalog.plan_count(),
            routes = routes.len(),
            "Application bootstrapped"
        );

        Ok(Self {
            config,
            catalog,
            broker,
            routes,
        })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// The immutable catalog.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The broker state machine.
    #[must_use]
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// Registered endpoints.
    #[must_use]
    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// The catalog in `GET /v2/catalog` form.
    pub fn catalog_document(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::json!({
            "services": serde_json::to_value(self.catalog.services())
                .context("failed to serialize catalog")?,
        }))
    }
}

fn load_catalog(config: &BrokerConfig) -> anyhow::Result<Catalog> {
    let path = config.catalog_path()?;
    if config.catalog.path.is_none() && !path.exists() {
        warn!(path = %path.display(), "No catalog found; using the built-in sample offering");
        return Catalog::sample(&config.general.service_name, &config.general.base_url)
            .context("failed to build sample catalog");
    }

    CatalogLoader::new(&path)
        .and_then(|loader| loader.load())
        .with_context(|| format!("failed to load catalog from {}", path.display()))
}
