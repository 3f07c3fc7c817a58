//! Connection registry.
//!
//! Holds the datasource configuration and one lazily opened connection per
//! datasource name. Connections stay cached for the lifetime of the registry
//! and are only closed through [`ConnectionRegistry::close_all`].

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::DatasourceConfig;
use crate::error::{LedgerError, Result};
use crate::platform::{platform_for_engine, Platform};

/// Datasource configurations and their cached connections.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    configs: BTreeMap<String, DatasourceConfig>,
    connections: Mutex<HashMap<String, AnyPool>>,
}

impl ConnectionRegistry {
    /// Creates a registry holding `configs`.
    #[must_use]
    pub fn new(configs: BTreeMap<String, DatasourceConfig>) -> Self {
        Self {
            configs,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the full configuration set.
    ///
    /// Cached connections survive only for datasources whose configuration
    /// is unchanged.
    pub fn register(&mut self, configs: BTreeMap<String, DatasourceConfig>) {
        let connections = self.connections.get_mut();
        connections.retain(|name, _| self.configs.get(name) == configs.get(name));
        self.configs = configs;
    }

    /// Returns the configuration of a datasource.
    pub fn resolve(&self, name: &str) -> Result<&DatasourceConfig> {
        self.configs
            .get(name)
            .ok_or_else(|| LedgerError::UnknownDatasource(name.to_string()))
    }

    /// Returns the registered datasource names, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Returns whether no datasource is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Returns the connection of a datasource, opening it on first use.
    pub async fn connection_for(&self, name: &str) -> Result<AnyPool> {
        let config = self.resolve(name)?;

        let mut connections = self.connections.lock().await;
        if let Some(pool) = connections.get(name) {
            return Ok(pool.clone());
        }

        sqlx::any::install_default_drivers();
        let dsn = config.dsn_for(name);
        debug!(datasource = %name, "Opening connection");

        // A single connection that is never reaped: in-memory databases
        // live exactly as long as it does.
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect(&dsn)
            .await?;

        info!(datasource = %name, platform = %config.platform, "Connected");
        connections.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    /// Instantiates the platform adapter of a datasource.
    pub fn platform_for(&self, name: &str) -> Result<Box<dyn Platform>> {
        let config = self.resolve(name)?;
        platform_for_engine(&config.platform).ok_or_else(|| LedgerError::UnknownPlatform {
            datasource: name.to_string(),
            platform: config.platform.clone(),
        })
    }

    /// Closes every cached connection.
    pub async fn close_all(&self) {
        let mut connections = self.connections.lock().await;
        for (name, pool) in connections.drain() {
            pool.close().await;
            debug!(datasource = %name, "Connection closed");
        }
    }
}
