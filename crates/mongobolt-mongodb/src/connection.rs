//! MongoDB connection management with pool configuration and a process-wide
//! registry keyed by normalised cluster URL
//!
//! The pool itself is the driver's native pool; this module only decides
//! which pool an operation uses. One `Connection` exists per distinct URL;
//! repeated `get_or_create` calls against the same cluster share it.

use crate::convert::DEFAULT_PARALLEL_THRESHOLD;
use bson::{doc, Document as BsonDocument};
use mongobolt_common::{BoltError, Result};
use mongodb::{
    options::{ClientOptions, ServerApi, ServerApiVersion},
    Client, Collection, Database,
};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Connection pool configuration, built from the binding's options mapping
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Minimum number of connections in the pool (default: driver default)
    pub min_pool_size: Option<u32>,
    /// Maximum number of connections in the pool (default: driver default)
    pub max_pool_size: Option<u32>,
    /// Connection establishment timeout
    pub connect_timeout: Option<Duration>,
    /// Default per-operation deadline; a driver call that outlives it fails
    /// with `Timeout`. Operations may override it per call.
    pub operation_timeout: Option<Duration>,
    /// Server selection timeout
    pub server_selection_timeout: Option<Duration>,
    /// Application name for server logs
    pub app_name: Option<String>,
    /// Batch size at which encode/decode moves to the worker pool
    pub parallel_threshold: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: None,
            max_pool_size: None,
            connect_timeout: None,
            operation_timeout: None,
            server_selection_timeout: None,
            app_name: None,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }
}

/// One cluster connection: the driver client plus the engine settings that
/// ride along with it
pub struct Connection {
    client: Client,
    database: Database,
    database_name: String,
    parallel_threshold: usize,
    operation_timeout: Option<Duration>,
}

impl Connection {
    /// Connect with default pool settings
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_config(connection_string, PoolConfig::default()).await
    }

    /// Connect with custom pool configuration
    pub async fn with_config(connection_string: &str, config: PoolConfig) -> Result<Self> {
        let mut client_options = ClientOptions::parse(connection_string)
            .await
            .map_err(BoltError::from)?;

        if let Some(min) = config.min_pool_size {
            client_options.min_pool_size = Some(min);
        }
        if let Some(max) = config.max_pool_size {
            client_options.max_pool_size = Some(max);
        }
        if let Some(connect) = config.connect_timeout {
            client_options.connect_timeout = Some(connect);
        }
        if let Some(server_sel) = config.server_selection_timeout {
            client_options.server_selection_timeout = Some(server_sel);
        }
        if let Some(app) = config.app_name {
            client_options.app_name = Some(app);
        }

        // Stable API version for compatibility across server releases
        let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
        client_options.server_api = Some(server_api);

        let client = Client::with_options(client_options).map_err(BoltError::from)?;

        let database = client.default_database().ok_or_else(|| {
            BoltError::Driver("no default database specified in connection string".to_string())
        })?;

        let database_name = database.name().to_string();

        Ok(Self {
            client,
            database,
            database_name,
            parallel_threshold: config.parallel_threshold,
            operation_timeout: config.operation_timeout,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get a collection by name (untyped BsonDocument collection)
    pub fn get_collection(&self, name: &str) -> Collection<BsonDocument> {
        self.database.collection(name)
    }

    /// Batch size at which encode/decode parallelises for this pool
    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    /// Default per-operation deadline configured for this pool
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout
    }

    /// Check connection health by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| true)
            .map_err(|e| BoltError::Driver(format!("ping failed: {}", e)))
    }
}

// Process-wide pool registry. Reads on every operation, writes only on the
// first use of a URL and on explicit disconnect.
static POOLS: Lazy<RwLock<HashMap<String, Arc<Connection>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Canonical registry key for a cluster URL. Whitespace and trailing slashes
/// don't create distinct pools.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Fetch the pool for a URL, creating it on first use. Two racing creators
/// both connect, but only one pool is retained and shared.
pub async fn get_or_create(url: &str, config: PoolConfig) -> Result<Arc<Connection>> {
    let key = normalize_url(url);

    if let Some(existing) = lookup_pool(&key) {
        return Ok(existing);
    }

    let conn = Arc::new(Connection::with_config(url, config).await?);
    let mut pools = POOLS
        .write()
        .map_err(|e| BoltError::Internal(format!("pool registry lock poisoned: {}", e)))?;
    Ok(pools.entry(key).or_insert(conn).clone())
}

/// The pool for a URL, if one exists
pub fn lookup_pool(url: &str) -> Option<Arc<Connection>> {
    let key = normalize_url(url);
    POOLS.read().ok().and_then(|pools| pools.get(&key).cloned())
}

/// Drop the pool for a URL; the connection closes once the last operation
/// holding it completes
pub fn remove_pool(url: &str) {
    let key = normalize_url(url);
    if let Ok(mut pools) = POOLS.write() {
        pools.remove(&key);
    }
}

/// Drop every registered pool (shutdown)
pub fn clear_pools() {
    if let Ok(mut pools) = POOLS.write() {
        pools.clear();
    }
}
