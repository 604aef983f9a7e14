use anyhow::{Context, Result};
use carelink_sync::SyncEngine;
use std::sync::Arc;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct CareLinkServer {
    /// Server configuration
    pub config: ServerConfig,
    /// Sync engine instance
    pub engine: Arc<SyncEngine>,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name
    pub name: String,
    /// Path of the SQLite database file backing the sync engine
    pub database_path: String,
}

impl CareLinkServer {
    /// Create a new server instance backed by the database at `database_path`.
    pub async fn new(database_path: &str) -> Result<Self> {
        let config = ServerConfig {
            name: "CareLink Sync".to_string(),
            database_path: database_path.to_string(),
        };

        let engine = SyncEngine::new(database_path)
            .await
            .with_context(|| format!("Failed to open sync database at {}", database_path))?;

        Ok(Self {
            config,
            engine: Arc::new(engine),
        })
    }
}
