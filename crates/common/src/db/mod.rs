//! Database layer for the Postgres corpus backend
//!
//! Provides:
//! - Connection pool management
//! - pgvector-backed vector index, chunk store and catalog

mod repository;

pub use repository::PgCorpus;

use crate::config::CorpusConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    connection: DatabaseConnection,
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &CorpusConfig) -> Result<Self> {
        let url = config.database_url.as_deref().ok_or_else(|| AppError::Configuration {
            message: "corpus.database_url is not set".to_string(),
        })?;

        info!("Connecting to corpus database...");

        let mut opts = ConnectOptions::new(url);
        opts
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .sqlx_logging(false);

        let connection = Database::connect(opts)
            .await
            .map_err(|e| AppError::Corpus {
                message: format!("Failed to connect to corpus database: {}", e)
            })?;

        info!("Corpus database connection established");

        Ok(Self { connection })
    }

    /// The corpus is read-only from this service, so one connection kind suffices
    pub fn read(&self) -> &DatabaseConnection {
        &self.connection
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.connection
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::Corpus {
                message: format!("Corpus ping failed: {}", e),
            })?;
        Ok(())
    }
}
