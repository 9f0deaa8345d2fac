//! Database connection setup for the relational store.
//!
//! Connection pool settings are tuned for a handful of concurrent chunk writers
//! holding one transaction each.

use crate::config::OutputConfig;
use crate::io::student;
use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema};
use std::time::Duration;

/// Whether `url` names an in-memory SQLite database.
///
/// Every pooled connection to such a URL opens its own empty database, so the pool
/// is pinned to a single connection.
pub fn is_in_memory(url: &str) -> bool {
    url.starts_with("sqlite:") && url.contains(":memory:")
}

/// Build connection options from the output configuration.
fn create_connect_options(config: &OutputConfig) -> ConnectOptions {
    let mut options = ConnectOptions::new(config.database_url.clone());
    options
        // How long to wait for a new connection to be established
        .connect_timeout(Duration::from_secs(5))
        // How long a writer waits for a free pooled connection
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(90))
        .sqlx_logging(false);

    if is_in_memory(&config.database_url) {
        options.max_connections(1).min_connections(1);
    } else if let Some(max) = config.max_connections {
        options.max_connections(max);
    }

    options
}

/// Open a pooled connection to the configured database.
pub async fn connect(config: &OutputConfig) -> Result<DatabaseConnection> {
    tracing::info!("Connecting to {}", config.database_url);

    let db = Database::connect(create_connect_options(config))
        .await
        .with_context(|| format!("Failed to connect to {}", config.database_url))?;

    if config.create_schema {
        ensure_schema(&db).await?;
    }

    Ok(db)
}

/// Create the `student` table if it does not exist.
pub async fn ensure_schema(db: &DatabaseConnection) -> Result<()> {
    let backend = db.get_database_backend();
    let mut statement = Schema::new(backend).create_table_from_entity(student::Entity);
    statement.if_not_exists();

    db.execute(backend.build(&statement))
        .await
        .context("Failed to create student table")?;

    tracing::debug!("Schema ready");
    Ok(())
}
