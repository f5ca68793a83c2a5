//! Persistence.

pub mod entity;
pub mod migration;

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};

use crate::error::{ServerError, ServerResult};
use migration::{Migrator, MigratorTrait};

/// Connects to the embedded database.
pub async fn connect(url: &str) -> ServerResult<DatabaseConnection> {
    let mut options = ConnectOptions::new(url.to_string());
    options
        .connect_timeout(Duration::from_secs(5))
        .sqlx_logging(false);

    // An in-memory SQLite database exists per connection; pooling more
    // than one connection would split the state.
    if url.contains(":memory:") {
        options.max_connections(1);
    }

    Database::connect(options)
        .await
        .map_err(ServerError::database_error)
}

/// Runs all pending migrations.
pub async fn run_migrations(db: &DatabaseConnection) -> ServerResult<()> {
    Migrator::up(db, None)
        .await
        .map_err(ServerError::database_error)
}

/// Returns a fresh migrated in-memory database.
#[cfg(test)]
pub(crate) async fn test_database() -> DatabaseConnection {
    let db = connect("sqlite::memory:").await.unwrap();
    run_migrations(&db).await.unwrap();
    db
}
