//! PostgreSQL connection management.

use crate::config::DatabaseConfig;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;

/// Create a PostgreSQL connection pool.
///
/// Checkout waits at most `acquire_timeout_ms`; every statement on a pooled
/// connection is cut off server-side after `statement_timeout_ms`.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!("Connecting to PostgreSQL...");

    let options = PgConnectOptions::from_str(&config.url)?.options([(
        "statement_timeout",
        config.statement_timeout_ms.to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect_with(options)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        acquire_timeout_ms = config.acquire_timeout_ms,
        "Successfully connected to PostgreSQL"
    );

    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("Database migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running PostgreSQL
    async fn test_create_pool() {
        let config = DatabaseConfig {
            url: "postgres://localhost/identity_test".to_string(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout_ms: 2000,
            statement_timeout_ms: 5000,
        };

        let result = create_pool(&config).await;
        assert!(result.is_ok());
    }
}
