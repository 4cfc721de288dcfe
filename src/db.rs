//! Connection pool and migration runner for the relational store.

use crate::config::DatabaseConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connect to Postgres and run migrations to the latest version.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

/// Test-only helpers for provisioning an ephemeral Postgres instance per test.
pub mod test_support {
    use log::LevelFilter;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use sqlx::{ConnectOptions, PgPool};
    use testcontainers::{GenericImage, ImageExt, core::WaitFor};
    use testcontainers_modules::testcontainers::{
        ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
    };
    use thiserror::Error;
    use uuid::Uuid;

    use super::MIGRATOR;

    #[derive(Debug, Error)]
    pub enum TestDatabaseError {
        #[error("TEST_DATABASE_URL not set")]
        MissingUrl,
        #[error("database error: {0}")]
        Sqlx(#[from] sqlx::Error),
        #[error("migration error: {0}")]
        Migration(#[from] sqlx::migrate::MigrateError),
        #[error("container error: {0}")]
        Container(#[from] TestcontainersError),
    }

    /// Ephemeral database factory for integration tests: launches a disposable
    /// Postgres container, creates a uniquely-named database, runs migrations,
    /// and drops everything on `close`.
    pub struct TestDatabase {
        pool: Option<PgPool>,
        admin_options: PgConnectOptions,
        database_name: String,
        container: Option<ContainerAsync<GenericImage>>,
    }

    impl TestDatabase {
        pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
            Self::new().await
        }

        pub async fn new() -> Result<Self, TestDatabaseError> {
            let image = GenericImage::new("postgres", "16-alpine")
                .with_wait_for(WaitFor::message_on_stdout(
                    "database system is ready to accept connections",
                ))
                .with_wait_for(WaitFor::message_on_stderr(
                    "database system is ready to accept connections",
                ));

            let request = image
                .with_env_var("POSTGRES_DB", "postgres")
                .with_env_var("POSTGRES_USER", "postgres")
                .with_env_var("POSTGRES_PASSWORD", "postgres");

            let container = request.start().await?;

            let host = container.get_host().await?.to_string();
            let port = container.get_host_port_ipv4(5432).await?;
            let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let base_options: PgConnectOptions = admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
            let base_options = base_options.log_statements(LevelFilter::Off);

            let admin_options = base_options.clone().database("postgres");
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options.clone())
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            let new_db_name = format!("mailfind_test_{}", Uuid::new_v4().simple());
            let create_sql = format!("CREATE DATABASE \"{}\"", new_db_name);
            sqlx::query(&create_sql)
                .execute(&admin_pool)
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect_with(base_options.clone().database(&new_db_name))
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            MIGRATOR.run(&pool).await?;

            Ok(Self {
                pool: Some(pool),
                admin_options,
                database_name: new_db_name,
                container: Some(container),
            })
        }

        pub fn pool(&self) -> &PgPool {
            self.pool.as_ref().expect("test database pool is available")
        }

        pub fn pool_clone(&self) -> PgPool {
            self.pool().clone()
        }

        pub async fn close(mut self) -> Result<(), TestDatabaseError> {
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }

            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(self.admin_options.clone())
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            let drop_sql = format!(
                "DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)",
                self.database_name
            );
            sqlx::query(&drop_sql)
                .execute(&admin_pool)
                .await
                .map_err(TestDatabaseError::Sqlx)?;

            if let Some(container) = self.container.take() {
                drop(container);
            }

            Ok(())
        }
    }
}
