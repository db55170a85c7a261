//! Ledger persistence boundary.
//!
//! `LedgerStore` is implemented by an in-memory store (tests/dev) and a
//! Postgres store. Both apply workflow changes through the same staging rules.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

pub use in_memory::{InMemoryLedgerStore, ReferenceCatalog};
pub use postgres::PostgresLedgerStore;
pub use query::{DocumentFilter, MovementFilter, RecordFilter};
pub use r#trait::{
    CommitOutcome, CommitRequest, DocumentWrite, LedgerSnapshot, LedgerStore, RecordUpdate,
};

use crate::config::{Backend, LedgerConfig};

/// Open the configured backend. The caller owns the handle and must `close` it.
pub async fn open_store(config: &LedgerConfig) -> anyhow::Result<Arc<dyn LedgerStore>> {
    match &config.backend {
        Backend::Memory => {
            tracing::info!(backend = "memory", "opening ledger store");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        Backend::Postgres { database_url } => {
            tracing::info!(
                backend = "postgres",
                max_connections = config.max_connections,
                "opening ledger store"
            );
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.max_connections)
                .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
                .connect(database_url)
                .await
                .context("failed to connect to Postgres")?;
            let store = PostgresLedgerStore::new(pool);
            if config.run_migrations {
                store
                    .migrate()
                    .await
                    .context("failed to run ledger migrations")?;
            }
            Ok(Arc::new(store))
        }
    }
}
