pub mod channels;
pub mod events;
pub mod mappings;
pub mod models;
pub mod tasks;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::errors::MirrorError;

/// Opens the pooled Postgres connection and applies pending migrations.
/// Grounded in the teacher's `ConnectionPool::new` + `initialize_database`
/// (`message_persistence.rs`), generalized to `sqlx`'s own pool + migrator
/// rather than a hand-rolled semaphore pool, since the driver already pools.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, MirrorError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("database schema up to date");

    Ok(pool)
}
