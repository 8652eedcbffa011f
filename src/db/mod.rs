use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::Config;

pub mod memory;
pub mod models;
pub mod pg;
pub mod queries;
pub mod store;

pub use memory::MemoryStore;
pub use pg::PgStore;
pub use store::Store;

pub async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
}
