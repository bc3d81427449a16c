pub mod deleter;
pub mod models;
pub mod selector;

pub use deleter::*;
pub use models::*;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::time::Duration;

use crate::error::{CleanupError, CleanupResult};

#[derive(Clone)]
pub struct Database {
    pub pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a single-connection pool. Each phase borrows that connection and
    /// hands it back on every exit path.
    pub async fn connect(options: PgConnectOptions) -> CleanupResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect_with(options)
            .await
            .map_err(CleanupError::Connect)?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
