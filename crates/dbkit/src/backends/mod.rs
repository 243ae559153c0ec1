//! Database Backend Abstractions
//!
//! Drivers are reached through the traits in [`core`]; `backend_for` resolves a
//! configured driver name to an implementation.

pub mod core;
pub mod postgres;

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use std::sync::Arc;

pub use self::core::*;
pub use postgres::PostgresBackend;

use crate::error::{DbError, DbResult};

/// Resolve a driver name to its backend
pub fn backend_for(driver: &str) -> DbResult<Arc<dyn DatabaseBackend>> {
    match driver.to_lowercase().as_str() {
        "postgres" | "postgresql" | "cockroach" | "cockroachdb" => Ok(Arc::new(PostgresBackend::new())),
        #[cfg(any(test, feature = "testing"))]
        "memory" => Ok(Arc::new(memory::MemoryBackend::shared())),
        _ => Err(DbError::Configuration(format!(
            "unsupported database driver: {}",
            driver
        ))),
    }
}
