//! Versioned SQL migrations
//!
//! Loading migration files, and applying or rolling them back against a pool.

pub mod definitions;
pub mod loader;
pub mod runner;

pub use definitions::*;
pub use loader::{create, load};
pub use runner::{migrate, run, MigrationRunner};
