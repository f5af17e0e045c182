//! Database layer
//!
//! Trait-based abstraction over SQLite (default, single-binary deployment)
//! and MySQL. The driver is selected from configuration; repositories branch
//! on `pool.driver()` for the row types each backend produces.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool};
