//! Database management for the sync system.
//!
//! This module provides database operations including:
//! - Schema migrations and the startup schema-version check
//! - The per-account sync cursor store

pub mod cursor;
pub mod migration;

pub use cursor::{advance_cursor, load_cursor};
pub use migration::{check_schema_version, reset_database, run_migrations, SchemaCheckError};
