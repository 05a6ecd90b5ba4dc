//! Storage layer
//!
//! SQLite backend for the record tables.
//!
//! ## Architecture
//!
//! - **Database**: one connection behind a mutex, driven from the blocking pool
//! - **Record**: generic keyed record store shared by every entity kind
//! - **Schema**: table creation, versioning and reset

pub mod database;
pub mod error;
pub mod record;
pub mod schema;

pub use database::Database;
pub use error::{StoreError, StoreResult};
pub use record::Record;
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
