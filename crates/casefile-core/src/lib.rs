//! Casefile Core Library
//!
//! Local persistence for a customer case file: customers, their orders, the
//! binary attachments of each order, and the connection endpoints used to
//! reach remote devices.
//!
//! # Architecture
//!
//! - **SQLite**: single local database file, one table per record kind
//! - **LocalDatabase**: async CRUD, search, pagination and hydration
//! - **ChangeBus**: observers are told about every create, read, update and delete
//! - **Streams**: cancelable, record-at-a-time reads for large result sets
//! - **Transfer**: streaming JSON export and import of the whole dataset
//!
//! # Quick Start
//!
//! ```text
//! let db = LocalDatabase::open(&Config::load()?, ChangeBus::new())?;
//!
//! let customer = Customer::new("Ada Lovelace");
//! db.create_customer(&customer).await?;
//!
//! let order = Order::new(Some(customer.id), "A-1001");
//! db.create_order(&order).await?;
//!
//! // Orders and their files come back attached
//! let found = db.get_customer_by_id(customer.id).await?;
//! ```
//!
//! # Modules
//!
//! - `repository`: the database handle and per-kind operations (main entry point)
//! - `models`: customers, orders, file attachments and connection endpoints
//! - `events`: change notifications
//! - `stream`: cancelable record streams
//! - `transfer`: bulk export and import
//! - `storage`: SQLite backend and error types
//! - `config`: application configuration

pub mod config;
pub mod events;
pub mod models;
pub mod repository;
pub mod storage;
pub mod stream;
pub mod transfer;

pub use config::Config;
pub use events::{
    ChangeAction, ChangeBus, ChangeEvent, ChangeObserver, ChangePayload, EntityKind, SubscriptionId,
};
pub use models::{ConnectionEndpoint, Customer, FileAttachment, Order};
pub use repository::{format_size, LocalDatabase, Page, PAGE_SIZE};
pub use storage::{StoreError, StoreResult};
pub use stream::{collect_stream, RecordStream};
pub use transfer::{ExportSummary, ImportSummary, ProgressFn, Section};
pub use tokio_util::sync::CancellationToken;
