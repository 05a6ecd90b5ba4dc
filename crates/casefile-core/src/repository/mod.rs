//! Repository core
//!
//! [`LocalDatabase`] is the entry point for reading and writing customers,
//! orders, file attachments and connection endpoints. Per-kind operations are
//! split across the submodules; this module holds the handle itself plus the
//! helpers they share (pagination, search patterns, hydration fan-out).
//!
//! ## Usage
//!
//! ```ignore
//! let bus = ChangeBus::new();
//! let db = LocalDatabase::open(&Config::load()?, bus.clone())?;
//!
//! let customer = Customer::new("Ada Lovelace");
//! db.create_customer(&customer).await?;
//!
//! let page = db.search_customers("ada", Page::new(1)).await?;
//! ```

pub(crate) mod connections;
pub(crate) mod customers;
pub(crate) mod files;
pub(crate) mod orders;

use std::collections::HashSet;
use std::path::Path;

use futures_util::future::join_all;
use rusqlite::Connection;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::config::Config;
use crate::events::{ChangeAction, ChangeBus, ChangePayload, EntityKind};
use crate::storage::{Database, StoreError, StoreResult};

pub(crate) use customers::load_customer;
pub(crate) use files::light_files;
pub(crate) use orders::hydrate_order;

/// Rows per page for paged listings and searches
pub const PAGE_SIZE: u32 = 5;

/// A 1-based page of [`PAGE_SIZE`] rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page(u32);

impl Page {
    /// Page `number`, or `None` for 0
    pub fn new(number: u32) -> Option<Self> {
        (number >= 1).then_some(Self(number))
    }

    pub fn first() -> Self {
        Self(1)
    }

    pub fn number(self) -> u32 {
        self.0
    }

    pub fn offset(self) -> u64 {
        u64::from(self.0 - 1) * u64::from(PAGE_SIZE)
    }

    /// `LIMIT`/`OFFSET` clause for this page
    pub(crate) fn clause(self) -> String {
        format!(" LIMIT {} OFFSET {}", PAGE_SIZE, self.offset())
    }
}

/// Append the page clause when paging
pub(crate) fn paged(sql: String, page: Option<Page>) -> String {
    match page {
        Some(page) => sql + &page.clause(),
        None => sql,
    }
}

/// Row hydration step, run on the blocking pool
pub(crate) type Hydrate<T> = fn(&Connection, &mut T, &CancellationToken) -> StoreResult<()>;

/// Handle to the local store
///
/// Cloning is cheap; clones share the connection and the change bus.
#[derive(Clone, Debug)]
pub struct LocalDatabase {
    db: Database,
    bus: ChangeBus,
}

impl LocalDatabase {
    /// Open the database configured in `config`
    pub fn open(config: &Config, bus: ChangeBus) -> StoreResult<Self> {
        Self::open_at(&config.database_path(), bus)
    }

    /// Open the database at a specific path
    pub fn open_at(path: &Path, bus: ChangeBus) -> StoreResult<Self> {
        let db = Database::open(path)?;
        Ok(Self { db, bus })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(bus: ChangeBus) -> StoreResult<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db, bus })
    }

    pub fn bus(&self) -> &ChangeBus {
        &self.bus
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub(crate) async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db.call(f).await
    }

    pub(crate) fn emit(
        &self,
        entity: EntityKind,
        action: ChangeAction,
        payload: impl FnOnce() -> ChangePayload,
    ) {
        self.bus.emit(entity, action, payload);
    }

    /// Hydrate every row in its own task and wait for all of them
    ///
    /// All tasks are spawned before any is awaited. The first failure is
    /// returned once every task has settled.
    ///
    /// Every task goes through the one shared connection, so the SQLite work
    /// itself runs one row at a time; only the scheduling is concurrent.
    pub(crate) async fn hydrate_each<T>(&self, rows: Vec<T>, hydrate: Hydrate<T>) -> StoreResult<Vec<T>>
    where
        T: Send + 'static,
    {
        debug!("Hydrating {} rows", rows.len());
        let handles: Vec<_> = rows
            .into_iter()
            .map(|mut row| {
                let db = self.db.clone();
                tokio::spawn(async move {
                    db.call(move |conn| {
                        hydrate(conn, &mut row, &CancellationToken::new())?;
                        Ok(row)
                    })
                    .await
                })
            })
            .collect();

        let mut hydrated = Vec::with_capacity(handles.len());
        let mut first_error = None;
        for settled in join_all(handles).await {
            match settled {
                Ok(Ok(row)) => hydrated.push(row),
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join) => {
                    first_error.get_or_insert(StoreError::Task(join.to_string()));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(hydrated),
        }
    }
}

/// Fail with [`StoreError::Cancelled`] once the token has fired
pub(crate) fn ensure_active(token: &CancellationToken) -> StoreResult<()> {
    if token.is_cancelled() {
        Err(StoreError::Cancelled)
    } else {
        Ok(())
    }
}

/// Build a `LIKE` pattern from free-form search text
///
/// Trims, lower-cases, and turns each whitespace run into `%`, wrapped in
/// `%...%`. Returns `None` for blank text.
pub(crate) fn like_pattern(text: &str) -> Option<String> {
    let words: Vec<String> = text.split_whitespace().map(str::to_lowercase).collect();
    if words.is_empty() {
        None
    } else {
        Some(format!("%{}%", words.join("%")))
    }
}

/// `LOWER(col) LIKE ?1 OR ...` across `columns`
pub(crate) fn like_any(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!("LOWER({}) LIKE ?1", c))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Drop repeated keys, keeping the first occurrence
pub(crate) fn dedup_by_id<T>(items: Vec<T>, key: impl Fn(&T) -> Uuid) -> Vec<T> {
    let mut seen = HashSet::new();
    items.into_iter().filter(|item| seen.insert(key(item))).collect()
}

/// Human-readable byte size using 1024-based units
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["KB", "MB", "GB", "TB", "PB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut size = bytes as f64 / 1024.0;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", size, UNITS[unit])
}
