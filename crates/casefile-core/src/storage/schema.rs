//! SQLite schema for the record tables
//!
//! Table definitions live with each [`Record`] implementation; this module
//! creates them together, tracks the schema version, and resets the record
//! tables before an import.

use rusqlite::{Connection, Result};

use crate::models::{ConnectionEndpoint, Customer, FileAttachment, Order};
use crate::storage::record::{create_table, drop_table, Record};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    )?;

    create_record_tables(conn)?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('version', ?)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

fn create_record_tables(conn: &Connection) -> Result<()> {
    create_table::<Customer>(conn)?;
    create_table::<Order>(conn)?;
    create_table::<FileAttachment>(conn)?;
    create_table::<ConnectionEndpoint>(conn)?;
    Ok(())
}

/// Drop and recreate all four record tables, leaving them empty
pub fn reset_record_tables(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    drop_table::<Customer>(&tx)?;
    drop_table::<Order>(&tx)?;
    drop_table::<FileAttachment>(&tx)?;
    drop_table::<ConnectionEndpoint>(&tx)?;
    create_record_tables(&tx)?;
    tx.commit()
}

/// Names of the record tables, in export order
pub fn record_tables() -> [&'static str; 4] {
    [
        Customer::TABLE,
        Order::TABLE,
        FileAttachment::TABLE,
        ConnectionEndpoint::TABLE,
    ]
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<Option<i32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_info WHERE key = 'version'")?;
    let result: Result<String> = stmt.query_row([], |row| row.get(0));

    match result {
        Ok(version_str) => Ok(version_str.parse().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Check if schema needs initialization or migration
pub fn needs_init(conn: &Connection) -> bool {
    let table_exists: bool = conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_info'")
        .and_then(|mut stmt| stmt.exists([]))
        .unwrap_or(false);

    if !table_exists {
        return true;
    }

    match get_schema_version(conn) {
        Ok(Some(v)) => v < SCHEMA_VERSION,
        _ => true,
    }
}
