//! Keyed record store
//!
//! A small generic layer over SQLite: every stored entity implements
//! [`Record`], and the free functions in this module provide create-table,
//! insert, update, delete, find-by-key, query, scalar and drop-table for any
//! record type. Repositories build on these instead of writing per-table
//! plumbing.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Params, Row};
use uuid::Uuid;

use crate::models::{ConnectionEndpoint, Customer, FileAttachment, Order};

/// A record kind stored in its own table, keyed by a textual UUID
pub trait Record: Sized + Send + 'static {
    /// Table name
    const TABLE: &'static str;
    /// Column names in storage order; the first column is the key
    const COLUMNS: &'static [&'static str];
    /// Table and index definitions (idempotent)
    const DDL: &'static str;

    /// Primary key value
    fn key(&self) -> Uuid;

    /// Column values in `COLUMNS` order
    fn to_values(&self) -> Vec<Value>;

    /// Map a row selected with `COLUMNS` onto the record
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// `SELECT <columns> FROM <table>` for a record type
pub fn select_all<T: Record>() -> String {
    format!("SELECT {} FROM {}", T::COLUMNS.join(", "), T::TABLE)
}

/// Like [`select_all`], with every column qualified by `alias`
pub fn select_all_as<T: Record>(alias: &str) -> String {
    let columns: Vec<String> = T::COLUMNS
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect();
    format!("SELECT {} FROM {} {}", columns.join(", "), T::TABLE, alias)
}

pub fn create_table<T: Record>(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(T::DDL)
}

pub fn drop_table<T: Record>(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", T::TABLE))
}

/// Insert a record, returning rows affected
pub fn insert<T: Record>(conn: &Connection, record: &T) -> rusqlite::Result<usize> {
    let placeholders: Vec<String> = (1..=T::COLUMNS.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        T::TABLE,
        T::COLUMNS.join(", "),
        placeholders.join(", ")
    );
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(record.to_values()))
}

/// Update every non-key column of the row with the record's key
pub fn update<T: Record>(conn: &Connection, record: &T) -> rusqlite::Result<usize> {
    let assignments: Vec<String> = T::COLUMNS
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, c)| format!("{} = ?{}", c, i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?1",
        T::TABLE,
        assignments.join(", "),
        T::COLUMNS[0]
    );
    conn.prepare_cached(&sql)?
        .execute(params_from_iter(record.to_values()))
}

pub fn delete<T: Record>(conn: &Connection, key: Uuid) -> rusqlite::Result<usize> {
    let sql = format!("DELETE FROM {} WHERE {} = ?1", T::TABLE, T::COLUMNS[0]);
    conn.prepare_cached(&sql)?.execute(params![key.to_string()])
}

pub fn exists<T: Record>(conn: &Connection, key: Uuid) -> rusqlite::Result<bool> {
    let sql = format!("SELECT 1 FROM {} WHERE {} = ?1", T::TABLE, T::COLUMNS[0]);
    conn.prepare_cached(&sql)?.exists(params![key.to_string()])
}

/// Insert the record, or update it when its key already exists
///
/// Returns rows affected and whether a new row was inserted.
pub fn upsert<T: Record>(conn: &Connection, record: &T) -> rusqlite::Result<(usize, bool)> {
    if exists::<T>(conn, record.key())? {
        Ok((update(conn, record)?, false))
    } else {
        Ok((insert(conn, record)?, true))
    }
}

pub fn find_by_key<T: Record>(conn: &Connection, key: Uuid) -> rusqlite::Result<Option<T>> {
    let sql = format!("{} WHERE {} = ?1", select_all::<T>(), T::COLUMNS[0]);
    conn.prepare_cached(&sql)?
        .query_row(params![key.to_string()], T::from_row)
        .optional()
}

/// Run a query whose result columns are `T::COLUMNS`
pub fn query<T: Record, P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Vec<T>> {
    query_map(conn, sql, params, T::from_row)
}

/// Run a query with a custom row mapper (e.g. a column-restricted projection)
pub fn query_map<T, P, F>(conn: &Connection, sql: &str, params: P, f: F) -> rusqlite::Result<Vec<T>>
where
    P: Params,
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare_cached(sql)?;
    let rows = stmt.query_map(params, f)?;
    rows.collect()
}

/// Run a query whose first column is a key
pub fn query_ids<P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<Vec<Uuid>> {
    query_map(conn, sql, params, |row| uuid_at(row, 0))
}

/// Run a query returning a single value
pub fn scalar<V: FromSql, P: Params>(conn: &Connection, sql: &str, params: P) -> rusqlite::Result<V> {
    conn.query_row(sql, params, |row| row.get(0))
}

/// Row count for a record type
pub fn count<T: Record>(conn: &Connection) -> rusqlite::Result<u64> {
    let n: i64 = scalar(conn, &format!("SELECT COUNT(*) FROM {}", T::TABLE), [])?;
    Ok(n.max(0) as u64)
}

// ==================== Column helpers ====================

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(s) => Uuid::parse_str(s).map(Some).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
        }),
    }
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

// ==================== Record implementations ====================

impl Record for Customer {
    const TABLE: &'static str = "customers";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "name",
        "address",
        "phone",
        "email",
        "note",
        "national_health_insurance_id",
    ];
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            address TEXT NOT NULL DEFAULT '',
            phone TEXT NOT NULL DEFAULT '',
            email TEXT NOT NULL DEFAULT '',
            note TEXT NOT NULL DEFAULT '',
            national_health_insurance_id TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_customers_name ON customers(name);
    "#;

    fn key(&self) -> Uuid {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.to_string()),
            text(&self.name),
            text(&self.address),
            text(&self.phone),
            text(&self.email),
            text(&self.note),
            text(&self.national_health_insurance_id),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: uuid_at(row, 0)?,
            name: row.get(1)?,
            address: row.get(2)?,
            phone: row.get(3)?,
            email: row.get(4)?,
            note: row.get(5)?,
            national_health_insurance_id: row.get(6)?,
            orders: Vec::new(),
        })
    }
}

impl Record for Order {
    const TABLE: &'static str = "orders";
    const COLUMNS: &'static [&'static str] =
        &["id", "customer_id", "order_number", "start_date", "note"];
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS orders (
            id TEXT PRIMARY KEY,
            customer_id TEXT,
            order_number TEXT NOT NULL DEFAULT '',
            start_date INTEGER NOT NULL,
            note TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_orders_customer_id ON orders(customer_id);
        CREATE INDEX IF NOT EXISTS idx_orders_start_date ON orders(start_date);
    "#;

    fn key(&self) -> Uuid {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.to_string()),
            match self.customer_id {
                Some(id) => Value::Text(id.to_string()),
                None => Value::Null,
            },
            text(&self.order_number),
            Value::Integer(self.start_date.timestamp_millis()),
            text(&self.note),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Order {
            id: uuid_at(row, 0)?,
            customer_id: optional_uuid_at(row, 1)?,
            order_number: row.get(2)?,
            start_date: timestamp_at(row, 3)?,
            note: row.get(4)?,
            files: Vec::new(),
            customer: None,
        })
    }
}

impl Record for FileAttachment {
    const TABLE: &'static str = "files";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "order_id",
        "name",
        "content_type",
        "note",
        "hash_code",
        "content",
    ];
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            name TEXT NOT NULL DEFAULT '',
            content_type TEXT NOT NULL DEFAULT '',
            note TEXT NOT NULL DEFAULT '',
            hash_code TEXT NOT NULL DEFAULT '',
            content BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_files_order_id ON files(order_id);
    "#;

    fn key(&self) -> Uuid {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        let mut values = light_values(self);
        values.push(match &self.content {
            Some(bytes) => Value::Blob(bytes.clone()),
            None => Value::Null,
        });
        values
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let mut file = file_from_light_row(row)?;
        file.content = row.get(6)?;
        Ok(file)
    }
}

/// File columns without the payload
pub const FILE_LIGHT_COLUMNS: &str = "id, order_id, name, content_type, note, hash_code";

fn light_values(file: &FileAttachment) -> Vec<Value> {
    vec![
        Value::Text(file.id.to_string()),
        Value::Text(file.order_id.to_string()),
        text(&file.name),
        text(&file.content_type),
        text(&file.note),
        text(&file.hash_code),
    ]
}

/// Map a row selected with [`FILE_LIGHT_COLUMNS`]; content stays `None`
pub fn file_from_light_row(row: &Row<'_>) -> rusqlite::Result<FileAttachment> {
    Ok(FileAttachment {
        id: uuid_at(row, 0)?,
        order_id: uuid_at(row, 1)?,
        name: row.get(2)?,
        content_type: row.get(3)?,
        note: row.get(4)?,
        hash_code: row.get(5)?,
        content: None,
        is_database_content: true,
    })
}

impl Record for ConnectionEndpoint {
    const TABLE: &'static str = "connections";
    const COLUMNS: &'static [&'static str] = &["id", "device_key", "server_key", "url"];
    const DDL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS connections (
            id TEXT PRIMARY KEY,
            device_key TEXT NOT NULL DEFAULT '',
            server_key TEXT NOT NULL DEFAULT '',
            url TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_connections_url_server ON connections(url, server_key);
    "#;

    fn key(&self) -> Uuid {
        self.id
    }

    fn to_values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.id.to_string()),
            text(&self.device_key),
            text(&self.server_key),
            text(&self.url),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(ConnectionEndpoint {
            id: uuid_at(row, 0)?,
            device_key: row.get(1)?,
            server_key: row.get(2)?,
            url: row.get(3)?,
        })
    }
}
