//! Cancelable record streams
//!
//! Every listing has a streaming counterpart that yields fully hydrated
//! records one at a time. Streams are pull-based: nothing is read ahead, and
//! the record for an element is only fetched (and hydrated) when the consumer
//! asks for it. Keys are enumerated when the stream is first polled, so a
//! file stream holds at most one payload in memory.
//!
//! The cancellation token is checked before each element and before each
//! nested hydration step. A cancelled stream yields a single
//! [`StoreError::Cancelled`](crate::StoreError::Cancelled) and then ends.

use std::collections::VecDeque;

use futures_util::stream::{self, BoxStream, StreamExt};
use rusqlite::{params, Connection};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{ChangeAction, ChangePayload, EntityKind};
use crate::models::{ConnectionEndpoint, Customer, FileAttachment, Order};
use crate::repository::files::light_file_by_id;
use crate::repository::orders::load_order;
use crate::repository::{connections, customers, orders};
use crate::repository::{dedup_by_id, ensure_active, like_any, like_pattern, load_customer, LocalDatabase};
use crate::storage::record::{self, Record};
use crate::storage::StoreResult;

/// A lazily produced sequence of records
pub type RecordStream<T> = BoxStream<'static, StoreResult<T>>;

type ListKeys = Box<dyn FnOnce(&Connection) -> rusqlite::Result<Vec<Uuid>> + Send>;
type Fetch<T> = fn(&Connection, Uuid, &CancellationToken) -> StoreResult<Option<T>>;

/// Stream state: keys still to produce, fetched one per pull
struct Cursor<T> {
    repo: LocalDatabase,
    token: CancellationToken,
    entity: EntityKind,
    list: Option<ListKeys>,
    keys: VecDeque<Uuid>,
    fetch: Fetch<T>,
    wrap: fn(T) -> ChangePayload,
    finished: bool,
}

impl<T: Clone + Send + 'static> Cursor<T> {
    async fn next(&mut self) -> Option<StoreResult<T>> {
        if self.finished {
            return None;
        }
        match self.advance().await {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                if e.is_cancelled() {
                    warn!("{:?} stream cancelled", self.entity);
                }
                Some(Err(e))
            }
        }
    }

    async fn advance(&mut self) -> StoreResult<Option<T>> {
        if let Some(list) = self.list.take() {
            ensure_active(&self.token)?;
            let keys = self.repo.call(move |conn| Ok(list(&*conn)?)).await?;
            debug!("{:?} stream over {} records", self.entity, keys.len());
            self.keys = keys.into();
        }

        loop {
            ensure_active(&self.token)?;
            let Some(key) = self.keys.pop_front() else {
                return Ok(None);
            };

            let fetch = self.fetch;
            let token = self.token.clone();
            // Rows removed since the keys were listed are skipped
            if let Some(item) = self.repo.call(move |conn| fetch(conn, key, &token)).await? {
                let wrap = self.wrap;
                self.repo
                    .emit(self.entity, ChangeAction::StreamElementRetrieved, || wrap(item.clone()));
                return Ok(Some(item));
            }
        }
    }
}

fn keyed_stream<T, L>(
    repo: &LocalDatabase,
    token: CancellationToken,
    entity: EntityKind,
    list: L,
    fetch: Fetch<T>,
    wrap: fn(T) -> ChangePayload,
) -> RecordStream<T>
where
    T: Clone + Send + 'static,
    L: FnOnce(&Connection) -> rusqlite::Result<Vec<Uuid>> + Send + 'static,
{
    let cursor = Cursor {
        repo: repo.clone(),
        token,
        entity,
        list: Some(Box::new(list)),
        keys: VecDeque::new(),
        fetch,
        wrap,
        finished: false,
    };

    stream::unfold(cursor, |mut cursor| async move {
        cursor.next().await.map(|item| (item, cursor))
    })
    .boxed()
}

/// Keys for a fixed query
fn all_keys(sql: &'static str) -> impl FnOnce(&Connection) -> rusqlite::Result<Vec<Uuid>> + Send {
    move |conn| record::query_ids(conn, sql, [])
}

/// Keys matching a search pattern, first occurrence kept
fn matching_keys(sql: String, pattern: String) -> impl FnOnce(&Connection) -> rusqlite::Result<Vec<Uuid>> + Send {
    move |conn| {
        let keys = record::query_ids(conn, &sql, params![pattern])?;
        Ok(dedup_by_id(keys, |k| *k))
    }
}

/// Keys of one order's files
fn order_file_keys(order_id: Uuid) -> impl FnOnce(&Connection) -> rusqlite::Result<Vec<Uuid>> + Send {
    move |conn| {
        record::query_ids(
            conn,
            "SELECT id FROM files WHERE order_id = ?1 ORDER BY rowid",
            params![order_id.to_string()],
        )
    }
}

/// The stored row as is, nothing attached
fn row<T: Record>(conn: &Connection, id: Uuid, _token: &CancellationToken) -> StoreResult<Option<T>> {
    Ok(record::find_by_key::<T>(conn, id)?)
}

fn light_file(conn: &Connection, id: Uuid, _token: &CancellationToken) -> StoreResult<Option<FileAttachment>> {
    Ok(light_file_by_id(conn, id)?)
}

impl LocalDatabase {
    /// Every customer in insertion order, each with orders and lightweight files
    pub fn stream_customers(&self, token: CancellationToken) -> RecordStream<Customer> {
        keyed_stream(
            self,
            token,
            EntityKind::Customer,
            all_keys("SELECT id FROM customers ORDER BY rowid"),
            load_customer,
            ChangePayload::Customer,
        )
    }

    /// Streaming form of [`search_customers`](Self::search_customers)
    pub fn search_customers_stream(&self, text: &str, token: CancellationToken) -> RecordStream<Customer> {
        let Some(pattern) = like_pattern(text) else {
            return self.stream_customers(token);
        };
        let sql = format!(
            "SELECT id FROM customers WHERE {} ORDER BY name, rowid",
            like_any(customers::SEARCH_COLUMNS)
        );
        keyed_stream(
            self,
            token,
            EntityKind::Customer,
            matching_keys(sql, pattern),
            load_customer,
            ChangePayload::Customer,
        )
    }

    /// Every order by start date, each with lightweight files and its customer
    pub fn stream_orders(&self, token: CancellationToken) -> RecordStream<Order> {
        keyed_stream(
            self,
            token,
            EntityKind::Order,
            all_keys("SELECT id FROM orders ORDER BY start_date, rowid"),
            load_order,
            ChangePayload::Order,
        )
    }

    /// Streaming form of [`search_orders`](Self::search_orders)
    pub fn search_orders_stream(&self, text: &str, token: CancellationToken) -> RecordStream<Order> {
        let Some(pattern) = like_pattern(text) else {
            return self.stream_orders(token);
        };
        let sql = format!(
            "SELECT o.id FROM orders o LEFT JOIN customers c ON c.id = o.customer_id WHERE {} ORDER BY o.start_date, o.rowid",
            like_any(orders::SEARCH_COLUMNS)
        );
        keyed_stream(
            self,
            token,
            EntityKind::Order,
            matching_keys(sql, pattern),
            load_order,
            ChangePayload::Order,
        )
    }

    /// Every file with content
    pub fn stream_files(&self, token: CancellationToken) -> RecordStream<FileAttachment> {
        keyed_stream(
            self,
            token,
            EntityKind::File,
            all_keys("SELECT id FROM files ORDER BY rowid"),
            row::<FileAttachment>,
            ChangePayload::File,
        )
    }

    /// Files of one order with content
    pub fn stream_files_by_order_id(&self, order_id: Uuid, token: CancellationToken) -> RecordStream<FileAttachment> {
        keyed_stream(
            self,
            token,
            EntityKind::File,
            order_file_keys(order_id),
            row::<FileAttachment>,
            ChangePayload::File,
        )
    }

    /// Files of one order, content omitted
    pub fn stream_files_by_order_id_without_content(
        &self,
        order_id: Uuid,
        token: CancellationToken,
    ) -> RecordStream<FileAttachment> {
        keyed_stream(
            self,
            token,
            EntityKind::File,
            order_file_keys(order_id),
            light_file,
            ChangePayload::File,
        )
    }

    /// Every connection endpoint in insertion order
    pub fn stream_connections(&self, token: CancellationToken) -> RecordStream<ConnectionEndpoint> {
        keyed_stream(
            self,
            token,
            EntityKind::Connection,
            all_keys("SELECT id FROM connections ORDER BY rowid"),
            row::<ConnectionEndpoint>,
            ChangePayload::Connection,
        )
    }

    /// Streaming form of [`search_connections`](Self::search_connections)
    pub fn search_connections_stream(&self, text: &str, token: CancellationToken) -> RecordStream<ConnectionEndpoint> {
        let Some(pattern) = like_pattern(text) else {
            return self.stream_connections(token);
        };
        let sql = format!(
            "SELECT id FROM connections WHERE {} ORDER BY rowid",
            like_any(connections::SEARCH_COLUMNS)
        );
        keyed_stream(
            self,
            token,
            EntityKind::Connection,
            matching_keys(sql, pattern),
            row::<ConnectionEndpoint>,
            ChangePayload::Connection,
        )
    }

    /// Customer rows in insertion order, orders not attached
    pub(crate) fn stream_customer_rows(&self, token: CancellationToken) -> RecordStream<Customer> {
        keyed_stream(
            self,
            token,
            EntityKind::Customer,
            all_keys("SELECT id FROM customers ORDER BY rowid"),
            row::<Customer>,
            ChangePayload::Customer,
        )
    }

    /// Order rows by start date, files and customer not attached
    pub(crate) fn stream_order_rows(&self, token: CancellationToken) -> RecordStream<Order> {
        keyed_stream(
            self,
            token,
            EntityKind::Order,
            all_keys("SELECT id FROM orders ORDER BY start_date, rowid"),
            row::<Order>,
            ChangePayload::Order,
        )
    }
}

/// Drain a stream into a vector, stopping at the first error
pub async fn collect_stream<T>(mut stream: RecordStream<T>) -> StoreResult<Vec<T>> {
    let mut items = Vec::new();
    while let Some(item) = stream.next().await {
        items.push(item?);
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::EventLog;
    use crate::events::ChangeBus;
    use crate::storage::StoreError;
    use chrono::{TimeZone, Utc};

    fn test_db() -> (LocalDatabase, EventLog) {
        let bus = ChangeBus::new();
        let log = EventLog::attach(&bus);
        (LocalDatabase::open_in_memory(bus).unwrap(), log)
    }

    #[tokio::test]
    async fn test_cancel_after_third_customer() {
        let (db, _log) = test_db();
        for i in 0..100 {
            db.create_customer(&Customer::new(format!("Customer {}", i)))
                .await
                .unwrap();
        }

        let token = CancellationToken::new();
        let mut stream = db.stream_customers(token.clone());

        let mut produced = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(customer) => {
                    produced.push(customer);
                    if produced.len() == 3 {
                        token.cancel();
                    }
                }
                Err(e) => {
                    assert!(e.is_cancelled());
                    // Only one error, then the stream ends
                    assert!(stream.next().await.is_none());
                    break;
                }
            }
        }

        assert_eq!(produced.len(), 3);
        assert_eq!(produced[0].name, "Customer 0");
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (db, _log) = test_db();
        db.create_customer(&Customer::new("Ada")).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let mut stream = db.stream_customers(token);
        assert!(matches!(stream.next().await, Some(Err(StoreError::Cancelled))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_matches_listing_order_and_hydration() {
        let (db, log) = test_db();
        for name in ["Carol", "Alice", "Bob"] {
            let customer = Customer::new(name);
            db.create_customer(&customer).await.unwrap();
            let order = Order::new(Some(customer.id), format!("{}-1", name));
            db.create_order(&order).await.unwrap();
            db.create_file(&FileAttachment::new(order.id, "a.pdf", vec![1; 16]))
                .await
                .unwrap();
        }
        let listed = db.get_all_customers(None).await.unwrap();
        log.clear();

        let streamed = collect_stream(db.stream_customers(CancellationToken::new()))
            .await
            .unwrap();

        assert_eq!(streamed, listed);
        assert_eq!(streamed[0].file_count(), 1);
        assert!(streamed[0].orders[0].files[0].content.is_none());
        assert_eq!(
            log.count(EntityKind::Customer, ChangeAction::StreamElementRetrieved),
            3
        );
    }

    #[tokio::test]
    async fn test_search_streams() {
        let (db, _log) = test_db();
        let ada = Customer::new("Ada Lovelace");
        db.create_customer(&ada).await.unwrap();
        db.create_customer(&Customer::new("Grace Hopper")).await.unwrap();
        db.create_order(&Order::new(Some(ada.id), "A-1")).await.unwrap();
        db.create_order(&Order::new(None, "B-1")).await.unwrap();
        db.create_or_update_connection(&ConnectionEndpoint::new("https://kor.example", "s", "d"))
            .await
            .unwrap();

        let token = CancellationToken::new();
        let found = collect_stream(db.search_customers_stream("lovelace", token.clone()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let found = collect_stream(db.search_orders_stream("ada", token.clone()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].customer.as_ref().map(|c| c.id), Some(ada.id));

        let all = collect_stream(db.search_orders_stream(" ", token.clone()))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let found = collect_stream(db.search_connections_stream("KOR", token.clone()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(collect_stream(db.search_connections_stream("nothing", token))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_file_streams_with_and_without_content() {
        let (db, _log) = test_db();
        let order = Order::new(None, "A-1");
        let other = Order::new(None, "A-2");
        db.create_order(&order).await.unwrap();
        db.create_order(&other).await.unwrap();
        db.create_file(&FileAttachment::new(order.id, "a", vec![1, 2])).await.unwrap();
        db.create_file(&FileAttachment::new(order.id, "b", vec![3])).await.unwrap();
        db.create_file(&FileAttachment::new(other.id, "c", vec![4])).await.unwrap();

        let token = CancellationToken::new();
        let all = collect_stream(db.stream_files(token.clone())).await.unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|f| f.has_content() && f.is_database_content));

        let full = collect_stream(db.stream_files_by_order_id(order.id, token.clone()))
            .await
            .unwrap();
        assert_eq!(full.len(), 2);
        assert_eq!(full[0].content, Some(vec![1, 2]));

        let light = collect_stream(db.stream_files_by_order_id_without_content(order.id, token))
            .await
            .unwrap();
        assert_eq!(light.len(), 2);
        assert!(light.iter().all(|f| f.content.is_none() && f.is_database_content));
    }

    #[tokio::test]
    async fn test_rows_deleted_mid_stream_are_skipped() {
        let (db, _log) = test_db();
        let first = ConnectionEndpoint::new("https://a", "s", "d");
        let second = ConnectionEndpoint::new("https://b", "s", "d");
        db.create_or_update_connection(&first).await.unwrap();
        db.create_or_update_connection(&second).await.unwrap();

        let mut stream = db.stream_connections(CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().unwrap().id, first.id);
        db.delete_connection(second.id).await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_streams_are_not_shared() {
        let (db, _log) = test_db();
        db.create_customer(&Customer::new("Ada")).await.unwrap();

        let token = CancellationToken::new();
        let first = collect_stream(db.stream_customers(token.clone())).await.unwrap();
        let second = collect_stream(db.stream_customers(token)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_row_streams_attach_nothing() {
        let (db, _log) = test_db();
        let customer = Customer::new("Ada");
        db.create_customer(&customer).await.unwrap();
        let early = Order::new(Some(customer.id), "A-2")
            .starting_at(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let late = Order::new(Some(customer.id), "A-1")
            .starting_at(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        db.create_order(&late).await.unwrap();
        db.create_order(&early).await.unwrap();
        db.create_file(&FileAttachment::new(early.id, "a.pdf", vec![1]))
            .await
            .unwrap();

        let customers = collect_stream(db.stream_customer_rows(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(customers.len(), 1);
        assert!(customers[0].orders.is_empty());

        let orders = collect_stream(db.stream_order_rows(CancellationToken::new()))
            .await
            .unwrap();
        let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert!(orders.iter().all(|o| o.customer.is_none() && o.files.is_empty()));

        // The hydrating stream still attaches both
        let hydrated = collect_stream(db.stream_orders(CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(hydrated[0].files.len(), 1);
        assert!(hydrated[0].customer.is_some());
    }
}
