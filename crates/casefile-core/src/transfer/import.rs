//! Streaming JSON import
//!
//! Three cooperating parts run concurrently:
//!
//! 1. a reader task copying the async source into byte chunks,
//! 2. a blocking parser walking the document with a `serde_json` visitor and
//!    sending each decoded record over a bounded channel,
//! 3. the calling task, which stores every record through the regular
//!    upsert operations and reports checkpoint progress.
//!
//! The bounded channels keep at most a few records and chunks in flight.

use std::cell::Cell;
use std::fmt;
use std::io::{self, Read};
use std::path::Path;

use serde::de::{self, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{ImportSummary, Progress, ProgressFn, Section};
use crate::models::{ConnectionEndpoint, Customer, FileAttachment, Order};
use crate::repository::LocalDatabase;
use crate::storage::schema::reset_record_tables;
use crate::storage::{StoreError, StoreResult};

const CHUNK_SIZE: usize = 64 * 1024;
const CHUNKS_IN_FLIGHT: usize = 4;
const RECORDS_IN_FLIGHT: usize = 16;
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decoded unit handed from the parser to the store
enum ImportItem {
    Customer(Customer),
    Order(Order),
    File(FileAttachment),
    Connection(ConnectionEndpoint),
    SectionEnd(Section),
}

/// Check that the document opens with `{`, skipping a BOM and whitespace
///
/// Leaves the brace unread.
async fn expect_object_start<R: AsyncBufRead + Unpin>(reader: &mut R) -> StoreResult<()> {
    let mut at_start = true;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Err(StoreError::deserialization("document", "document is empty"));
        }

        let mut skip = 0;
        if at_start && buf.starts_with(UTF8_BOM) {
            skip = UTF8_BOM.len();
        }
        at_start = false;
        while skip < buf.len() && buf[skip].is_ascii_whitespace() {
            skip += 1;
        }

        let first = buf.get(skip).copied();
        reader.consume(skip);
        match first {
            Some(b'{') => return Ok(()),
            Some(other) => {
                return Err(StoreError::deserialization(
                    "document",
                    format!("expected start of JSON object, found {:?}", other as char),
                ))
            }
            None => continue,
        }
    }
}

/// Blocking `Read` over chunks sent from the reader task
struct ChunkReader {
    rx: mpsc::Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl ChunkReader {
    fn new(rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            chunk: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos >= self.chunk.len() {
            match self.rx.blocking_recv() {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Top-level object: dispatches recognized arrays, skips everything else
struct DocumentSeed<'a> {
    tx: &'a mpsc::Sender<ImportItem>,
    stage: &'a Cell<&'static str>,
}

impl<'de> DeserializeSeed<'de> for DocumentSeed<'_> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for DocumentSeed<'_> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a transfer document object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        while let Some(key) = map.next_key::<String>()? {
            let Some(section) = Section::from_name(&key) else {
                debug!("Skipping unknown import property {:?}", key);
                map.next_value::<IgnoredAny>()?;
                continue;
            };

            self.stage.set(section.name());
            let tx = self.tx;
            match section {
                Section::Customers => map.next_value_seed(ArraySeed { tx, wrap: ImportItem::Customer })?,
                Section::Orders => map.next_value_seed(ArraySeed { tx, wrap: ImportItem::Order })?,
                Section::Files => map.next_value_seed(ArraySeed { tx, wrap: ImportItem::File })?,
                Section::Connections => map.next_value_seed(ArraySeed {
                    tx,
                    wrap: ImportItem::Connection,
                })?,
            }
            send::<A::Error>(tx, ImportItem::SectionEnd(section))?;
            self.stage.set("document");
        }
        Ok(())
    }
}

/// One section's array, forwarded element by element
struct ArraySeed<'a, T> {
    tx: &'a mpsc::Sender<ImportItem>,
    wrap: fn(T) -> ImportItem,
}

impl<'de, T: Deserialize<'de>> DeserializeSeed<'de> for ArraySeed<'_, T> {
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, T: Deserialize<'de>> Visitor<'de> for ArraySeed<'_, T> {
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an array of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(record) = seq.next_element::<T>()? {
            send::<A::Error>(self.tx, (self.wrap)(record))?;
        }
        Ok(())
    }
}

fn send<E: de::Error>(tx: &mpsc::Sender<ImportItem>, item: ImportItem) -> Result<(), E> {
    tx.blocking_send(item)
        .map_err(|_| E::custom("import stopped by the store"))
}

/// Copy `reader` into chunks until EOF or until the parser goes away
async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) -> io::Result<()> {
    loop {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        chunk.truncate(n);
        if tx.send(chunk).await.is_err() {
            return Ok(());
        }
    }
}

impl LocalDatabase {
    /// Replace the store's contents with the document read from `reader`
    ///
    /// A source that does not start with a JSON object is rejected before
    /// anything is changed. Past that point the tables are reset and records
    /// are stored as they are decoded, so a malformed record aborts the
    /// import leaving the records replayed before it.
    pub async fn import_from_reader<R>(&self, reader: R, progress: ProgressFn<'_>) -> StoreResult<ImportSummary>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        expect_object_start(&mut reader).await?;

        self.call(|conn| Ok(reset_record_tables(conn)?)).await?;
        info!("Record tables reset for import");

        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNKS_IN_FLIGHT);
        let (item_tx, mut item_rx) = mpsc::channel(RECORDS_IN_FLIGHT);

        let feeder = tokio::spawn(pump(reader, chunk_tx));
        let parser = tokio::task::spawn_blocking(move || {
            let stage = Cell::new("document");
            let source = io::BufReader::new(ChunkReader::new(chunk_rx));
            let mut deserializer = serde_json::Deserializer::from_reader(source);
            DocumentSeed {
                tx: &item_tx,
                stage: &stage,
            }
            .deserialize(&mut deserializer)
            .and_then(|()| deserializer.end())
            .map_err(|e| StoreError::deserialization(stage.get(), e))
        });

        let mut progress = Progress::new(progress);
        let mut summary = ImportSummary::default();
        let mut failure = None;
        while let Some(item) = item_rx.recv().await {
            let stored = match item {
                ImportItem::Customer(customer) => self.create_customer(&customer).await.map(|_| {
                    summary.customers += 1;
                    Section::Customers
                }),
                ImportItem::Order(order) => self.create_order(&order).await.map(|_| {
                    summary.orders += 1;
                    Section::Orders
                }),
                ImportItem::File(file) => self.create_file(&file).await.map(|_| {
                    summary.files += 1;
                    Section::Files
                }),
                ImportItem::Connection(endpoint) => {
                    self.create_or_update_connection(&endpoint).await.map(|_| {
                        summary.connections += 1;
                        Section::Connections
                    })
                }
                ImportItem::SectionEnd(section) => {
                    debug!("Import section {} closed", section);
                    progress.report(section.end_checkpoint());
                    continue;
                }
            };

            match stored {
                Ok(section) => progress.report(section.start_checkpoint()),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // Unblocks the parser if it is waiting to send
        drop(item_rx);

        let parsed = parser.await.map_err(|e| StoreError::Task(e.to_string()))?;
        let fed = feeder.await.map_err(|e| StoreError::Task(e.to_string()))?;

        if let Some(e) = failure {
            warn!("Import aborted after {} records: {}", summary.total(), e);
            return Err(e);
        }
        fed?;
        if let Err(e) = parsed {
            warn!("Import aborted after {} records: {}", summary.total(), e);
            return Err(e);
        }

        info!("Import complete: {} records", summary.total());
        Ok(summary)
    }

    /// Replace the store's contents with the document at `path`
    pub async fn import_from_path(&self, path: &Path, progress: ProgressFn<'_>) -> StoreResult<ImportSummary> {
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| StoreError::from_read(e, path.to_path_buf()))?;
        self.import_from_reader(file, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChangeBus;
    use chrono::{TimeZone, Utc};
    use std::io::Cursor;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn empty_db() -> LocalDatabase {
        LocalDatabase::open_in_memory(ChangeBus::new()).unwrap()
    }

    async fn seeded_db() -> (LocalDatabase, Customer, Order, FileAttachment, ConnectionEndpoint) {
        let db = empty_db();
        let mut customer = Customer::new("Ada Lovelace");
        customer.national_health_insurance_id = "NHI-1".to_string();
        db.create_customer(&customer).await.unwrap();
        let order = Order::new(Some(customer.id), "A-1")
            .starting_at(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        db.create_order(&order).await.unwrap();
        let mut file = FileAttachment::new(order.id, "scan.pdf", vec![0, 159, 146, 150]);
        file.content_type = "application/pdf".to_string();
        db.create_file(&file).await.unwrap();
        let endpoint = ConnectionEndpoint::new("https://kor.example", "srv", "dev");
        db.create_or_update_connection(&endpoint).await.unwrap();
        (db, customer, order, file, endpoint)
    }

    async fn export(db: &LocalDatabase) -> Vec<u8> {
        let mut out = Vec::new();
        db.export_to_writer(&mut out, CancellationToken::new(), None)
            .await
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_round_trip_into_empty_store() {
        let (source, customer, order, file, endpoint) = seeded_db().await;
        let document = export(&source).await;

        let target = empty_db();
        let summary = target
            .import_from_reader(Cursor::new(document), None)
            .await
            .unwrap();
        assert_eq!(summary.total(), 4);

        let stored = target.get_customer_by_id(customer.id).await.unwrap().unwrap();
        assert_eq!(stored.national_health_insurance_id, "NHI-1");
        assert_eq!(stored.orders.len(), 1);

        let stored_order = target.get_order_by_id(order.id).await.unwrap().unwrap();
        assert_eq!(stored_order.start_date, order.start_date);
        assert_eq!(stored_order.customer_id, Some(customer.id));

        let stored_file = target.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored_file.content, file.content);
        assert_eq!(stored_file.content_type, "application/pdf");

        let endpoints = target.get_all_connections().await.unwrap();
        assert_eq!(endpoints, vec![endpoint]);
    }

    #[tokio::test]
    async fn test_reimport_produces_no_duplicates() {
        let (db, ..) = seeded_db().await;
        let document = export(&db).await;

        db.import_from_reader(Cursor::new(document.clone()), None)
            .await
            .unwrap();
        db.import_from_reader(Cursor::new(document), None).await.unwrap();

        assert_eq!(db.count_customers().await.unwrap(), 1);
        assert_eq!(db.count_orders().await.unwrap(), 1);
        assert_eq!(db.count_files().await.unwrap(), 1);
        assert_eq!(db.count_connections().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_file_without_content_keeps_payload() {
        let (source, _, _, file, _) = seeded_db().await;
        let mut document: serde_json::Value = serde_json::from_slice(&export(&source).await).unwrap();
        let files = document["Files"].as_array_mut().unwrap();
        let mut bare = files[0].clone();
        bare.as_object_mut().unwrap().remove("Content");
        bare["Note"] = "reviewed".into();
        files.push(bare);

        let target = empty_db();
        target
            .import_from_reader(Cursor::new(serde_json::to_vec(&document).unwrap()), None)
            .await
            .unwrap();

        let stored = target.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored.note, "reviewed");
        assert_eq!(stored.content, file.content);
        assert_eq!(target.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_replaces_existing_records() {
        let (source, ..) = seeded_db().await;
        let document = export(&source).await;

        let target = empty_db();
        let stale = Customer::new("Stale");
        target.create_customer(&stale).await.unwrap();

        target.import_from_reader(Cursor::new(document), None).await.unwrap();

        assert!(target.get_customer_by_id(stale.id).await.unwrap().is_none());
        assert_eq!(target.count_customers().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_progress_is_monotonic() {
        let (db, ..) = seeded_db().await;
        let extra = Customer::new("Grace");
        db.create_customer(&extra).await.unwrap();
        let document = export(&db).await;

        let mut seen = Vec::new();
        let mut record = |p: f32| seen.push(p);
        db.import_from_reader(Cursor::new(document), Some(&mut record))
            .await
            .unwrap();

        assert_eq!(seen, vec![10.0, 10.0, 33.0, 40.0, 66.0, 70.0, 85.0, 90.0, 100.0]);
    }

    #[tokio::test]
    async fn test_unknown_properties_are_skipped() {
        let id = Uuid::new_v4();
        let document = format!(
            r#"{{"Version":{{"Major":2,"Tags":["a","b"]}},"Customers":[{{"Id":"{}","Name":"Ada","Address":"","Phone":"","Email":"","Note":"","NationalHealthInsuranceId":"","Loyalty":7}}],"Extra":null}}"#,
            id
        );
        let db = empty_db();

        let summary = db
            .import_from_reader(Cursor::new(document.into_bytes()), None)
            .await
            .unwrap();

        assert_eq!(summary.customers, 1);
        assert_eq!(db.get_customer_by_id(id).await.unwrap().unwrap().name, "Ada");
    }

    #[tokio::test]
    async fn test_bom_and_whitespace_before_object() {
        let mut document = UTF8_BOM.to_vec();
        document.extend_from_slice(b"\n  {\"Customers\":[]}");
        let db = empty_db();

        let summary = db.import_from_reader(Cursor::new(document), None).await.unwrap();
        assert_eq!(summary.total(), 0);
    }

    #[tokio::test]
    async fn test_non_object_document_is_rejected_untouched() {
        let (db, customer, ..) = seeded_db().await;

        let result = db
            .import_from_reader(Cursor::new(b"[1, 2, 3]".to_vec()), None)
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Deserialization { ref stage, .. }) if stage == "document"
        ));
        assert!(db.get_customer_by_id(customer.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected() {
        let db = empty_db();
        let result = db.import_from_reader(Cursor::new(Vec::new()), None).await;
        assert!(matches!(result, Err(StoreError::Deserialization { .. })));
    }

    #[tokio::test]
    async fn test_malformed_record_keeps_earlier_records() {
        let good = Uuid::new_v4();
        let document = format!(
            r#"{{"Customers":[{{"Id":"{}","Name":"Ada","Address":"","Phone":"","Email":"","Note":"","NationalHealthInsuranceId":""}},{{"Id":"not-a-uuid"}}]}}"#,
            good
        );
        let db = empty_db();

        let result = db
            .import_from_reader(Cursor::new(document.into_bytes()), None)
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Deserialization { ref stage, .. }) if stage == "Customers"
        ));
        assert!(db.get_customer_by_id(good).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_truncated_document() {
        let db = empty_db();
        let result = db
            .import_from_reader(Cursor::new(b"{\"Orders\":[".to_vec()), None)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::Deserialization { ref stage, .. }) if stage == "Orders"
        ));
    }

    #[tokio::test]
    async fn test_import_from_missing_path() {
        let db = empty_db();
        let result = db
            .import_from_path(Path::new("/nonexistent/casefile/export.json"), None)
            .await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
    }
}
