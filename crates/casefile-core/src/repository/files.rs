//! File attachment operations
//!
//! Listing paths that hydrate an order or customer tree use the lightweight
//! projection and never load `content`. Direct lookups and the full listings
//! used by export do.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::{format_size, LocalDatabase};
use crate::events::{ChangeAction, ChangePayload, EntityKind};
use crate::models::FileAttachment;
use crate::storage::record::{self, file_from_light_row, select_all, FILE_LIGHT_COLUMNS};
use crate::storage::StoreResult;

/// Files of one order without their content
pub(crate) fn light_files(conn: &Connection, order_id: Uuid) -> rusqlite::Result<Vec<FileAttachment>> {
    let sql = format!(
        "SELECT {} FROM files WHERE order_id = ?1 ORDER BY rowid",
        FILE_LIGHT_COLUMNS
    );
    record::query_map(conn, &sql, params![order_id.to_string()], file_from_light_row)
}

/// One file without its content
pub(crate) fn light_file_by_id(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<FileAttachment>> {
    let sql = format!("SELECT {} FROM files WHERE id = ?1", FILE_LIGHT_COLUMNS);
    conn.prepare_cached(&sql)?
        .query_row(params![id.to_string()], file_from_light_row)
        .optional()
}

/// Update metadata only, keeping the stored content and order
fn update_metadata(conn: &Connection, file: &FileAttachment) -> rusqlite::Result<usize> {
    conn.prepare_cached(
        "UPDATE files SET name = ?2, content_type = ?3, note = ?4, hash_code = ?5 WHERE id = ?1",
    )?
    .execute(params![
        file.id.to_string(),
        file.name,
        file.content_type,
        file.note,
        file.hash_code
    ])
}

/// Full update, or metadata only when `file` carries no content
fn update_preserving_content(conn: &Connection, file: &FileAttachment) -> rusqlite::Result<usize> {
    if file.has_content() {
        record::update(conn, file)
    } else {
        update_metadata(conn, file)
    }
}

impl LocalDatabase {
    /// Insert the file, or update it if its ID exists
    ///
    /// The update follows [`update_file`](Self::update_file): without content
    /// the stored payload and order are kept.
    pub async fn create_file(&self, file: &FileAttachment) -> StoreResult<usize> {
        let row = file.clone();
        let (rows, inserted) = self
            .call(move |conn| {
                if record::exists::<FileAttachment>(conn, row.id)? {
                    Ok((update_preserving_content(conn, &row)?, false))
                } else {
                    Ok((record::insert(conn, &row)?, true))
                }
            })
            .await?;

        let action = if inserted { ChangeAction::Created } else { ChangeAction::Updated };
        debug!("File {} {:?}", file.id, action);
        self.emit(EntityKind::File, action, || ChangePayload::File(file.clone()));
        Ok(rows)
    }

    /// Get a file with its content
    pub async fn get_file_by_id(&self, id: Uuid) -> StoreResult<Option<FileAttachment>> {
        let file = self
            .call(move |conn| Ok(record::find_by_key::<FileAttachment>(conn, id)?))
            .await?;

        self.emit(EntityKind::File, ChangeAction::Retrieved, || match &file {
            Some(f) => ChangePayload::File(f.clone()),
            None => ChangePayload::NotFound(id),
        });
        Ok(file)
    }

    /// Every file with content
    pub async fn get_all_files(&self) -> StoreResult<Vec<FileAttachment>> {
        let sql = format!("{} ORDER BY rowid", select_all::<FileAttachment>());
        let files: Vec<FileAttachment> = self.call(move |conn| Ok(record::query(conn, &sql, [])?)).await?;

        self.emit(EntityKind::File, ChangeAction::BatchRetrieved, || {
            ChangePayload::Files(files.clone())
        });
        Ok(files)
    }

    /// Every file of one order with content
    pub async fn get_all_files_by_order_id(&self, order_id: Uuid) -> StoreResult<Vec<FileAttachment>> {
        let sql = format!("{} WHERE order_id = ?1 ORDER BY rowid", select_all::<FileAttachment>());
        let files: Vec<FileAttachment> = self
            .call(move |conn| Ok(record::query(conn, &sql, params![order_id.to_string()])?))
            .await?;

        self.emit(EntityKind::File, ChangeAction::BatchRetrieved, || {
            ChangePayload::Files(files.clone())
        });
        Ok(files)
    }

    /// Every file of one order, content omitted
    ///
    /// Results are flagged `is_database_content`; fetch by ID for the payload.
    pub async fn get_files_by_order_id_without_content(
        &self,
        order_id: Uuid,
    ) -> StoreResult<Vec<FileAttachment>> {
        let files = self.call(move |conn| Ok(light_files(conn, order_id)?)).await?;

        self.emit(EntityKind::File, ChangeAction::BatchRetrieved, || {
            ChangePayload::Files(files.clone())
        });
        Ok(files)
    }

    /// Update a file
    ///
    /// A file without content only updates its metadata; the stored content
    /// and order are kept.
    pub async fn update_file(&self, file: &FileAttachment) -> StoreResult<usize> {
        let row = file.clone();
        let rows = self
            .call(move |conn| Ok(update_preserving_content(conn, &row)?))
            .await?;

        if rows > 0 {
            self.emit(EntityKind::File, ChangeAction::Updated, || ChangePayload::File(file.clone()));
        }
        Ok(rows)
    }

    pub async fn delete_file(&self, id: Uuid) -> StoreResult<usize> {
        let rows = self
            .call(move |conn| Ok(record::delete::<FileAttachment>(conn, id)?))
            .await?;

        if rows > 0 {
            self.emit(EntityKind::File, ChangeAction::Deleted, || ChangePayload::Removed { id, rows });
        }
        Ok(rows)
    }

    pub async fn count_files(&self) -> StoreResult<u64> {
        let count = self.call(|conn| Ok(record::count::<FileAttachment>(conn)?)).await?;
        self.emit(EntityKind::File, ChangeAction::CountChanged, || ChangePayload::Count(count));
        Ok(count)
    }

    /// Stored content length of one file, human-readable ("12.4 MB")
    ///
    /// A missing file or missing content reports "0 B".
    pub async fn get_file_content_size(&self, id: Uuid) -> StoreResult<String> {
        let bytes: i64 = self
            .call(move |conn| {
                Ok(record::scalar(
                    conn,
                    "SELECT COALESCE(SUM(length(content)), 0) FROM files WHERE id = ?1",
                    params![id.to_string()],
                )?)
            })
            .await?;

        let size = format_size(bytes.max(0) as u64);
        self.emit(EntityKind::File, ChangeAction::SizeQueried, || ChangePayload::Size(size.clone()));
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::EventLog;
    use crate::events::ChangeBus;
    use crate::models::Order;

    async fn db_with_order() -> (LocalDatabase, EventLog, Order) {
        let bus = ChangeBus::new();
        let log = EventLog::attach(&bus);
        let db = LocalDatabase::open_in_memory(bus).unwrap();
        let order = Order::new(None, "A-1");
        db.create_order(&order).await.unwrap();
        (db, log, order)
    }

    #[tokio::test]
    async fn test_create_is_upsert() {
        let (db, log, order) = db_with_order().await;
        let mut file = FileAttachment::new(order.id, "scan.pdf", vec![1, 2, 3]);

        db.create_file(&file).await.unwrap();
        file.content = Some(vec![4, 5]);
        db.create_file(&file).await.unwrap();

        assert_eq!(db.count_files().await.unwrap(), 1);
        let stored = db.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored.content, Some(vec![4, 5]));
        assert!(stored.is_database_content);
        assert_eq!(log.count(EntityKind::File, ChangeAction::Updated), 1);
    }

    #[tokio::test]
    async fn test_recreate_without_content_keeps_payload() {
        let (db, log, order) = db_with_order().await;
        let file = FileAttachment::new(order.id, "scan.pdf", vec![1, 2, 3]);
        db.create_file(&file).await.unwrap();

        let mut edit = file.clone();
        edit.content = None;
        edit.note = "checked".to_string();
        assert_eq!(db.create_file(&edit).await.unwrap(), 1);

        edit.content = Some(Vec::new());
        edit.order_id = Uuid::new_v4();
        db.create_file(&edit).await.unwrap();

        let stored = db.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored.note, "checked");
        assert_eq!(stored.content, Some(vec![1, 2, 3]));
        assert_eq!(stored.order_id, order.id);
        assert_eq!(db.count_files().await.unwrap(), 1);
        assert_eq!(log.count(EntityKind::File, ChangeAction::Updated), 2);
    }

    #[tokio::test]
    async fn test_lightweight_listing_omits_content() {
        let (db, _log, order) = db_with_order().await;
        let file = FileAttachment::new(order.id, "scan.pdf", vec![7; 128]);
        db.create_file(&file).await.unwrap();

        let light = db.get_files_by_order_id_without_content(order.id).await.unwrap();
        assert_eq!(light.len(), 1);
        assert!(light[0].content.is_none());
        assert!(light[0].is_database_content);

        let full = db.get_all_files_by_order_id(order.id).await.unwrap();
        assert_eq!(full[0].content, Some(vec![7; 128]));
        assert_eq!(db.get_all_files().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_without_content_preserves_payload() {
        let (db, _log, order) = db_with_order().await;
        let file = FileAttachment::new(order.id, "scan.pdf", vec![1, 2, 3]);
        db.create_file(&file).await.unwrap();

        let mut edit = FileAttachment::with_id(file.id, Uuid::new_v4(), "renamed.pdf", Vec::new());
        edit.note = "checked".to_string();
        assert_eq!(db.update_file(&edit).await.unwrap(), 1);

        let stored = db.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored.note, "checked");
        assert_eq!(stored.name, "renamed.pdf");
        assert_eq!(stored.content, Some(vec![1, 2, 3]));
        assert_eq!(stored.order_id, order.id);

        edit.content = None;
        db.update_file(&edit).await.unwrap();
        let stored = db.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored.content, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_update_with_content_replaces_payload() {
        let (db, _log, order) = db_with_order().await;
        let mut file = FileAttachment::new(order.id, "scan.pdf", vec![1]);
        db.create_file(&file).await.unwrap();

        file.content = Some(vec![9, 9]);
        db.update_file(&file).await.unwrap();

        let stored = db.get_file_by_id(file.id).await.unwrap().unwrap();
        assert_eq!(stored.content, Some(vec![9, 9]));
    }

    #[tokio::test]
    async fn test_content_size() {
        let (db, log, order) = db_with_order().await;
        let file = FileAttachment::new(order.id, "big.bin", vec![0; 1536]);
        db.create_file(&file).await.unwrap();

        assert_eq!(db.get_file_content_size(file.id).await.unwrap(), "1.5 KB");
        assert_eq!(db.get_file_content_size(Uuid::new_v4()).await.unwrap(), "0 B");
        assert_eq!(log.count(EntityKind::File, ChangeAction::SizeQueried), 2);
    }

    #[tokio::test]
    async fn test_delete_file() {
        let (db, log, order) = db_with_order().await;
        let file = FileAttachment::new(order.id, "scan.pdf", vec![1]);
        db.create_file(&file).await.unwrap();

        assert_eq!(db.delete_file(file.id).await.unwrap(), 1);
        assert_eq!(db.delete_file(file.id).await.unwrap(), 0);
        assert!(db.get_file_by_id(file.id).await.unwrap().is_none());
        assert_eq!(log.count(EntityKind::File, ChangeAction::Deleted), 1);
    }
}
