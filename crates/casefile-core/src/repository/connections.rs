//! Connection endpoint operations
//!
//! Endpoints are identified by (`url`, `server_key`) rather than by ID: the
//! upsert matches on that pair and keeps the stored row's ID.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use super::{like_any, like_pattern, LocalDatabase};
use crate::events::{ChangeAction, ChangePayload, EntityKind};
use crate::models::ConnectionEndpoint;
use crate::storage::record::{self, select_all, Record};
use crate::storage::StoreResult;

pub(crate) const SEARCH_COLUMNS: &[&str] = &["device_key", "server_key", "url"];

fn find_by_endpoint(
    conn: &Connection,
    url: &str,
    server_key: &str,
) -> rusqlite::Result<Option<ConnectionEndpoint>> {
    let sql = format!("{} WHERE url = ?1 AND server_key = ?2 LIMIT 1", select_all::<ConnectionEndpoint>());
    conn.prepare_cached(&sql)?
        .query_row(params![url, server_key], ConnectionEndpoint::from_row)
        .optional()
}

/// `SELECT` for every endpoint in insertion order
pub(crate) fn list_sql() -> String {
    format!("{} ORDER BY rowid", select_all::<ConnectionEndpoint>())
}

/// `SELECT` for endpoints matching `?1`
pub(crate) fn search_sql() -> String {
    format!(
        "{} WHERE {} ORDER BY rowid",
        select_all::<ConnectionEndpoint>(),
        like_any(SEARCH_COLUMNS)
    )
}

impl LocalDatabase {
    /// Store an endpoint, replacing the one with the same URL and server key
    ///
    /// The replaced row keeps its ID. Returns rows affected.
    pub async fn create_or_update_connection(&self, endpoint: &ConnectionEndpoint) -> StoreResult<usize> {
        let incoming = endpoint.clone();
        let (rows, stored, inserted) = self
            .call(move |conn| {
                match find_by_endpoint(conn, &incoming.url, &incoming.server_key)? {
                    Some(existing) => {
                        let merged = ConnectionEndpoint {
                            id: existing.id,
                            ..incoming
                        };
                        let rows = record::update(conn, &merged)?;
                        Ok((rows, merged, false))
                    }
                    None => {
                        let (rows, inserted) = record::upsert(conn, &incoming)?;
                        Ok((rows, incoming, inserted))
                    }
                }
            })
            .await?;

        let action = if inserted { ChangeAction::Created } else { ChangeAction::Updated };
        debug!("Connection {} {:?}", stored.url, action);
        self.emit(EntityKind::Connection, action, || ChangePayload::Connection(stored));
        Ok(rows)
    }

    pub async fn get_connection_by_id(&self, id: Uuid) -> StoreResult<Option<ConnectionEndpoint>> {
        let endpoint = self
            .call(move |conn| Ok(record::find_by_key::<ConnectionEndpoint>(conn, id)?))
            .await?;

        self.emit(EntityKind::Connection, ChangeAction::Retrieved, || match &endpoint {
            Some(e) => ChangePayload::Connection(e.clone()),
            None => ChangePayload::NotFound(id),
        });
        Ok(endpoint)
    }

    pub async fn get_all_connections(&self) -> StoreResult<Vec<ConnectionEndpoint>> {
        let sql = list_sql();
        let endpoints: Vec<ConnectionEndpoint> =
            self.call(move |conn| Ok(record::query(conn, &sql, [])?)).await?;

        self.emit(EntityKind::Connection, ChangeAction::BatchRetrieved, || {
            ChangePayload::Connections(endpoints.clone())
        });
        Ok(endpoints)
    }

    /// Case-insensitive search across URL and keys
    ///
    /// Blank text lists everything.
    pub async fn search_connections(&self, text: &str) -> StoreResult<Vec<ConnectionEndpoint>> {
        let Some(pattern) = like_pattern(text) else {
            return self.get_all_connections().await;
        };

        let sql = search_sql();
        let endpoints: Vec<ConnectionEndpoint> = self
            .call(move |conn| Ok(record::query(conn, &sql, params![pattern])?))
            .await?;

        self.emit(EntityKind::Connection, ChangeAction::BatchRetrieved, || {
            ChangePayload::Connections(endpoints.clone())
        });
        Ok(endpoints)
    }

    pub async fn delete_connection(&self, id: Uuid) -> StoreResult<usize> {
        let rows = self
            .call(move |conn| Ok(record::delete::<ConnectionEndpoint>(conn, id)?))
            .await?;

        if rows > 0 {
            self.emit(EntityKind::Connection, ChangeAction::Deleted, || ChangePayload::Removed { id, rows });
        }
        Ok(rows)
    }

    pub async fn count_connections(&self) -> StoreResult<u64> {
        let count = self.call(|conn| Ok(record::count::<ConnectionEndpoint>(conn)?)).await?;
        self.emit(EntityKind::Connection, ChangeAction::CountChanged, || ChangePayload::Count(count));
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::testing::EventLog;
    use crate::events::ChangeBus;

    fn test_db() -> (LocalDatabase, EventLog) {
        let bus = ChangeBus::new();
        let log = EventLog::attach(&bus);
        (LocalDatabase::open_in_memory(bus).unwrap(), log)
    }

    #[tokio::test]
    async fn test_upsert_by_url_and_server_key() {
        let (db, log) = test_db();
        let first = ConnectionEndpoint::new("https://kor.example", "srv-1", "dev-1");
        db.create_or_update_connection(&first).await.unwrap();

        // Same pair, new ID and device key
        let second = ConnectionEndpoint::new("https://kor.example", "srv-1", "dev-2");
        assert_eq!(db.create_or_update_connection(&second).await.unwrap(), 1);

        let all = db.get_all_connections().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.id);
        assert_eq!(all[0].device_key, "dev-2");
        assert!(db.get_connection_by_id(second.id).await.unwrap().is_none());

        assert_eq!(log.count(EntityKind::Connection, ChangeAction::Created), 1);
        assert_eq!(log.count(EntityKind::Connection, ChangeAction::Updated), 1);
    }

    #[tokio::test]
    async fn test_different_server_key_is_new_endpoint() {
        let (db, _log) = test_db();
        db.create_or_update_connection(&ConnectionEndpoint::new("https://a", "srv-1", "d"))
            .await
            .unwrap();
        db.create_or_update_connection(&ConnectionEndpoint::new("https://a", "srv-2", "d"))
            .await
            .unwrap();

        assert_eq!(db.count_connections().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reimport_by_id_does_not_duplicate() {
        let (db, _log) = test_db();
        let mut endpoint = ConnectionEndpoint::new("https://a", "srv-1", "d");
        db.create_or_update_connection(&endpoint).await.unwrap();

        // Same ID moved to a new pair updates in place
        endpoint.url = "https://b".to_string();
        db.create_or_update_connection(&endpoint).await.unwrap();

        let all = db.get_all_connections().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].url, "https://b");
    }

    #[tokio::test]
    async fn test_delete_connection() {
        let (db, _log) = test_db();
        let endpoint = ConnectionEndpoint::new("https://a", "srv", "dev");
        db.create_or_update_connection(&endpoint).await.unwrap();

        assert_eq!(db.delete_connection(endpoint.id).await.unwrap(), 1);
        assert_eq!(db.delete_connection(endpoint.id).await.unwrap(), 0);
        assert_eq!(db.count_connections().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_connections() {
        let (db, _log) = test_db();
        db.create_or_update_connection(&ConnectionEndpoint::new("https://Alpha.example", "s1", "d1"))
            .await
            .unwrap();
        db.create_or_update_connection(&ConnectionEndpoint::new("https://beta.example", "s2", "d2"))
            .await
            .unwrap();

        assert_eq!(db.search_connections("alpha").await.unwrap().len(), 1);
        assert_eq!(db.search_connections("example").await.unwrap().len(), 2);
        assert_eq!(db.search_connections(" ").await.unwrap().len(), 2);
    }
}
