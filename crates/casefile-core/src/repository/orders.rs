//! Order operations

use rusqlite::{params, Connection};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{
    dedup_by_id, ensure_active, light_files, like_any, like_pattern, load_customer, paged,
    LocalDatabase, Page,
};
use crate::events::{ChangeAction, ChangePayload, EntityKind};
use crate::models::{FileAttachment, Order};
use crate::storage::record::{self, select_all, select_all_as};
use crate::storage::StoreResult;

/// Order fields plus the owning customer's fields
pub(crate) const SEARCH_COLUMNS: &[&str] = &[
    "o.order_number",
    "o.note",
    "c.name",
    "c.address",
    "c.phone",
    "c.email",
    "c.note",
    "c.national_health_insurance_id",
];

/// Fill `files` (lightweight) and `customer`
pub(crate) fn hydrate_order(
    conn: &Connection,
    order: &mut Order,
    token: &CancellationToken,
) -> StoreResult<()> {
    ensure_active(token)?;
    order.files = light_files(conn, order.id)?;
    if let Some(customer_id) = order.customer_id {
        order.customer = load_customer(conn, customer_id, token)?.map(Box::new);
    }
    Ok(())
}

/// Load an order with its lightweight files and its customer
pub(crate) fn load_order(
    conn: &Connection,
    id: Uuid,
    token: &CancellationToken,
) -> StoreResult<Option<Order>> {
    ensure_active(token)?;
    match record::find_by_key::<Order>(conn, id)? {
        Some(mut order) => {
            hydrate_order(conn, &mut order, token)?;
            Ok(Some(order))
        }
        None => Ok(None),
    }
}

/// Delete every file of an order, returning their IDs
pub(crate) fn delete_order_files(conn: &Connection, order_id: Uuid) -> rusqlite::Result<Vec<Uuid>> {
    let file_ids = record::query_ids(
        conn,
        "SELECT id FROM files WHERE order_id = ?1",
        params![order_id.to_string()],
    )?;
    for file_id in &file_ids {
        record::delete::<FileAttachment>(conn, *file_id)?;
    }
    Ok(file_ids)
}

/// `SELECT` for every order by start date
pub(crate) fn list_sql(page: Option<Page>) -> String {
    paged(format!("{} ORDER BY start_date, rowid", select_all::<Order>()), page)
}

/// `SELECT` for orders whose own or customer's fields match `?1`
pub(crate) fn search_sql(page: Option<Page>) -> String {
    paged(
        format!(
            "{} LEFT JOIN customers c ON c.id = o.customer_id WHERE {} ORDER BY o.start_date, o.rowid",
            select_all_as::<Order>("o"),
            like_any(SEARCH_COLUMNS)
        ),
        page,
    )
}

impl LocalDatabase {
    /// Insert the order, or update it if its ID exists
    pub async fn create_order(&self, order: &Order) -> StoreResult<usize> {
        let row = order.clone();
        let (rows, inserted) = self.call(move |conn| Ok(record::upsert(conn, &row)?)).await?;

        let action = if inserted { ChangeAction::Created } else { ChangeAction::Updated };
        debug!("Order {} {:?}", order.id, action);
        self.emit(EntityKind::Order, action, || ChangePayload::Order(order.clone()));
        Ok(rows)
    }

    /// Get an order with its lightweight files and its customer
    pub async fn get_order_by_id(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let order = self
            .call(move |conn| load_order(conn, id, &CancellationToken::new()))
            .await?;

        self.emit(EntityKind::Order, ChangeAction::Retrieved, || match &order {
            Some(o) => ChangePayload::Order(o.clone()),
            None => ChangePayload::NotFound(id),
        });
        Ok(order)
    }

    /// Every order, or one page of them, by start date
    pub async fn get_all_orders(&self, page: Option<Page>) -> StoreResult<Vec<Order>> {
        let sql = list_sql(page);
        let rows: Vec<Order> = self.call(move |conn| Ok(record::query(conn, &sql, [])?)).await?;
        let orders = self.hydrate_each(rows, hydrate_order).await?;

        self.emit(EntityKind::Order, ChangeAction::BatchRetrieved, || {
            ChangePayload::Orders(orders.clone())
        });
        Ok(orders)
    }

    /// Case-insensitive search across order and customer fields
    ///
    /// Blank text lists everything.
    pub async fn search_orders(&self, text: &str, page: Option<Page>) -> StoreResult<Vec<Order>> {
        let Some(pattern) = like_pattern(text) else {
            return self.get_all_orders(page).await;
        };

        let sql = search_sql(page);
        let rows: Vec<Order> = self
            .call(move |conn| Ok(record::query(conn, &sql, params![pattern])?))
            .await?;
        let rows = dedup_by_id(rows, |o| o.id);
        let orders = self.hydrate_each(rows, hydrate_order).await?;

        self.emit(EntityKind::Order, ChangeAction::BatchRetrieved, || {
            ChangePayload::Orders(orders.clone())
        });
        Ok(orders)
    }

    pub async fn update_order(&self, order: &Order) -> StoreResult<usize> {
        let row = order.clone();
        let rows = self.call(move |conn| Ok(record::update(conn, &row)?)).await?;

        if rows > 0 {
            self.emit(EntityKind::Order, ChangeAction::Updated, || ChangePayload::Order(order.clone()));
        }
        Ok(rows)
    }

    /// Delete an order and its files in one transaction
    ///
    /// Returns the order rows removed.
    pub async fn delete_order(&self, id: Uuid) -> StoreResult<usize> {
        let (rows, file_ids) = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                let file_ids = delete_order_files(&tx, id)?;
                let rows = record::delete::<Order>(&tx, id)?;
                tx.commit()?;
                Ok((rows, file_ids))
            })
            .await?;

        debug!("Deleted order {} ({} files)", id, file_ids.len());
        for file_id in file_ids {
            self.emit(EntityKind::File, ChangeAction::Deleted, || ChangePayload::Removed {
                id: file_id,
                rows: 1,
            });
        }
        if rows > 0 {
            self.emit(EntityKind::Order, ChangeAction::Deleted, || ChangePayload::Removed { id, rows });
        }
        Ok(rows)
    }

    pub async fn count_orders(&self) -> StoreResult<u64> {
        let count = self.call(|conn| Ok(record::count::<Order>(conn)?)).await?;
        self.emit(EntityKind::Order, ChangeAction::CountChanged, || ChangePayload::Count(count));
        Ok(count)
    }
}
