//! Customer operations

use rusqlite::{params, Connection};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use super::{dedup_by_id, ensure_active, like_any, like_pattern, light_files, paged, LocalDatabase, Page};
use crate::events::{ChangeAction, ChangePayload, EntityKind};
use crate::models::{Customer, Order};
use crate::storage::record::{self, select_all};
use crate::storage::StoreResult;

pub(crate) const SEARCH_COLUMNS: &[&str] = &[
    "name",
    "address",
    "phone",
    "email",
    "note",
    "national_health_insurance_id",
];

/// Load a customer with its orders and their lightweight files
pub(crate) fn load_customer(
    conn: &Connection,
    id: Uuid,
    token: &CancellationToken,
) -> StoreResult<Option<Customer>> {
    ensure_active(token)?;
    match record::find_by_key::<Customer>(conn, id)? {
        Some(mut customer) => {
            hydrate_customer(conn, &mut customer, token)?;
            Ok(Some(customer))
        }
        None => Ok(None),
    }
}

/// Fill `orders`, each with its lightweight files
pub(crate) fn hydrate_customer(
    conn: &Connection,
    customer: &mut Customer,
    token: &CancellationToken,
) -> StoreResult<()> {
    let sql = format!("{} WHERE customer_id = ?1 ORDER BY start_date", select_all::<Order>());
    let mut orders: Vec<Order> = record::query(conn, &sql, params![customer.id.to_string()])?;
    for order in &mut orders {
        ensure_active(token)?;
        order.files = light_files(conn, order.id)?;
    }
    customer.orders = orders;
    Ok(())
}

/// `SELECT` for every customer; insertion order unpaged, name order paged
pub(crate) fn list_sql(page: Option<Page>) -> String {
    let order = if page.is_some() { "name, rowid" } else { "rowid" };
    paged(format!("{} ORDER BY {}", select_all::<Customer>(), order), page)
}

/// `SELECT` for customers matching `?1` in any searchable field
pub(crate) fn search_sql(page: Option<Page>) -> String {
    paged(
        format!(
            "{} WHERE {} ORDER BY name, rowid",
            select_all::<Customer>(),
            like_any(SEARCH_COLUMNS)
        ),
        page,
    )
}

impl LocalDatabase {
    /// Insert the customer, or update it if its ID exists
    pub async fn create_customer(&self, customer: &Customer) -> StoreResult<usize> {
        let row = customer.clone();
        let (rows, inserted) = self.call(move |conn| Ok(record::upsert(conn, &row)?)).await?;

        let action = if inserted { ChangeAction::Created } else { ChangeAction::Updated };
        debug!("Customer {} {:?}", customer.id, action);
        self.emit(EntityKind::Customer, action, || ChangePayload::Customer(customer.clone()));
        Ok(rows)
    }

    /// Get a customer with its orders and their lightweight files
    pub async fn get_customer_by_id(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        let customer = self
            .call(move |conn| load_customer(conn, id, &CancellationToken::new()))
            .await?;

        self.emit(EntityKind::Customer, ChangeAction::Retrieved, || match &customer {
            Some(c) => ChangePayload::Customer(c.clone()),
            None => ChangePayload::NotFound(id),
        });
        Ok(customer)
    }

    /// Every customer, or one page of them sorted by name
    pub async fn get_all_customers(&self, page: Option<Page>) -> StoreResult<Vec<Customer>> {
        let sql = list_sql(page);
        let rows: Vec<Customer> = self.call(move |conn| Ok(record::query(conn, &sql, [])?)).await?;
        let customers = self.hydrate_each(rows, hydrate_customer).await?;

        self.emit(EntityKind::Customer, ChangeAction::BatchRetrieved, || {
            ChangePayload::Customers(customers.clone())
        });
        Ok(customers)
    }

    /// Case-insensitive search across every text field
    ///
    /// Blank text lists everything.
    pub async fn search_customers(&self, text: &str, page: Option<Page>) -> StoreResult<Vec<Customer>> {
        let Some(pattern) = like_pattern(text) else {
            return self.get_all_customers(page).await;
        };

        let sql = search_sql(page);
        let rows: Vec<Customer> = self
            .call(move |conn| Ok(record::query(conn, &sql, params![pattern])?))
            .await?;
        let rows = dedup_by_id(rows, |c| c.id);
        let customers = self.hydrate_each(rows, hydrate_customer).await?;

        self.emit(EntityKind::Customer, ChangeAction::BatchRetrieved, || {
            ChangePayload::Customers(customers.clone())
        });
        Ok(customers)
    }

    pub async fn update_customer(&self, customer: &Customer) -> StoreResult<usize> {
        let row = customer.clone();
        let rows = self.call(move |conn| Ok(record::update(conn, &row)?)).await?;

        if rows > 0 {
            self.emit(EntityKind::Customer, ChangeAction::Updated, || {
                ChangePayload::Customer(customer.clone())
            });
        }
        Ok(rows)
    }

    /// Delete a customer with all of its orders and their files
    ///
    /// Runs in one transaction. Returns the customer rows removed.
    pub async fn delete_customer(&self, id: Uuid) -> StoreResult<usize> {
        let (rows, order_ids, file_ids) = self
            .call(move |conn| {
                let tx = conn.transaction()?;
                let order_ids = record::query_ids(
                    &tx,
                    "SELECT id FROM orders WHERE customer_id = ?1",
                    params![id.to_string()],
                )?;

                let mut file_ids = Vec::new();
                for order_id in &order_ids {
                    file_ids.extend(super::orders::delete_order_files(&tx, *order_id)?);
                    record::delete::<Order>(&tx, *order_id)?;
                }
                let rows = record::delete::<Customer>(&tx, id)?;
                tx.commit()?;
                Ok((rows, order_ids, file_ids))
            })
            .await?;

        debug!(
            "Deleted customer {} ({} orders, {} files)",
            id,
            order_ids.len(),
            file_ids.len()
        );
        for file_id in file_ids {
            self.emit(EntityKind::File, ChangeAction::Deleted, || ChangePayload::Removed {
                id: file_id,
                rows: 1,
            });
        }
        for order_id in order_ids {
            self.emit(EntityKind::Order, ChangeAction::Deleted, || ChangePayload::Removed {
                id: order_id,
                rows: 1,
            });
        }
        if rows > 0 {
            self.emit(EntityKind::Customer, ChangeAction::Deleted, || ChangePayload::Removed { id, rows });
        }
        Ok(rows)
    }

    pub async fn count_customers(&self) -> StoreResult<u64> {
        let count = self.call(|conn| Ok(record::count::<Customer>(conn)?)).await?;
        self.emit(EntityKind::Customer, ChangeAction::CountChanged, || ChangePayload::Count(count));
        Ok(count)
    }
}
