//! Order command handlers

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use casefile_core::LocalDatabase;

use super::{confirm, parse_page, resolve_id};
use crate::output::Output;

/// List orders by start date, one page or all
pub async fn list(db: &LocalDatabase, page: Option<u32>, output: &Output) -> Result<()> {
    let orders = db
        .get_all_orders(parse_page(page)?)
        .await
        .context("Failed to list orders")?;
    output.print_orders(&orders)
}

/// Search orders by number, note or customer details
pub async fn search(db: &LocalDatabase, query: String, page: Option<u32>, output: &Output) -> Result<()> {
    let orders = db
        .search_orders(&query, parse_page(page)?)
        .await
        .context("Failed to search orders")?;
    output.print_orders(&orders)
}

/// Show a single order with files and customer
pub async fn show(db: &LocalDatabase, id: String, output: &Output) -> Result<()> {
    let uuid = order_id(db, &id).await?;

    let order = db
        .get_order_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow!("Order not found: {}", id))?;

    output.print_order(&order)
}

/// Delete an order together with its files
pub async fn delete(db: &LocalDatabase, id: String, output: &Output) -> Result<()> {
    let uuid = order_id(db, &id).await?;

    let order = db
        .get_order_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow!("Order not found: {}", id))?;

    // Confirm deletion
    if output.should_prompt() {
        println!(
            "Delete order: {} - {} ({} file(s))",
            &order.id.to_string()[..8],
            order.order_number,
            order.files.len()
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    db.delete_order(uuid).await.context("Failed to delete order")?;

    output.success(&format!("Deleted order: {}", uuid));

    Ok(())
}

async fn order_id(db: &LocalDatabase, id: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }
    let orders = db.get_all_orders(None).await?;
    resolve_id(id, "order", orders.iter().map(|o| o.id))
}
