//! Customer command handlers

use anyhow::{anyhow, Context, Result};
use uuid::Uuid;

use casefile_core::LocalDatabase;

use super::{confirm, parse_page, resolve_id};
use crate::output::Output;

/// List customers, one page or all
pub async fn list(db: &LocalDatabase, page: Option<u32>, output: &Output) -> Result<()> {
    let customers = db
        .get_all_customers(parse_page(page)?)
        .await
        .context("Failed to list customers")?;
    output.print_customers(&customers)
}

/// Search customers by name, contact details, note or NHI number
pub async fn search(db: &LocalDatabase, query: String, page: Option<u32>, output: &Output) -> Result<()> {
    let customers = db
        .search_customers(&query, parse_page(page)?)
        .await
        .context("Failed to search customers")?;
    output.print_customers(&customers)
}

/// Show a single customer with orders
pub async fn show(db: &LocalDatabase, id: String, output: &Output) -> Result<()> {
    let uuid = customer_id(db, &id).await?;

    let customer = db
        .get_customer_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow!("Customer not found: {}", id))?;

    output.print_customer(&customer)
}

/// Delete a customer together with its orders and their files
pub async fn delete(db: &LocalDatabase, id: String, output: &Output) -> Result<()> {
    let uuid = customer_id(db, &id).await?;

    let customer = db
        .get_customer_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow!("Customer not found: {}", id))?;

    // Confirm deletion
    if output.should_prompt() {
        println!(
            "Delete customer: {} - {} ({} order(s), {} file(s))",
            &customer.id.to_string()[..8],
            customer.name,
            customer.orders.len(),
            customer.file_count()
        );
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    db.delete_customer(uuid)
        .await
        .context("Failed to delete customer")?;

    output.success(&format!("Deleted customer: {}", uuid));

    Ok(())
}

async fn customer_id(db: &LocalDatabase, id: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return Ok(uuid);
    }
    let customers = db.get_all_customers(None).await?;
    resolve_id(id, "customer", customers.iter().map(|c| c.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use casefile_core::{ChangeBus, Customer};

    #[tokio::test]
    async fn test_show_by_prefix() {
        let db = LocalDatabase::open_in_memory(ChangeBus::new()).unwrap();
        let customer = Customer::new("Ada");
        db.create_customer(&customer).await.unwrap();

        let prefix = customer.id.to_string()[..6].to_string();
        assert_eq!(customer_id(&db, &prefix).await.unwrap(), customer.id);
        show(&db, prefix, &Output::new(OutputFormat::Quiet)).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_prompt() {
        let db = LocalDatabase::open_in_memory(ChangeBus::new()).unwrap();
        let customer = Customer::new("Ada");
        db.create_customer(&customer).await.unwrap();

        delete(&db, customer.id.to_string(), &Output::new(OutputFormat::Quiet))
            .await
            .unwrap();
        assert_eq!(db.count_customers().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_show_missing_customer() {
        let db = LocalDatabase::open_in_memory(ChangeBus::new()).unwrap();
        let result = show(&db, Uuid::new_v4().to_string(), &Output::new(OutputFormat::Quiet)).await;
        assert!(result.is_err());
    }
}
