//! Status command handler

use anyhow::Result;

use casefile_core::{format_size, Config, LocalDatabase};

use crate::output::{Output, OutputFormat};

/// Show status information
pub async fn show(db: &LocalDatabase, config: &Config, output: &Output) -> Result<()> {
    let customers = db.count_customers().await?;
    let orders = db.count_orders().await?;
    let files = db.count_files().await?;
    let connections = db.count_connections().await?;
    let database_path = config.database_path();
    let database_size = db.database().file_size().unwrap_or(0);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "database": database_path,
                    "database_size": database_size,
                    "counts": {
                        "customers": customers,
                        "orders": orders,
                        "files": files,
                        "connections": connections
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", database_path.display());
        }
        OutputFormat::Human => {
            println!("Casefile Status");
            println!("===============");
            println!();
            println!("Storage:");
            println!("  Database: {}", database_path.display());
            println!("  Size:     {}", format_size(database_size));
            println!();
            println!("Contents:");
            println!("  Customers:   {}", customers);
            println!("  Orders:      {}", orders);
            println!("  Files:       {}", files);
            println!("  Connections: {}", connections);
        }
    }

    Ok(())
}
