//! File attachment command handlers

use anyhow::{anyhow, Result};

use casefile_core::LocalDatabase;

use super::parse_full_id;
use crate::output::{Output, OutputFormat};

/// Show a file's metadata
pub async fn show(db: &LocalDatabase, id: String, output: &Output) -> Result<()> {
    let uuid = parse_full_id(&id, "file")?;

    let file = db
        .get_file_by_id(uuid)
        .await?
        .ok_or_else(|| anyhow!("File not found: {}", id))?;

    output.print_file(&file)
}

/// Show the stored size of a file's content
pub async fn size(db: &LocalDatabase, id: String, output: &Output) -> Result<()> {
    let uuid = parse_full_id(&id, "file")?;
    let size = db.get_file_content_size(uuid).await?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({"id": uuid, "size": size}));
        }
        OutputFormat::Quiet | OutputFormat::Human => println!("{}", size),
    }
    Ok(())
}
