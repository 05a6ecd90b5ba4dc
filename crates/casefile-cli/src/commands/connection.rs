//! Connection endpoint command handlers

use anyhow::{Context, Result};

use casefile_core::LocalDatabase;

use crate::output::Output;

/// List connection endpoints, optionally filtered
pub async fn list(db: &LocalDatabase, query: Option<String>, output: &Output) -> Result<()> {
    let endpoints = match query {
        Some(ref q) => db.search_connections(q).await,
        None => db.get_all_connections().await,
    }
    .context("Failed to list connections")?;

    output.print_connections(&endpoints)
}
