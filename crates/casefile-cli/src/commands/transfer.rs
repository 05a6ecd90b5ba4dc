//! Export and import command handlers

use std::path::Path;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use casefile_core::{LocalDatabase, ProgressFn};

use super::confirm;
use crate::output::Output;

/// Export every record to a JSON file
///
/// Ctrl-C stops the export; the partial file is left behind.
pub async fn export(db: &LocalDatabase, path: &Path, output: &Output) -> Result<()> {
    let token = CancellationToken::new();
    let interrupt = cancel_on_ctrl_c(token.clone());

    let mut reporter = output.progress("Exporting");
    let progress: ProgressFn<'_> = reporter.as_mut().map(|r| r as &mut (dyn FnMut(f32) + Send));
    let result = db.export_to_path(path, token, progress).await;
    interrupt.abort();
    output.finish_progress();

    let summary = result.with_context(|| format!("Failed to export to {}", path.display()))?;
    output.success(&format!(
        "Exported {} customer(s), {} order(s), {} file(s), {} connection(s) to {}",
        summary.customers,
        summary.orders,
        summary.files,
        summary.connections,
        path.display()
    ));
    Ok(())
}

/// Replace the store's contents with a JSON export
pub async fn import(db: &LocalDatabase, path: &Path, yes: bool, output: &Output) -> Result<()> {
    if output.should_prompt() && !yes {
        println!("Import replaces all customers, orders, files and connections.");
        if !confirm("Are you sure?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let mut reporter = output.progress("Importing");
    let progress: ProgressFn<'_> = reporter.as_mut().map(|r| r as &mut (dyn FnMut(f32) + Send));
    let result = db.import_from_path(path, progress).await;
    output.finish_progress();

    let summary = result.with_context(|| format!("Failed to import {}", path.display()))?;
    output.success(&format!(
        "Imported {} customer(s), {} order(s), {} file(s), {} connection(s)",
        summary.customers, summary.orders, summary.files, summary.connections
    ));
    Ok(())
}

fn cancel_on_ctrl_c(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received, cancelling transfer");
            token.cancel();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use casefile_core::{ChangeBus, Customer};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_then_import() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("export.json");
        let output = Output::new(OutputFormat::Quiet);

        let source = LocalDatabase::open_in_memory(ChangeBus::new()).unwrap();
        source.create_customer(&Customer::new("Ada")).await.unwrap();
        export(&source, &path, &output).await.unwrap();

        let target = LocalDatabase::open_in_memory(ChangeBus::new()).unwrap();
        import(&target, &path, true, &output).await.unwrap();
        assert_eq!(target.count_customers().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_import_missing_file() {
        let dir = TempDir::new().unwrap();
        let db = LocalDatabase::open_in_memory(ChangeBus::new()).unwrap();
        let result = import(
            &db,
            &dir.path().join("missing.json"),
            true,
            &Output::new(OutputFormat::Quiet),
        )
        .await;
        assert!(result.is_err());
    }
}
