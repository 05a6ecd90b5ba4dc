//! Streaming JSON export

use std::path::Path;

use futures_util::StreamExt;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{ExportSummary, Progress, ProgressFn, Section};
use crate::repository::{ensure_active, LocalDatabase};
use crate::storage::{StoreError, StoreResult};
use crate::stream::RecordStream;

/// Running record count across all sections
struct Tally<'a> {
    written: u64,
    total: u64,
    progress: Progress<'a>,
}

impl Tally<'_> {
    fn record_written(&mut self) {
        self.written += 1;
        if self.total > 0 {
            self.progress
                .report(100.0 * self.written as f32 / self.total as f32);
        }
    }
}

/// Write `"Name":[...]` from a stream, one record at a time
async fn write_section<W, T>(
    writer: &mut W,
    section: Section,
    mut records: RecordStream<T>,
    tally: &mut Tally<'_>,
) -> StoreResult<u64>
where
    W: AsyncWrite + Unpin + Send,
    T: Serialize,
{
    if section != Section::Customers {
        writer.write_all(b",").await?;
    }
    writer
        .write_all(format!("\"{}\":[", section.name()).as_bytes())
        .await?;

    let mut count = 0u64;
    while let Some(record) = records.next().await {
        let record = record?;
        if count > 0 {
            writer.write_all(b",").await?;
        }
        writer.write_all(&serde_json::to_vec(&record)?).await?;
        count += 1;
        tally.record_written();
    }

    writer.write_all(b"]").await?;
    Ok(count)
}

impl LocalDatabase {
    /// Export every record as one JSON document into `writer`
    ///
    /// Records are written as stored; nothing is hydrated, since attached
    /// children are not part of the document.
    ///
    /// Progress is the share of all records written so far. Cancelling the
    /// token stops the export with [`StoreError::Cancelled`]; whatever was
    /// already written stays in `writer`.
    pub async fn export_to_writer<W>(
        &self,
        writer: &mut W,
        token: CancellationToken,
        progress: ProgressFn<'_>,
    ) -> StoreResult<ExportSummary>
    where
        W: AsyncWrite + Unpin + Send,
    {
        ensure_active(&token)?;
        let total = self.count_customers().await?
            + self.count_orders().await?
            + self.count_files().await?
            + self.count_connections().await?;
        info!("Exporting {} records", total);

        let mut tally = Tally {
            written: 0,
            total,
            progress: Progress::new(progress),
        };

        writer.write_all(b"{").await?;
        let customers = write_section(
            writer,
            Section::Customers,
            self.stream_customer_rows(token.clone()),
            &mut tally,
        )
        .await?;
        let orders = write_section(writer, Section::Orders, self.stream_order_rows(token.clone()), &mut tally).await?;
        let files = write_section(writer, Section::Files, self.stream_files(token.clone()), &mut tally).await?;
        let connections = write_section(
            writer,
            Section::Connections,
            self.stream_connections(token),
            &mut tally,
        )
        .await?;
        writer.write_all(b"}").await?;
        writer.flush().await?;

        let summary = ExportSummary {
            customers,
            orders,
            files,
            connections,
        };
        info!("Export complete: {} records", summary.total());
        Ok(summary)
    }

    /// Export into a file at `path`, replacing it
    pub async fn export_to_path(
        &self,
        path: &Path,
        token: CancellationToken,
        progress: ProgressFn<'_>,
    ) -> StoreResult<ExportSummary> {
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;
        let mut writer = BufWriter::new(file);

        let summary = self.export_to_writer(&mut writer, token, progress).await?;
        writer
            .get_mut()
            .sync_all()
            .await
            .map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;
        Ok(summary)
    }
}
