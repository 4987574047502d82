//! Portal-backed record source.
//!
//! The query runs inside a transaction on the leased connection. Binding it
//! creates a server-side portal, and each [`next_batch`](RecordSource::next_batch)
//! fetches at most `batch_size` rows from it, so client memory stays bounded by
//! one batch regardless of result size.

use async_trait::async_trait;
use deadpool_postgres::{Object, Transaction};
use tokio_postgres::types::ToSql;
use tokio_postgres::Portal;
use tracing::debug;

use crate::core::{QuerySpec, Record, RecordSource};
use crate::error::{ExportError, Result};

use super::convert::{bind_params, row_to_record};

/// Streams a query's rows in batches over one leased connection.
pub struct PgRecordSource<'h> {
    transaction: Option<Transaction<'h>>,
    portal: Portal,
    batch_size: i32,
    exhausted: bool,
    rows_fetched: u64,
}

impl<'h> PgRecordSource<'h> {
    /// Start a transaction on `client`, prepare and bind `query`.
    pub async fn open(client: &'h mut Object, query: &QuerySpec) -> Result<PgRecordSource<'h>> {
        let batch_size = i32::try_from(query.batch_size.max(1)).map_err(|_| {
            ExportError::Config(format!("batch_size {} is too large", query.batch_size))
        })?;

        let transaction = client.transaction().await?;
        let statement = transaction.prepare(&query.sql).await?;

        let bound = bind_params(&query.params, statement.params())?;
        let params: Vec<&(dyn ToSql + Sync)> = bound
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let portal = transaction.bind(&statement, &params).await?;

        debug!(
            "Opened portal for query ({} params, batch size {})",
            bound.len(),
            batch_size
        );

        Ok(Self {
            transaction: Some(transaction),
            portal,
            batch_size,
            exhausted: false,
            rows_fetched: 0,
        })
    }
}

#[async_trait]
impl RecordSource for PgRecordSource<'_> {
    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>> {
        if self.exhausted {
            return Ok(None);
        }
        let transaction = self
            .transaction
            .as_ref()
            .ok_or_else(|| ExportError::source_failed("cursor is already closed"))?;

        let rows = transaction
            .query_portal(&self.portal, self.batch_size)
            .await?;

        // A short batch means the portal is drained; skip the empty round trip.
        if rows.len() < self.batch_size as usize {
            self.exhausted = true;
        }
        if rows.is_empty() {
            return Ok(None);
        }

        self.rows_fetched += rows.len() as u64;
        let records = rows
            .iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(records))
    }

    async fn finish(&mut self) -> Result<()> {
        if let Some(transaction) = self.transaction.take() {
            transaction.commit().await?;
            debug!("Cursor finished after {} rows", self.rows_fetched);
        }
        Ok(())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.exhausted = true;
        if let Some(transaction) = self.transaction.take() {
            transaction.rollback().await?;
            debug!("Cursor cancelled after {} rows", self.rows_fetched);
        }
        Ok(())
    }
}
