//! Raw loader
//!
//! Commits record batches into the destination raw table keyed on the
//! record's natural identifier. Re-loading an identical batch (crash between
//! load and run finalization, then retry) lands on the same logical rows, so
//! the loader is safe to point at the same window twice. Warehouse write
//! failures are terminal for the run — they signal schema, permission, or
//! connectivity trouble, not transience, and are not retried here.

use async_trait::async_trait;
use chrono::Utc;
use fecsync_common::{Result, SyncError};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashSet;
use tracing::debug;

use crate::record::ExtractedRecord;
use crate::source::SourceDescriptor;

/// Rows per INSERT statement, comfortably below the bind-parameter limit
const INSERT_CHUNK_SIZE: usize = 500;

/// Destination for extracted record batches, as a seam so the orchestrator
/// can be exercised without a warehouse
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Commit a batch idempotently; returns the number of rows written
    async fn load_batch(
        &self,
        descriptor: &SourceDescriptor,
        records: &[ExtractedRecord],
    ) -> Result<u64>;
}

/// Raw-layer loader over PostgreSQL
#[derive(Clone)]
pub struct PgRawLoader {
    pool: PgPool,
}

impl PgRawLoader {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the destination raw table for a source if absent
    pub async fn ensure_raw_table(&self, descriptor: &SourceDescriptor) -> Result<()> {
        descriptor.validate().map_err(SyncError::load)?;

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                record_id    TEXT PRIMARY KEY,
                indexed_date TIMESTAMPTZ NOT NULL,
                ingest_ts    TIMESTAMPTZ NOT NULL,
                source       TEXT NOT NULL,
                endpoint     TEXT NOT NULL,
                payload      JSONB NOT NULL
            )
            "#,
            descriptor.dest_table
        );

        sqlx::query(&ddl).execute(&self.pool).await.map_err(|e| {
            SyncError::load(format!(
                "failed to create raw table {}: {e}",
                descriptor.dest_table
            ))
        })?;

        Ok(())
    }
}

#[async_trait]
impl RecordSink for PgRawLoader {
    async fn load_batch(
        &self,
        descriptor: &SourceDescriptor,
        records: &[ExtractedRecord],
    ) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }
        descriptor.validate().map_err(SyncError::load)?;

        // A single statement cannot upsert the same key twice; keep the first
        // occurrence within the batch
        let mut seen = HashSet::new();
        let deduped: Vec<&ExtractedRecord> = records
            .iter()
            .filter(|r| seen.insert(r.record_id.as_str()))
            .collect();

        let ingest_ts = Utc::now();
        let mut rows_written = 0u64;

        for chunk in deduped.chunks(INSERT_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} (record_id, indexed_date, ingest_ts, source, endpoint, payload) ",
                descriptor.dest_table
            ));

            query_builder.push_values(chunk.iter(), |mut b, record| {
                b.push_bind(&record.record_id)
                    .push_bind(record.indexed_date)
                    .push_bind(ingest_ts)
                    .push_bind(&descriptor.source)
                    .push_bind(&descriptor.endpoint)
                    .push_bind(&record.payload);
            });

            query_builder.push(
                r#"
                ON CONFLICT (record_id) DO UPDATE SET
                    indexed_date = EXCLUDED.indexed_date,
                    ingest_ts = EXCLUDED.ingest_ts,
                    payload = EXCLUDED.payload
                "#,
            );

            let result = query_builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    SyncError::load(format!(
                        "failed to load batch into {}: {e}",
                        descriptor.dest_table
                    ))
                })?;

            rows_written += result.rows_affected();
        }

        debug!(
            table = %descriptor.dest_table,
            rows = rows_written,
            "batch committed"
        );

        Ok(rows_written)
    }
}
