//! fecsync Engine
//!
//! Watermark-driven incremental extraction from a rate-limited, keyset-paginated
//! HTTP API into a PostgreSQL raw layer, with run-control bookkeeping that makes
//! re-execution safe and auditable.
//!
//! # Architecture
//!
//! - [`client`]: HTTP client for the upstream API, absorbing rate limits and
//!   transient failures with bounded exponential backoff
//! - [`paginator`]: keyset cursor state machine yielding record batches
//! - [`source`]: per-source descriptors (endpoint, destination table, merge key,
//!   indexed-date field) — one orchestrator, data-driven variants
//! - [`control`]: run records in the `ingest_runs` control table, and the
//!   watermark as a read-only projection over SUCCEEDED runs
//! - [`loader`]: idempotent-by-key batch upserts into the raw tables
//! - [`orchestrator`]: sequences watermark → begin run → paginate → load →
//!   finalize, guaranteeing exactly one terminal run-record write per run
//!
//! # Example
//!
//! ```no_run
//! use fecsync_engine::config::EngineConfig;
//! use fecsync_engine::control::PgRunControl;
//! use fecsync_engine::loader::PgRawLoader;
//! use fecsync_engine::orchestrator::ExtractionOrchestrator;
//! use fecsync_engine::source;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::from_env()?;
//!     let pool = config.database.connect().await?;
//!     let orchestrator = ExtractionOrchestrator::new(
//!         config,
//!         PgRunControl::new(pool.clone()),
//!         PgRawLoader::new(pool),
//!     )?;
//!     let descriptor = source::descriptor("schedule_a").unwrap();
//!     let summary = orchestrator.run_source(&descriptor).await?;
//!     tracing::info!(rows = summary.rows_loaded, "done");
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod loader;
pub mod orchestrator;
pub mod paginator;
pub mod record;
pub mod source;

pub use client::ApiClient;
pub use config::EngineConfig;
pub use control::{RunControl, RunRecord, RunStatus};
pub use loader::RecordSink;
pub use orchestrator::{ExtractionOrchestrator, RunSummary};
pub use record::ExtractedRecord;
pub use source::SourceDescriptor;
