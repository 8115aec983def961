//! Extraction orchestrator
//!
//! Sequences one (source, endpoint) pipeline: resolve watermark → begin run →
//! stream pages → load batches → finalize the run record. The begin/finish
//! pairing holds on every exit path; only a failure of the finalize write
//! itself can leave a run STARTED, and such a run is invisible to watermark
//! resolution, so the next invocation retries from the last good point.

use chrono::{DateTime, Duration, Utc};
use fecsync_common::{Result, SyncError};
use tracing::{debug, error, info};

use crate::client::ApiClient;
use crate::config::EngineConfig;
use crate::control::{RunControl, RunStatus};
use crate::loader::RecordSink;
use crate::paginator::Paginator;
use crate::record;
use crate::source::SourceDescriptor;

/// Cap on diagnostic text stored in the control table
const MAX_NOTE_LEN: usize = 500;

/// Outcome of one successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub rows_loaded: i64,
    /// Watermark recorded by this run (the prior mark when no rows arrived)
    pub last_indexed_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct RunProgress {
    rows_loaded: i64,
    max_indexed_date: Option<DateTime<Utc>>,
}

/// Composes the paginator, loader, and run control for one or more sources
pub struct ExtractionOrchestrator<C, S> {
    config: EngineConfig,
    client: ApiClient,
    control: C,
    sink: S,
}

impl<C: RunControl, S: RecordSink> ExtractionOrchestrator<C, S> {
    /// Build an orchestrator from resolved configuration. Configuration is a
    /// plain value scoped to this instance; pipelines in the same process do
    /// not share state beyond the control table.
    pub fn new(config: EngineConfig, control: C, sink: S) -> Result<Self> {
        let client = ApiClient::new(&config.api, config.retry.clone())?;
        Ok(Self {
            config,
            client,
            control,
            sink,
        })
    }

    /// Run one extraction for the descriptor, returning its summary on
    /// success. On failure the run record is finalized FAILED with the cause
    /// before the error propagates.
    pub async fn run_source(&self, descriptor: &SourceDescriptor) -> Result<RunSummary> {
        descriptor.validate().map_err(SyncError::config)?;

        let prior = self
            .control
            .get_watermark(&descriptor.source, &descriptor.endpoint)
            .await?;

        let filter = match (prior, descriptor.first_run_lookback_days) {
            (Some(mark), _) => Some(mark),
            (None, Some(days)) => {
                let fallback = Utc::now() - Duration::days(days);
                info!(
                    source = %descriptor.name,
                    lookback_days = days,
                    fallback = %fallback,
                    "no prior successful run, applying first-run lookback"
                );
                Some(fallback)
            },
            (None, None) => None,
        };

        info!(
            source = %descriptor.name,
            endpoint = %descriptor.endpoint,
            watermark = ?prior,
            "starting extraction run"
        );

        let run_id = self
            .control
            .begin(&descriptor.source, &descriptor.endpoint)
            .await?;

        let mut progress = RunProgress::default();
        match self
            .extract_and_load(descriptor, filter, &mut progress)
            .await
        {
            Ok(()) => {
                // Zero new rows is a success; the watermark simply stands
                let mark = progress.max_indexed_date.or(prior);
                self.control
                    .finish(
                        run_id,
                        RunStatus::Succeeded,
                        mark,
                        progress.rows_loaded,
                        None,
                    )
                    .await?;

                info!(
                    run_id,
                    source = %descriptor.name,
                    rows_loaded = progress.rows_loaded,
                    last_indexed_date = ?mark,
                    "run succeeded"
                );

                Ok(RunSummary {
                    run_id,
                    rows_loaded: progress.rows_loaded,
                    last_indexed_date: mark,
                })
            },
            Err(err) => {
                // Rows already committed stay in the raw layer; the FAILED
                // record keeps the pre-run watermark so the projection is
                // unaffected and the next run re-covers this window.
                let notes = truncate_notes(&err.to_string());
                if let Err(finish_err) = self
                    .control
                    .finish(
                        run_id,
                        RunStatus::Failed,
                        prior,
                        progress.rows_loaded,
                        Some(&notes),
                    )
                    .await
                {
                    error!(
                        run_id,
                        error = %finish_err,
                        "could not finalize FAILED run record; run remains STARTED for manual reconciliation"
                    );
                }

                error!(
                    run_id,
                    source = %descriptor.name,
                    rows_loaded = progress.rows_loaded,
                    error = %err,
                    "run failed"
                );

                Err(err)
            },
        }
    }

    /// Run every descriptor sequentially. One failing source does not stop
    /// the others; each entry carries its own outcome for exit-code handling.
    pub async fn run_all(
        &self,
        descriptors: &[SourceDescriptor],
    ) -> Vec<(String, Result<RunSummary>)> {
        let mut outcomes = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let outcome = self.run_source(descriptor).await;
            outcomes.push((descriptor.name.clone(), outcome));
        }
        outcomes
    }

    async fn extract_and_load(
        &self,
        descriptor: &SourceDescriptor,
        filter: Option<DateTime<Utc>>,
        progress: &mut RunProgress,
    ) -> Result<()> {
        let mut paginator = Paginator::new(&self.client, descriptor, &self.config.api, filter);

        while let Some(batch) = paginator.next_batch().await? {
            let loaded = self.sink.load_batch(descriptor, &batch).await?;
            progress.rows_loaded += loaded as i64;

            if let Some(batch_max) = record::max_indexed_date(&batch) {
                progress.max_indexed_date = Some(match progress.max_indexed_date {
                    Some(current) => current.max(batch_max),
                    None => batch_max,
                });
            }

            debug!(
                source = %descriptor.name,
                batch_size = batch.len(),
                rows_loaded = progress.rows_loaded,
                "batch loaded"
            );
        }

        Ok(())
    }
}

fn truncate_notes(notes: &str) -> String {
    notes.chars().take(MAX_NOTE_LEN).collect()
}
