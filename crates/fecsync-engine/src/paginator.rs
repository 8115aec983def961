//! Keyset paginator
//!
//! Drives paged retrieval of one resource collection. Each response carries a
//! `last_indexes` cursor that becomes query parameters on the next request;
//! the stream ends on an empty page or a null cursor. The paginator is
//! restartable from scratch but not resumable mid-stream: a failed run simply
//! re-extracts from the last committed watermark on its next invocation.

use chrono::{DateTime, Duration, Utc};
use fecsync_common::{Result, SyncError};
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::ApiClient;
use crate::config::ApiConfig;
use crate::record::ExtractedRecord;
use crate::source::SourceDescriptor;

/// Lazy, finite stream of record batches from one endpoint
pub struct Paginator<'a> {
    client: &'a ApiClient,
    descriptor: &'a SourceDescriptor,
    base_params: Vec<(String, String)>,
    cursor: Option<Map<String, Value>>,
    pages_fetched: u32,
    max_pages: Option<u32>,
    done: bool,
}

impl<'a> Paginator<'a> {
    /// Set up a page stream filtered to records strictly after `watermark`
    /// (when the descriptor supports incremental filtering).
    pub fn new(
        client: &'a ApiClient,
        descriptor: &'a SourceDescriptor,
        api: &ApiConfig,
        watermark: Option<DateTime<Utc>>,
    ) -> Self {
        let mut base_params = vec![("per_page".to_string(), api.per_page.to_string())];

        if let Some(ref sort) = descriptor.sort_param {
            base_params.push(("sort".to_string(), sort.clone()));
        }

        if let (Some(param), Some(mark)) = (descriptor.watermark_param.as_ref(), watermark) {
            base_params.push((param.clone(), format_watermark_filter(mark)));
        }

        for (k, v) in &descriptor.extra_params {
            base_params.push((k.clone(), v.clone()));
        }

        Self {
            client,
            descriptor,
            base_params,
            cursor: None,
            pages_fetched: 0,
            max_pages: api.max_pages,
            done: false,
        }
    }

    /// Fetch the next batch; `None` once the stream is exhausted.
    ///
    /// Batches are never empty: an empty page terminates the stream instead.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<ExtractedRecord>>> {
        if self.done {
            return Ok(None);
        }

        let mut params = self.base_params.clone();
        if let Some(ref cursor) = self.cursor {
            params.extend(cursor_params(cursor));
        }

        let envelope = self
            .client
            .fetch_page(&self.descriptor.endpoint, &params)
            .await?;
        self.pages_fetched += 1;

        if envelope.results.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let records = envelope
            .results
            .into_iter()
            .map(|payload| ExtractedRecord::from_payload(self.descriptor, payload))
            .collect::<Result<Vec<_>>>()?;

        self.advance_cursor(envelope.pagination.last_indexes)?;

        if let Some(cap) = self.max_pages {
            if !self.done && self.pages_fetched >= cap {
                debug!(
                    endpoint = %self.descriptor.endpoint,
                    pages = self.pages_fetched,
                    "page cap reached, ending stream"
                );
                self.done = true;
            }
        }

        Ok(Some(records))
    }

    fn advance_cursor(&mut self, next: Option<Map<String, Value>>) -> Result<()> {
        match next {
            None => {
                // Final page: records present, no pointer to follow
                self.done = true;
            },
            Some(map) if map.is_empty() => {
                return Err(SyncError::protocol(format!(
                    "{}: non-empty page returned an empty last_indexes cursor",
                    self.descriptor.endpoint
                )));
            },
            Some(map) => {
                if self.cursor.as_ref() == Some(&map) {
                    return Err(SyncError::protocol(format!(
                        "{}: pagination cursor did not advance",
                        self.descriptor.endpoint
                    )));
                }
                self.cursor = Some(map);
            },
        }
        Ok(())
    }
}

/// Render the cursor object as query parameters. Cursor values arrive as
/// strings or numbers depending on the field; nulls carry no position and are
/// dropped.
fn cursor_params(cursor: &Map<String, Value>) -> Vec<(String, String)> {
    cursor
        .iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Null => None,
            other => Some((k.clone(), other.to_string())),
        })
        .collect()
}

/// Format the strictly-after watermark filter. Upstream `min_*` filters are
/// inclusive at second granularity, so the boundary second is skipped by
/// sending the stored watermark plus one second.
pub fn format_watermark_filter(watermark: DateTime<Utc>) -> String {
    (watermark + Duration::seconds(1))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}
