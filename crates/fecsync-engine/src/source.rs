//! Source descriptors
//!
//! One extraction pipeline, parameterized by data: each upstream collection is
//! described by a [`SourceDescriptor`] naming its endpoint, destination raw
//! table, merge key, and indexed-date field. Adding a source is adding a
//! descriptor, not another pipeline.

use serde::{Deserialize, Serialize};

/// Describes one (source, endpoint) extraction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Registry name used on the command line (e.g. "schedule_a")
    pub name: String,
    /// Logical upstream system, recorded on every run and raw row
    pub source: String,
    /// API path, also the run-record endpoint key (e.g. "/schedules/schedule_a/")
    pub endpoint: String,
    /// Destination raw table
    pub dest_table: String,
    /// Payload field whose value is the upsert key in the raw table
    pub merge_key: String,
    /// Payload field carrying the sortable indexed date used for watermarking
    pub indexed_date_field: String,
    /// Query parameter carrying the watermark filter; None means the endpoint
    /// is re-extracted in full each run and the upsert absorbs repeats
    pub watermark_param: Option<String>,
    /// Upstream sort field required for stable keyset pagination
    pub sort_param: Option<String>,
    /// Static query parameters the endpoint requires on every request
    pub extra_params: Vec<(String, String)>,
    /// On the first run (no prior watermark), filter from now minus this many
    /// days instead of unbounded history
    pub first_run_lookback_days: Option<i64>,
}

impl SourceDescriptor {
    /// Validate the descriptor, in particular that the destination table is a
    /// plain SQL identifier (it is interpolated into DDL/DML, not bound)
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() || self.source.is_empty() || self.endpoint.is_empty() {
            return Err("descriptor name, source, and endpoint must be non-empty".to_string());
        }
        if !is_plain_identifier(&self.dest_table) {
            return Err(format!(
                "destination table '{}' is not a plain identifier",
                self.dest_table
            ));
        }
        if self.merge_key.is_empty() || self.indexed_date_field.is_empty() {
            return Err("merge_key and indexed_date_field must be non-empty".to_string());
        }
        Ok(())
    }
}

/// Identifier check for names interpolated into SQL
fn is_plain_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// All registered sources, in the order they run under `run` with no filter
pub fn all() -> Vec<SourceDescriptor> {
    vec![candidates(), committees(), schedule_a()]
}

/// Look up a registered source by name
pub fn descriptor(name: &str) -> Option<SourceDescriptor> {
    all().into_iter().find(|d| d.name == name)
}

/// Candidate registrations. No upstream incremental filter; full refresh per
/// run, deduplicated by candidate id.
pub fn candidates() -> SourceDescriptor {
    SourceDescriptor {
        name: "candidates".to_string(),
        source: "openfec".to_string(),
        endpoint: "/candidates/".to_string(),
        dest_table: "raw_candidates".to_string(),
        merge_key: "candidate_id".to_string(),
        indexed_date_field: "load_date".to_string(),
        watermark_param: None,
        sort_param: None,
        extra_params: Vec::new(),
        first_run_lookback_days: None,
    }
}

/// Committee registrations. Same refresh pattern as candidates.
pub fn committees() -> SourceDescriptor {
    SourceDescriptor {
        name: "committees".to_string(),
        source: "openfec".to_string(),
        endpoint: "/committees/".to_string(),
        dest_table: "raw_committees".to_string(),
        merge_key: "committee_id".to_string(),
        indexed_date_field: "load_date".to_string(),
        watermark_param: None,
        sort_param: None,
        extra_params: Vec::new(),
        first_run_lookback_days: None,
    }
}

/// Schedule A itemized receipts. High volume, so extraction is incremental on
/// `load_date`. The endpoint rejects unfiltered queries; it requires a
/// two-year transaction period and a sort field for stable keyset paging.
/// Unbounded history is impractical on a first run, hence the lookback window.
pub fn schedule_a() -> SourceDescriptor {
    let current_year = chrono::Utc::now().format("%Y").to_string();
    SourceDescriptor {
        name: "schedule_a".to_string(),
        source: "openfec".to_string(),
        endpoint: "/schedules/schedule_a/".to_string(),
        dest_table: "raw_schedule_a".to_string(),
        merge_key: "sub_id".to_string(),
        indexed_date_field: "load_date".to_string(),
        watermark_param: Some("min_load_date".to_string()),
        sort_param: Some("contribution_receipt_date".to_string()),
        extra_params: vec![("two_year_transaction_period".to_string(), current_year)],
        first_run_lookback_days: Some(30),
    }
}
