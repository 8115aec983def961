//! Extracted records
//!
//! The engine treats upstream payloads as opaque JSON. Its contract is with
//! two per-record fields named by the source descriptor: the merge key and the
//! indexed date. Everything else passes through to the raw layer untouched.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use fecsync_common::{Result, SyncError};
use serde_json::Value;

use crate::source::SourceDescriptor;

/// One upstream record, parsed just enough to load and watermark it
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedRecord {
    /// Value of the descriptor's merge-key field
    pub record_id: String,
    /// Value of the descriptor's indexed-date field, normalized to UTC
    pub indexed_date: DateTime<Utc>,
    /// The record verbatim
    pub payload: Value,
}

impl ExtractedRecord {
    /// Extract the contract fields from a raw payload. A record missing either
    /// field violates the page envelope contract and is fatal for the run.
    pub fn from_payload(descriptor: &SourceDescriptor, payload: Value) -> Result<Self> {
        let record_id = field_as_string(&payload, &descriptor.merge_key).ok_or_else(|| {
            SyncError::protocol(format!(
                "record from {} missing merge key '{}'",
                descriptor.endpoint, descriptor.merge_key
            ))
        })?;

        let raw_date = payload
            .get(&descriptor.indexed_date_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SyncError::protocol(format!(
                    "record {} from {} missing indexed date field '{}'",
                    record_id, descriptor.endpoint, descriptor.indexed_date_field
                ))
            })?;

        let indexed_date = parse_indexed_date(raw_date).ok_or_else(|| {
            SyncError::protocol(format!(
                "record {} has unparseable indexed date '{}'",
                record_id, raw_date
            ))
        })?;

        Ok(Self {
            record_id,
            indexed_date,
            payload,
        })
    }
}

/// Read a payload field as a string key. Upstream identifiers arrive as
/// strings or integers depending on the endpoint.
fn field_as_string(payload: &Value, field: &str) -> Option<String> {
    match payload.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse the upstream indexed-date formats: RFC 3339, the provider's naive
/// timestamp (`2023-07-10T21:05:09`, no zone, UTC by convention), or a bare
/// date.
pub fn parse_indexed_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(d.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// Maximum indexed date across a batch
pub fn max_indexed_date(records: &[ExtractedRecord]) -> Option<DateTime<Utc>> {
    records.iter().map(|r| r.indexed_date).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source;
    use serde_json::json;

    #[test]
    fn test_from_payload_extracts_contract_fields() {
        let descriptor = source::schedule_a();
        let payload = json!({
            "sub_id": "4072320231710954619",
            "load_date": "2023-07-10T21:05:09",
            "contributor_name": "DOE, JANE",
            "contribution_receipt_amount": 250.0,
        });

        let record = ExtractedRecord::from_payload(&descriptor, payload.clone()).unwrap();
        assert_eq!(record.record_id, "4072320231710954619");
        assert_eq!(
            record.indexed_date.to_rfc3339(),
            "2023-07-10T21:05:09+00:00"
        );
        assert_eq!(record.payload, payload);
    }

    #[test]
    fn test_numeric_merge_key() {
        let descriptor = source::schedule_a();
        let payload = json!({
            "sub_id": 4072320231710954619u64,
            "load_date": "2023-07-10T21:05:09",
        });

        let record = ExtractedRecord::from_payload(&descriptor, payload).unwrap();
        assert_eq!(record.record_id, "4072320231710954619");
    }

    #[test]
    fn test_missing_merge_key_is_protocol_error() {
        let descriptor = source::candidates();
        let payload = json!({ "load_date": "2024-01-01", "name": "SMITH, ALEX" });

        let err = ExtractedRecord::from_payload(&descriptor, payload).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn test_missing_indexed_date_is_protocol_error() {
        let descriptor = source::candidates();
        let payload = json!({ "candidate_id": "H0XY12345" });

        let err = ExtractedRecord::from_payload(&descriptor, payload).unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)));
    }

    #[test]
    fn test_parse_indexed_date_formats() {
        assert!(parse_indexed_date("2023-07-10T21:05:09").is_some());
        assert!(parse_indexed_date("2023-07-10T21:05:09.123").is_some());
        assert!(parse_indexed_date("2023-07-10T21:05:09+00:00").is_some());
        assert!(parse_indexed_date("2023-07-10").is_some());
        assert!(parse_indexed_date("July 10, 2023").is_none());
        assert!(parse_indexed_date("").is_none());
    }

    #[test]
    fn test_max_indexed_date() {
        let descriptor = source::candidates();
        let records: Vec<_> = ["2024-01-02", "2024-03-01", "2024-02-15"]
            .iter()
            .enumerate()
            .map(|(i, d)| {
                ExtractedRecord::from_payload(
                    &descriptor,
                    json!({ "candidate_id": format!("H{i}"), "load_date": d }),
                )
                .unwrap()
            })
            .collect();

        let max = max_indexed_date(&records).unwrap();
        assert_eq!(max, parse_indexed_date("2024-03-01").unwrap());
        assert_eq!(max_indexed_date(&[]), None);
    }
}
