//! Paginated record sources.
//!
//! A source is anything implementing [`PageFetcher`]: it returns the raw JSON
//! body for a page number. [`SourceReader`] drives a fetcher page by page,
//! validates and tags the records, and pushes them onto an output queue.

mod http;
mod reader;

pub use http::HttpPageFetcher;
pub use reader::{ReaderOutcome, ReaderReport, SourceReader};

use indexmap::IndexMap;
use serde_json::Value;
use std::future::Future;

use crate::error::FetchError;

/// A schema-free record: an ordered mapping of field names to JSON values.
pub type Record = serde_json::Map<String, Value>;

/// Fetches one page of a remote collection.
pub trait PageFetcher: Send + Sync {
    /// Fetch `page` and return the decoded JSON body.
    fn fetch_page(&self, page: u32) -> impl Future<Output = Result<Value, FetchError>> + Send;
}

/// Pull the records out of a page body.
///
/// The body must be an object holding an array of objects under `key`.
pub fn extract_records(body: Value, key: &str) -> Result<Vec<Record>, FetchError> {
    let malformed = |found: &'static str| FetchError::MalformedResponse {
        key: key.to_string(),
        found,
    };

    let mut body = match body {
        Value::Object(body) => body,
        other => return Err(malformed(json_kind(&other))),
    };
    let items = match body.remove(key) {
        Some(Value::Array(items)) => items,
        Some(other) => return Err(malformed(json_kind(&other))),
        None => return Err(malformed("no such key")),
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(record) => Ok(record),
            other => Err(malformed(json_kind(&other))),
        })
        .collect()
}

/// Stamp a record with where it came from.
pub fn tag_record(
    record: &mut Record,
    provenance_field: &str,
    source_name: &str,
    tags: &IndexMap<String, Value>,
) {
    record.insert(
        provenance_field.to_string(),
        Value::String(source_name.to_string()),
    );
    for (key, value) in tags {
        record.insert(key.clone(), value.clone());
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_records() {
        let body = json!({"page": 1, "data": [{"id": 1}, {"id": 2}]});
        let records = extract_records(body, "data").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], json!(2));
    }

    #[test]
    fn test_extract_empty_list() {
        let records = extract_records(json!({"data": []}), "data").unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_extract_rejects_non_list() {
        let err = extract_records(json!({"data": "nope"}), "data").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { found: "string", .. }));
    }

    #[test]
    fn test_extract_rejects_missing_key() {
        let err = extract_records(json!({"items": []}), "data").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { found: "no such key", .. }));
    }

    #[test]
    fn test_extract_rejects_non_object_body() {
        let err = extract_records(json!([1, 2]), "data").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { found: "array", .. }));
    }

    #[test]
    fn test_extract_rejects_scalar_items() {
        let err = extract_records(json!({"data": [{"id": 1}, 5]}), "data").unwrap_err();
        assert!(matches!(err, FetchError::MalformedResponse { found: "number", .. }));
    }

    #[test]
    fn test_tag_record() {
        let mut record = Record::new();
        record.insert("id".to_string(), json!(1));
        let mut tags = IndexMap::new();
        tags.insert("t0".to_string(), json!(true));

        tag_record(&mut record, "_source", "users", &tags);

        assert_eq!(record["_source"], json!("users"));
        assert_eq!(record["t0"], json!(true));
        let keys: Vec<&str> = record.keys().map(String::as_str).collect();
        assert_eq!(keys, ["id", "_source", "t0"]);
    }
}
