//! Decode contract for string-encoded field values.
//!
//! The engine stores every value as text. Kinds with structure serialize it as follows:
//!
//! | kind | encoding |
//! |---|---|
//! | `Text`, `DropDown`, `RadioGroup` | the raw text |
//! | `CheckBox` | `"true"` or `"false"` |
//! | `DatePicker` | ISO date, `YYYY-MM-DD` |
//! | `MultiSelect` | JSON array of strings |
//! | `RecordList` | JSON array of objects with string values, keyed by the nested field ids |
//! | `FileUpload` | JSON object `{"name", "mimeType", "sizeBytes", "uri"}` |
//! | `ComputedLineItem` | decimal amount text |
//!
//! Validation and step rebuilds treat these keys as opaque until they need the structure,
//! at which point they call [`FieldKind::decode`].

use chrono::NaiveDate;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::FieldKind;

/// Format used for date picker values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Metadata describing an uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub name: String,
    pub mime_type: String,
    pub size_bytes: u64,
    /// Location of the uploaded content (remote id or local URI).
    #[serde(default)]
    pub uri: Option<String>,
}

/// A single nested record in a record list.
pub type Record = IndexMap<String, String>;

/// Structured view of a field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Date(NaiveDate),
    Choices(Vec<String>),
    Records(Vec<Record>),
    File(FileReference),
    Amount(f64),
}

/// Failure to decode a stored value according to its field kind.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FieldDecodeError {
    #[error("expected true or false, got '{0}'")]
    InvalidFlag(String),
    #[error("expected a date formatted as YYYY-MM-DD, got '{0}'")]
    InvalidDate(String),
    #[error("expected a JSON list: {0}")]
    InvalidList(String),
    #[error("expected file metadata: {0}")]
    InvalidFile(String),
    #[error("expected a decimal amount, got '{0}'")]
    InvalidAmount(String),
}

impl FieldKind {
    /// Decodes a stored string into its structured form.
    pub fn decode(&self, raw: &str) -> Result<FieldValue, FieldDecodeError> {
        match self {
            FieldKind::Text(_) | FieldKind::DropDown { .. } | FieldKind::RadioGroup { .. } => Ok(FieldValue::Text(raw.to_string())),
            FieldKind::CheckBox => match raw.trim() {
                "true" => Ok(FieldValue::Flag(true)),
                "false" | "" => Ok(FieldValue::Flag(false)),
                other => Err(FieldDecodeError::InvalidFlag(other.to_string())),
            },
            FieldKind::DatePicker { .. } => NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
                .map(FieldValue::Date)
                .map_err(|_| FieldDecodeError::InvalidDate(raw.to_string())),
            FieldKind::MultiSelect { .. } => decode_json_list::<String>(raw).map(FieldValue::Choices),
            FieldKind::RecordList { .. } => decode_json_list::<Record>(raw).map(FieldValue::Records),
            FieldKind::FileUpload { .. } => serde_json::from_str::<FileReference>(raw)
                .map(FieldValue::File)
                .map_err(|error| FieldDecodeError::InvalidFile(error.to_string())),
            FieldKind::ComputedLineItem { .. } => raw
                .trim()
                .parse::<f64>()
                .map(FieldValue::Amount)
                .map_err(|_| FieldDecodeError::InvalidAmount(raw.to_string())),
        }
    }
}

fn decode_json_list<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<Vec<T>, FieldDecodeError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw).map_err(|error| FieldDecodeError::InvalidList(error.to_string()))
}

/// Encodes a multi-select value.
pub fn encode_choices(choices: &[String]) -> String {
    serde_json::to_string(choices).unwrap_or_else(|_| "[]".to_string())
}

/// Encodes a record list value.
pub fn encode_records(records: &[Record]) -> String {
    serde_json::to_string(records).unwrap_or_else(|_| "[]".to_string())
}

/// Encodes file metadata for a file upload field.
pub fn encode_file(file: &FileReference) -> String {
    serde_json::to_string(file).unwrap_or_default()
}

/// Returns true when a stored string should count as "filled in".
///
/// Blank text, `false` checkboxes, and empty JSON lists are all treated as empty.
pub fn has_meaningful_value(kind: &FieldKind, raw: Option<&str>) -> bool {
    let Some(raw) = raw else {
        return false;
    };
    if raw.trim().is_empty() {
        return false;
    }
    match kind {
        FieldKind::CheckBox => raw.trim() == "true",
        FieldKind::MultiSelect { .. } | FieldKind::RecordList { .. } => raw.trim() != "[]",
        _ => true,
    }
}
