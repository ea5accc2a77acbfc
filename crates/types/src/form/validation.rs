//! Field-level validation shared by strategies and the engine.
//!
//! These routines map a step plus the current form data to a field error map. They never
//! touch the network: remote checks belong to the strategy's focus-lost hook.
//!
//! The checks applied to a field, in order:
//! - Mandatory (or conditionally mandatory) fields must hold a meaningful value.
//! - Empty optional fields are accepted without further checks.
//! - Text inputs honour their input kind, pattern, and length bounds.
//! - Choice fields must pick from the known options, when options are loaded.
//! - Structured kinds must decode, then satisfy their own limits (dates, files, records).

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{Local, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::value::{FieldValue, has_meaningful_value};
use super::{FieldDefinition, FieldErrors, FieldKind, FormData, StepDefinition, TextField, TextInputKind};

static NUMERIC_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+$").expect("numeric pattern"));
static DECIMAL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]+(\.[0-9]+)?$").expect("decimal pattern"));
static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern"));
static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,18}[0-9]$").expect("phone pattern"));

/// Field patterns compiled so far, keyed by their source text.
static FIELD_PATTERNS: Lazy<Mutex<HashMap<String, Regex>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn field_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    let mut cache = FIELD_PATTERNS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(regex) = cache.get(pattern) {
        return Ok(regex.clone());
    }
    let regex = Regex::new(pattern)?;
    cache.insert(pattern.to_string(), regex.clone());
    Ok(regex)
}

/// Outcome of validating every field on a step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepValidation {
    pub is_valid: bool,
    pub field_errors: FieldErrors,
}

impl StepValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            field_errors: FieldErrors::new(),
        }
    }

    pub fn from_errors(field_errors: FieldErrors) -> Self {
        Self {
            is_valid: field_errors.is_empty(),
            field_errors,
        }
    }
}

/// Validates every field on a step against today's date.
pub fn validate_step(step: &StepDefinition, form_data: &FormData) -> StepValidation {
    validate_step_on(step, form_data, Local::now().date_naive())
}

/// Validates every field on a step, using `today` for date range checks.
pub fn validate_step_on(step: &StepDefinition, form_data: &FormData, today: NaiveDate) -> StepValidation {
    let mut field_errors = FieldErrors::new();
    for field in &step.fields {
        if let Err(message) = validate_field_on(field, form_data, today) {
            field_errors.insert(field.id.clone(), message);
        }
    }
    StepValidation::from_errors(field_errors)
}

/// Validates a single field's current value.
pub fn validate_field(field: &FieldDefinition, form_data: &FormData) -> Result<(), String> {
    validate_field_on(field, form_data, Local::now().date_naive())
}

fn validate_field_on(field: &FieldDefinition, form_data: &FormData, today: NaiveDate) -> Result<(), String> {
    if field.is_read_only() {
        return Ok(());
    }
    let raw = form_data.get(&field.id).map(String::as_str);
    if !has_meaningful_value(&field.kind, raw) {
        if field.is_required(form_data) {
            return Err(format!("{} is required", field.label));
        }
        return Ok(());
    }
    let raw = raw.unwrap_or_default();

    match &field.kind {
        FieldKind::Text(text) => validate_text(raw, text),
        FieldKind::DropDown { options, .. } | FieldKind::RadioGroup { options } => {
            if options.is_empty() || options.iter().any(|option| option == raw) {
                Ok(())
            } else {
                Err("value is not in the allowed set".to_string())
            }
        }
        FieldKind::MultiSelect { options, .. } => match field.kind.decode(raw).map_err(|error| error.to_string())? {
            FieldValue::Choices(choices) => {
                if options.is_empty() || choices.iter().all(|choice| options.contains(choice)) {
                    Ok(())
                } else {
                    Err("selection contains a value outside the allowed set".to_string())
                }
            }
            _ => Ok(()),
        },
        FieldKind::DatePicker { allow_past, allow_future } => match field.kind.decode(raw).map_err(|error| error.to_string())? {
            FieldValue::Date(date) => {
                if !allow_past && date < today {
                    Err("date cannot be in the past".to_string())
                } else if !allow_future && date > today {
                    Err("date cannot be in the future".to_string())
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        },
        FieldKind::FileUpload { allowed_types, max_size_mb } => match field.kind.decode(raw).map_err(|error| error.to_string())? {
            FieldValue::File(file) => {
                if !allowed_types.is_empty() && !allowed_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(&file.mime_type)) {
                    return Err(format!("file type {} is not accepted", file.mime_type));
                }
                let limit_bytes = u64::from(*max_size_mb) * 1024 * 1024;
                if file.size_bytes > limit_bytes {
                    return Err(format!("file must be at most {} MB", max_size_mb));
                }
                Ok(())
            }
            _ => Ok(()),
        },
        FieldKind::RecordList { schema, min_records } => match field.kind.decode(raw).map_err(|error| error.to_string())? {
            FieldValue::Records(records) => {
                if records.len() < *min_records {
                    return Err(format!("at least {} entries are required", min_records));
                }
                for (position, record) in records.iter().enumerate() {
                    for nested in schema {
                        if let Err(message) = validate_field_on(nested, record, today) {
                            return Err(format!("entry {}: {}", position + 1, message));
                        }
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        },
        FieldKind::CheckBox | FieldKind::ComputedLineItem { .. } => Ok(()),
    }
}

fn validate_text(text: &str, rules: &TextField) -> Result<(), String> {
    let trimmed = text.trim();
    match rules.input {
        TextInputKind::Plain => {}
        TextInputKind::Numeric if !NUMERIC_PATTERN.is_match(trimmed) => return Err("value must contain digits only".to_string()),
        TextInputKind::Decimal if !DECIMAL_PATTERN.is_match(trimmed) => return Err("value must be a number".to_string()),
        TextInputKind::Email if !EMAIL_PATTERN.is_match(trimmed) => return Err("value must be a valid email address".to_string()),
        TextInputKind::Phone if !PHONE_PATTERN.is_match(trimmed) => return Err("value must be a valid phone number".to_string()),
        _ => {}
    }

    if let Some(min_length) = rules.min_length
        && text.chars().count() < min_length
    {
        return Err(format!("value must be at least {} characters", min_length));
    }

    if let Some(max_length) = rules.max_length
        && text.chars().count() > max_length
    {
        return Err(format!("value must be at most {} characters", max_length));
    }

    if let Some(pattern) = &rules.pattern {
        let regex = field_pattern(pattern).map_err(|error| format!("invalid pattern '{}': {}", pattern, error))?;
        if !regex.is_match(text) {
            return Err(format!("value must match the pattern {}", pattern));
        }
    }
    Ok(())
}
