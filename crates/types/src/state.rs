//! Snapshot types describing an in-flight transaction.
//!
//! [`TransactionState`] is the single root the engine mutates. Consumers only ever receive
//! clones of it, so nothing here carries behaviour beyond small read helpers.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::form::{FieldErrors, FormData, StepDefinition};

/// Identifier selecting the strategy that governs a session (for example, `vessel_registration`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionType(pub String);

impl TransactionType {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self(identifier.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Loading state of a single remote option list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub loading: bool,
    pub data: Vec<String>,
    pub success: bool,
}

impl LookupEntry {
    /// Returns true when the lookup has finished successfully at least once.
    pub fn is_loaded(&self) -> bool {
        !self.loading && self.success
    }
}

/// Receipt returned by a successful final submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionReceipt {
    pub request_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Tri-state status of the final submission, as rendered by the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SubmitStatus {
    #[default]
    Empty,
    Loading,
    Success { receipt: SubmissionReceipt },
    Failure { message: String },
}

/// Mutable root of a transaction session, owned by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionState {
    /// Strategy selector; `None` until the engine is initialized.
    pub transaction_type: Option<TransactionType>,
    /// Current step list. Rebuilt whenever accumulated data changes its shape.
    pub steps: Vec<StepDefinition>,
    /// Index into `steps`.
    pub current_step: usize,
    /// Steps the user has passed validation for at least once.
    pub completed_steps: BTreeSet<usize>,
    /// Steps that may not be re-entered. Only populated by a resumed session.
    pub locked_steps: BTreeSet<usize>,
    pub form_data: FormData,
    pub field_errors: FieldErrors,
    pub is_resumed_transaction: bool,
    /// Last surfaced error message, cleared by the next successful transition.
    pub api_error: Option<String>,
    pub can_proceed_to_next: bool,
    pub submit_status: SubmitStatus,
    /// Fields whose focus-lost validation is in flight.
    pub loading_fields: BTreeSet<String>,
    /// Remote option lists keyed by lookup name.
    pub lookups: IndexMap<String, LookupEntry>,
}

impl TransactionState {
    /// Returns the step the user is currently on.
    pub fn current(&self) -> Option<&StepDefinition> {
        self.steps.get(self.current_step)
    }

    /// Returns true once steps have been built.
    pub fn is_initialized(&self) -> bool {
        self.transaction_type.is_some() && !self.steps.is_empty()
    }

    /// Returns true when the current step is the last one.
    pub fn is_terminal_step(&self) -> bool {
        !self.steps.is_empty() && self.current_step + 1 == self.steps.len()
    }

    /// Returns the value stored for a field.
    pub fn value(&self, field_id: &str) -> Option<&str> {
        self.form_data.get(field_id).map(String::as_str)
    }

    /// Returns the lookup keys whose fetch is still in flight.
    pub fn loading_lookups(&self) -> Vec<&str> {
        self.lookups
            .iter()
            .filter(|(_, entry)| entry.loading)
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_step_tracks_last_index() {
        let mut state = TransactionState {
            steps: vec![StepDefinition::new("One"), StepDefinition::new("Two")],
            ..TransactionState::default()
        };
        assert!(!state.is_terminal_step());
        state.current_step = 1;
        assert!(state.is_terminal_step());
    }

    #[test]
    fn submit_status_serializes_with_state_tag() {
        let status = SubmitStatus::Failure { message: "declined".into() };
        let json = serde_json::to_value(&status).expect("serialize status");
        assert_eq!(json["state"], "failure");
        assert_eq!(json["message"], "declined");
    }
}
