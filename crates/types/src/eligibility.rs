//! Outcomes of asynchronous eligibility checks on a selected real-world entity.

use serde::{Deserialize, Serialize};

use crate::form::FormData;

/// Why an entity cannot proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceCode {
    InspectionPending,
    ApprovalPending,
    Detained,
    Expired,
    Other,
}

impl ComplianceCode {
    /// Pending outcomes are saved as drafts so the session can be resumed once cleared.
    pub fn is_pending(self) -> bool {
        matches!(self, ComplianceCode::InspectionPending | ComplianceCode::ApprovalPending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReason {
    pub code: ComplianceCode,
    pub message: String,
}

/// A single finding displayed on the compliance detail screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceIssue {
    pub title: String,
    #[serde(default)]
    pub detail: Option<String>,
}

/// Navigation decision returned by a successful eligibility check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum EligibilityDecision {
    /// Continue normally, merging `extra_data` into the form.
    ProceedToNextStep {
        #[serde(default)]
        extra_data: FormData,
    },
    /// Continue, but jump to `target_index` instead of the next step.
    RouteToConditionalStep {
        target_index: usize,
        #[serde(default)]
        condition_data: FormData,
    },
    /// Stop and show a blocking detail screen.
    ShowComplianceDetailScreen {
        entity: String,
        #[serde(default)]
        issues: Vec<ComplianceIssue>,
        reason: ComplianceReason,
    },
}

/// Sub-machine tracking the eligibility of the current selection.
///
/// `Idle -> Validating -> {Valid | Invalid | Error}`. `Valid` and `Invalid` hold until the
/// triggering selection changes, which resets the machine to `Idle`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EligibilityState {
    #[default]
    Idle,
    Validating {
        entity: String,
    },
    Valid {
        entity: String,
        /// Step to jump to on the next advance, when the decision rerouted.
        route_to: Option<usize>,
    },
    Invalid {
        entity: String,
        reason: ComplianceReason,
    },
    Error {
        message: String,
    },
}

impl EligibilityState {
    /// Returns true when the state holds a settled decision for `entity`.
    pub fn is_settled_for(&self, candidate: &str) -> bool {
        match self {
            EligibilityState::Valid { entity, .. } | EligibilityState::Invalid { entity, .. } => entity == candidate,
            _ => false,
        }
    }
}
