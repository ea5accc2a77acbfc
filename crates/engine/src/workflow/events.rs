//! One-shot commands the engine emits for the UI to render.
//!
//! Events are delivered over an unbounded channel and consumed exactly once. They are not
//! part of [`formflow_types::TransactionState`], so re-rendering a snapshot never replays them.

use formflow_types::{ComplianceIssue, ComplianceReason, RequestStatus};
use serde::{Deserialize, Serialize};

/// File operation requested from a file-upload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Pick,
    View,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Transient error or notice.
    Toast { message: String },
    /// Open a picker, show a file, or confirm removal for a file-upload field.
    FileNavigation { field_id: String, action: FileAction },
    /// The selected entity failed its eligibility check; show the blocking detail screen.
    ComplianceInterrupt {
        entity: String,
        issues: Vec<ComplianceIssue>,
        reason: ComplianceReason,
    },
    /// Partial progress was saved and can be resumed with `request_id`.
    DraftSaved { request_id: String },
    /// A saved request cannot be resumed in its current status.
    ResumeInterrupted {
        request_id: String,
        status: RequestStatus,
        rejection_reason: Option<String>,
    },
}

/// Result of a navigation operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transition", rename_all = "snake_case")]
pub enum Transition {
    /// Moved forward to the following step.
    Advanced { from: usize, to: usize },
    /// Moved forward to a step chosen by the strategy or an eligibility decision.
    Rerouted { from: usize, to: usize },
    /// Moved backwards.
    Returned { from: usize, to: usize },
    /// The terminal step passed; the transaction is ready to submit.
    Finished { step: usize },
    /// Nothing happened (a concurrent `next` was in flight, or there was nowhere to go).
    Ignored,
}

impl Transition {
    /// Returns the step index the transition landed on, if it moved.
    pub fn target(&self) -> Option<usize> {
        match self {
            Transition::Advanced { to, .. } | Transition::Rerouted { to, .. } | Transition::Returned { to, .. } => Some(*to),
            Transition::Finished { .. } | Transition::Ignored => None,
        }
    }
}
