//! The workflow engine and its protocols.
//!
//! - `engine`: session ownership, field events, step navigation, submission
//! - `eligibility`: async eligibility branching and draft persistence
//! - `resume`: rebuilding a session from saved progress
//! - `events`: one-shot commands for the UI and navigation results

mod eligibility;
mod engine;
mod events;
mod resume;

pub use engine::WorkflowEngine;
pub use events::{EngineEvent, FileAction, Transition};
