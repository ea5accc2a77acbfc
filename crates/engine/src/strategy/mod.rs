//! Per-transaction-type strategy contract.
//!
//! Modules:
//! - `hooks`: signal channel from a strategy back to the engine (rebuilds, lookup progress)
//! - `registry`: factory table mapping transaction types to strategies
//!
//! A strategy owns the domain rules of one transaction type: which steps exist for the data
//! accumulated so far, how each step is submitted, and which remote checks run. The engine
//! owns navigation and state; the strategy never mutates engine state directly.
//!
//! Strategies are shared behind `Arc` and called through `&self`, so any accumulated state
//! they keep lives behind their own locks.

mod hooks;
mod registry;

pub use hooks::{REBUILD_MARKER, StrategyHooks, StrategySignal, apply_signal};
pub use registry::{StrategyFactory, StrategyRegistry};

use async_trait::async_trait;
use formflow_types::{EligibilityDecision, FormData, StepDefinition, StepValidation, SubmissionReceipt, TransactionType, validate_step};
use indexmap::IndexMap;

use crate::StrategyError;

/// Result of processing a step's data on "Next".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Move to the step the navigation rules pick.
    Advance,
    /// Move directly to the given index.
    Reroute(usize),
    /// Stay on the step. The diagnostics (for example, `apiErrorCode`) are merged into the
    /// form so the UI can render a banner.
    Block { diagnostics: FormData },
}

/// Result of the on-blur validation hook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FocusLostOutcome {
    #[default]
    NoAction,
    /// Values to merge into the form (for example, a company name found by registration number).
    UpdateFields(FormData),
    /// Error attached to a field; no values are changed.
    Error { field_id: String, message: String },
}

/// Contract every transaction type implements.
#[async_trait]
pub trait TransactionStrategy: Send + Sync {
    fn transaction_type(&self) -> TransactionType;

    /// Hands the strategy its signal channel. Called once, before any other operation.
    fn attach(&self, _hooks: StrategyHooks) {}

    /// Builds the step list for the data accumulated so far.
    ///
    /// Must be idempotent and side-effect free; the engine calls it on every rebuild.
    fn get_steps(&self, accumulated: &FormData) -> Vec<StepDefinition>;

    /// Fetches the option lists needed before the first step list is built.
    ///
    /// Implementations report each lookup through [`StrategyHooks::track_lookup`].
    async fn load_dynamic_options(&self) -> Result<IndexMap<String, Vec<String>>, StrategyError> {
        Ok(IndexMap::new())
    }

    /// Same-step reactive effects of a value change. Returns the full updated form data and
    /// may insert [`REBUILD_MARKER`] to force the step list to be rebuilt.
    fn handle_field_change(&self, _field_id: &str, _new_value: &str, form_data: &FormData) -> FormData {
        form_data.clone()
    }

    /// Fields cleared when `field_id` changes. A non-empty list marks `field_id` as a
    /// structurally significant selector and forces a rebuild.
    fn dependent_fields(&self, _field_id: &str) -> Vec<String> {
        Vec::new()
    }

    /// Asynchronous on-blur check (for example, a registry lookup).
    async fn on_field_focus_lost(&self, _field_id: &str, _value: &str) -> Result<FocusLostOutcome, StrategyError> {
        Ok(FocusLostOutcome::NoAction)
    }

    /// Submits the current step's values. Called on "Next" after local validation passed.
    async fn process_step_data(&self, step_index: usize, step_data: &FormData) -> Result<StepOutcome, StrategyError>;

    /// Local synchronous validation of a step.
    fn validate_step(&self, step_index: usize, form_data: &FormData) -> StepValidation {
        match self.get_steps(form_data).get(step_index) {
            Some(step) => validate_step(step, form_data),
            None => StepValidation::valid(),
        }
    }

    /// Final submission, only called on the terminal step.
    async fn submit(&self, form_data: &FormData) -> Result<SubmissionReceipt, StrategyError>;

    /// Called when a step becomes current. `missing_lookups` lists the step's required
    /// lookups that are not loaded yet.
    async fn on_step_opened(&self, _step_index: usize, _missing_lookups: &[String]) -> Result<(), StrategyError> {
        Ok(())
    }

    /// Called before navigating backwards out of a step. Returns fields whose values are no
    /// longer valid and must be cleared.
    fn on_step_left(&self, _step_index: usize, _step: &StepDefinition) -> Vec<String> {
        Vec::new()
    }

    /// Optional eligibility capability. Strategies that validate a selected real-world entity
    /// return themselves here.
    fn eligibility(&self) -> Option<&dyn EligibilityCapability> {
        None
    }
}

/// Capability declared by strategies that check a selected entity before letting the user on.
#[async_trait]
pub trait EligibilityCapability: Send + Sync {
    /// Field holding the selected entity identifier.
    fn selector_field(&self) -> &str;

    async fn check_eligibility(&self, entity: &str, form_data: &FormData) -> Result<EligibilityDecision, StrategyError>;
}
