#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use formflow_engine::{
    ApiFailure, DraftSink, EligibilityCapability, EngineEvent, FocusLostOutcome, RequestStatusSource, StepOutcome, StrategyError,
    StrategyHooks, StrategyRegistry, TransactionStrategy, WorkflowEngine,
};
use formflow_types::{
    DraftRequest, EligibilityDecision, FieldCondition, FieldDefinition, FormData, RequestStatusRecord, StepDefinition, SubmissionReceipt,
    TransactionType,
};
use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedReceiver;

pub const SCRIPTED: &str = "scripted";

/// Strategy whose behaviour is configured per test.
#[derive(Default)]
pub struct ScriptedStrategy {
    steps: Vec<StepDefinition>,
    conditional_step: Option<(FieldCondition, usize, StepDefinition)>,
    dependents: IndexMap<String, Vec<String>>,
    selector: Option<String>,
    decision: Mutex<Option<Result<EligibilityDecision, String>>>,
    outcomes: Mutex<IndexMap<usize, Result<StepOutcome, String>>>,
    panic_on_step: Mutex<Option<usize>>,
    focus_outcome: Mutex<FocusLostOutcome>,
    processing_delay: Duration,
    lookup_data: IndexMap<String, Vec<String>>,
    hooks: Mutex<Option<StrategyHooks>>,
    pub processed: Mutex<Vec<(usize, FormData)>>,
    pub opened: Mutex<Vec<(usize, Vec<String>)>>,
    pub eligibility_checks: Mutex<Vec<String>>,
    pub submissions: Mutex<Vec<FormData>>,
}

impl ScriptedStrategy {
    pub fn new(steps: Vec<StepDefinition>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Inserts `step` at `index` whenever `condition` holds.
    pub fn with_conditional_step(mut self, condition: FieldCondition, index: usize, step: StepDefinition) -> Self {
        self.conditional_step = Some((condition, index, step));
        self
    }

    pub fn with_dependents(mut self, field_id: &str, dependents: &[&str]) -> Self {
        self.dependents
            .insert(field_id.to_string(), dependents.iter().map(|field| field.to_string()).collect());
        self
    }

    pub fn with_eligibility(mut self, selector: &str, decision: Result<EligibilityDecision, String>) -> Self {
        self.selector = Some(selector.to_string());
        self.decision = Mutex::new(Some(decision));
        self
    }

    pub fn with_processing_delay(mut self, delay: Duration) -> Self {
        self.processing_delay = delay;
        self
    }

    pub fn with_lookup(mut self, lookup_key: &str, data: &[&str]) -> Self {
        self.lookup_data
            .insert(lookup_key.to_string(), data.iter().map(|item| item.to_string()).collect());
        self
    }

    pub fn set_outcome(&self, step_index: usize, outcome: StepOutcome) {
        self.outcomes.lock().unwrap().insert(step_index, Ok(outcome));
    }

    pub fn fail_step(&self, step_index: usize, message: &str) {
        self.outcomes.lock().unwrap().insert(step_index, Err(message.to_string()));
    }

    pub fn panic_on(&self, step_index: usize) {
        *self.panic_on_step.lock().unwrap() = Some(step_index);
    }

    pub fn set_focus_outcome(&self, outcome: FocusLostOutcome) {
        *self.focus_outcome.lock().unwrap() = outcome;
    }

    pub fn processed_count(&self) -> usize {
        self.processed.lock().unwrap().len()
    }
}

#[async_trait]
impl TransactionStrategy for ScriptedStrategy {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::new(SCRIPTED)
    }

    fn attach(&self, hooks: StrategyHooks) {
        *self.hooks.lock().unwrap() = Some(hooks);
    }

    fn get_steps(&self, accumulated: &FormData) -> Vec<StepDefinition> {
        let mut steps = self.steps.clone();
        if let Some((condition, index, step)) = &self.conditional_step
            && condition.holds(accumulated)
        {
            let index = (*index).min(steps.len());
            steps.insert(index, step.clone());
        }
        steps
    }

    fn dependent_fields(&self, field_id: &str) -> Vec<String> {
        self.dependents.get(field_id).cloned().unwrap_or_default()
    }

    async fn on_field_focus_lost(&self, _field_id: &str, _value: &str) -> Result<FocusLostOutcome, StrategyError> {
        let outcome = self.focus_outcome.lock().unwrap().clone();
        Ok(outcome)
    }

    async fn process_step_data(&self, step_index: usize, step_data: &FormData) -> Result<StepOutcome, StrategyError> {
        self.processed.lock().unwrap().push((step_index, step_data.clone()));
        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }
        let panic_on = *self.panic_on_step.lock().unwrap();
        if panic_on == Some(step_index) {
            panic!("scripted failure on step {}", step_index);
        }
        let outcome = self.outcomes.lock().unwrap().get(&step_index).cloned();
        match outcome {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(message)) => Err(ApiFailure::new(500, message).into()),
            None => Ok(StepOutcome::Advance),
        }
    }

    async fn submit(&self, form_data: &FormData) -> Result<SubmissionReceipt, StrategyError> {
        self.submissions.lock().unwrap().push(form_data.clone());
        Ok(SubmissionReceipt {
            request_id: "REQ-42".into(),
            message: Some("received".into()),
        })
    }

    async fn on_step_opened(&self, step_index: usize, missing_lookups: &[String]) -> Result<(), StrategyError> {
        self.opened.lock().unwrap().push((step_index, missing_lookups.to_vec()));
        let hooks = self.hooks.lock().unwrap().clone();
        let Some(hooks) = hooks else {
            return Ok(());
        };
        for lookup_key in missing_lookups {
            if let Some(data) = self.lookup_data.get(lookup_key).cloned() {
                hooks.track_lookup(lookup_key, async { Ok::<_, ApiFailure>(data) }).await?;
            }
        }
        Ok(())
    }

    fn eligibility(&self) -> Option<&dyn EligibilityCapability> {
        self.selector.as_ref().map(|_| self as &dyn EligibilityCapability)
    }
}

#[async_trait]
impl EligibilityCapability for ScriptedStrategy {
    fn selector_field(&self) -> &str {
        self.selector.as_deref().unwrap_or_default()
    }

    async fn check_eligibility(&self, entity: &str, _form_data: &FormData) -> Result<EligibilityDecision, StrategyError> {
        self.eligibility_checks.lock().unwrap().push(entity.to_string());
        let decision = self.decision.lock().unwrap().clone();
        match decision {
            Some(Ok(decision)) => Ok(decision),
            Some(Err(message)) => Err(ApiFailure::new(503, message).into()),
            None => Ok(EligibilityDecision::ProceedToNextStep { extra_data: FormData::new() }),
        }
    }
}

#[derive(Default)]
pub struct FakeDraftSink {
    pub drafts: Mutex<Vec<DraftRequest>>,
}

#[async_trait]
impl DraftSink for FakeDraftSink {
    async fn save_draft(&self, draft: &DraftRequest) -> Result<String, ApiFailure> {
        let mut drafts = self.drafts.lock().unwrap();
        drafts.push(draft.clone());
        Ok(format!("DRAFT-{}", drafts.len()))
    }
}

pub struct FakeStatusSource {
    pub record: RequestStatusRecord,
}

#[async_trait]
impl RequestStatusSource for FakeStatusSource {
    async fn fetch_status(&self, request_id: &str) -> Result<RequestStatusRecord, ApiFailure> {
        if request_id == self.record.id {
            Ok(self.record.clone())
        } else {
            Err(ApiFailure::new(404, "request not found"))
        }
    }
}

/// Step with one optional text field.
pub fn text_step(title: &str, field_id: &str) -> StepDefinition {
    StepDefinition::new(title).with_field(FieldDefinition::text(field_id, title))
}

/// `count` steps, each holding an optional `field_<index>` text field.
pub fn plain_steps(count: usize) -> Vec<StepDefinition> {
    (0..count)
        .map(|index| text_step(&format!("Step {}", index), &format!("field_{}", index)))
        .collect()
}

pub fn engine_for(strategy: &Arc<ScriptedStrategy>) -> (WorkflowEngine, UnboundedReceiver<EngineEvent>) {
    let shared = strategy.clone();
    let registry = StrategyRegistry::new().with(SCRIPTED, move || shared.clone() as Arc<dyn TransactionStrategy>);
    WorkflowEngine::new(registry)
}

pub fn drain(events: &mut UnboundedReceiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    received
}

pub fn form(pairs: &[(&str, &str)]) -> FormData {
    pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
}
