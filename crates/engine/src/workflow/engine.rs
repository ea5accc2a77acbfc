use std::{
    any::Any,
    future::Future,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use formflow_types::{
    EligibilityState, FieldKind, LookupEntry, SubmissionReceipt, SubmitStatus, TransactionState, TransactionType,
};
use futures_util::FutureExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::TryRecvError, unbounded_channel};
use tracing::{debug, info, warn};

use super::{
    eligibility::EligibilityGate,
    events::{EngineEvent, FileAction, Transition},
};
use crate::{
    API_ERROR_CODE_KEY, API_ERROR_MESSAGE_KEY, EngineError, FocusLostOutcome, StepOutcome,
    navigation::{self, NavigationContext},
    remote::{DraftSink, RequestStatusSource},
    strategy::{REBUILD_MARKER, StrategyHooks, StrategyRegistry, StrategySignal, TransactionStrategy, apply_signal},
};

/// Everything that belongs to one transaction session.
#[derive(Default)]
pub(super) struct Session {
    pub(super) state: TransactionState,
    pub(super) strategy: Option<Arc<dyn TransactionStrategy>>,
    signals: Option<UnboundedReceiver<StrategySignal>>,
    pub(super) eligibility: EligibilityState,
}

impl Session {
    fn start(transaction_type: TransactionType, strategy: Arc<dyn TransactionStrategy>, signals: UnboundedReceiver<StrategySignal>) -> Self {
        Self {
            state: TransactionState {
                transaction_type: Some(transaction_type),
                ..TransactionState::default()
            },
            strategy: Some(strategy),
            signals: Some(signals),
            eligibility: EligibilityState::Idle,
        }
    }

    /// Applies pending strategy signals in arrival order. Returns true when a rebuild is due.
    fn drain_signals(&mut self) -> bool {
        let Some(receiver) = self.signals.as_mut() else {
            return false;
        };
        let mut rebuild = false;
        loop {
            match receiver.try_recv() {
                Ok(signal) => rebuild |= apply_signal(&mut self.state, signal),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
        rebuild
    }

    fn rebuild_steps(&mut self) -> Result<(), EngineError> {
        let Some(strategy) = self.strategy.clone() else {
            return Ok(());
        };
        let steps = call_sync(|| strategy.get_steps(&self.state.form_data))?;
        debug!(step_count = steps.len(), "steps rebuilt");
        self.state.steps = steps;
        let step_count = self.state.steps.len();
        if step_count > 0 && self.state.current_step >= step_count {
            self.state.current_step = step_count - 1;
        }
        Ok(())
    }

    pub(super) fn refresh(&mut self) {
        self.state.can_proceed_to_next = navigation::can_proceed(self.state.current(), &self.state.form_data, &self.state.field_errors);
    }

    fn navigation_context(&self) -> NavigationContext<'_> {
        NavigationContext {
            current_step: self.state.current_step,
            step_count: self.state.steps.len(),
            completed_steps: &self.state.completed_steps,
            locked_steps: &self.state.locked_steps,
            is_resumed: self.state.is_resumed_transaction,
        }
    }

    /// Index of the locked step that owns `field_id`, if the session is resumed.
    fn locked_owner(&self, field_id: &str) -> Option<usize> {
        if !self.state.is_resumed_transaction {
            return None;
        }
        self.state
            .locked_steps
            .iter()
            .copied()
            .find(|index| self.state.steps.get(*index).is_some_and(|step| step.contains_field(field_id)))
    }

    fn clear_fields(&mut self, field_ids: &[String]) {
        for field_id in field_ids {
            self.state.form_data.shift_remove(field_id);
            self.state.field_errors.shift_remove(field_id);
        }
    }

    fn clear_diagnostics(&mut self) {
        self.state.form_data.shift_remove(API_ERROR_CODE_KEY);
        self.state.form_data.shift_remove(API_ERROR_MESSAGE_KEY);
        self.state.api_error = None;
    }
}

/// Orchestrates one transaction session at a time.
///
/// The engine is the single owner of [`TransactionState`]. All operations take `&self`; state
/// lives behind a mutex that is never held across a strategy call, so the UI can keep
/// changing fields while a step is being processed. Consumers read clones through
/// [`WorkflowEngine::snapshot`] and receive one-shot commands on the event channel returned
/// by [`WorkflowEngine::new`].
pub struct WorkflowEngine {
    registry: StrategyRegistry,
    pub(super) session: Mutex<Session>,
    next_in_flight: AtomicBool,
    generation: AtomicU64,
    pub(super) events: UnboundedSender<EngineEvent>,
    pub(super) status_source: Option<Arc<dyn RequestStatusSource>>,
    pub(super) draft_sink: Option<Arc<dyn DraftSink>>,
    pub(super) user_id: String,
}

impl WorkflowEngine {
    pub fn new(registry: StrategyRegistry) -> (Self, UnboundedReceiver<EngineEvent>) {
        let (events, receiver) = unbounded_channel();
        let engine = Self {
            registry,
            session: Mutex::new(Session::default()),
            next_in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            events,
            status_source: None,
            draft_sink: None,
            user_id: String::new(),
        };
        (engine, receiver)
    }

    pub fn with_status_source(mut self, source: Arc<dyn RequestStatusSource>) -> Self {
        self.status_source = Some(source);
        self
    }

    pub fn with_draft_sink(mut self, sink: Arc<dyn DraftSink>) -> Self {
        self.draft_sink = Some(sink);
        self
    }

    /// User the engine saves drafts for.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Builds a fresh strategy for `transaction_type`, loads its dynamic options, and builds
    /// the first step list.
    ///
    /// A failed option load is surfaced but does not abort initialization; the affected
    /// lookups stay unloaded and are retried when their step opens.
    pub async fn initialize(&self, transaction_type: impl Into<TransactionType>) -> Result<(), EngineError> {
        let transaction_type = transaction_type.into();
        let strategy = self
            .registry
            .create(&transaction_type)
            .ok_or_else(|| EngineError::UnknownTransactionType {
                transaction_type: transaction_type.to_string(),
            })?;
        let (signal_tx, signal_rx) = unbounded_channel();
        strategy.attach(StrategyHooks::new(signal_tx));

        let generation = {
            let mut session = self.lock();
            *session = Session::start(transaction_type.clone(), strategy.clone(), signal_rx);
            self.generation.fetch_add(1, Ordering::AcqRel) + 1
        };
        info!(transaction_type = %transaction_type, generation, "initializing transaction");

        let options = call_async(strategy.load_dynamic_options()).await;

        {
            let mut session = self.lock();
            if !self.is_current(generation) {
                return Err(EngineError::Superseded);
            }
            session.drain_signals();
            match options {
                Ok(options) => {
                    for (key, data) in options {
                        session.state.lookups.insert(
                            key,
                            LookupEntry {
                                loading: false,
                                data,
                                success: true,
                            },
                        );
                    }
                }
                Err(error) => {
                    warn!(transaction_type = %transaction_type, error = %error, "dynamic options failed to load");
                    self.surface(&mut session, &error);
                }
            }
            if let Err(error) = session.rebuild_steps() {
                self.surface(&mut session, &error);
                return Err(error);
            }
            if session.state.steps.is_empty() {
                let error = EngineError::unknown(format!("transaction type '{}' produced no steps", transaction_type));
                self.surface(&mut session, &error);
                return Err(error);
            }
            session.state.current_step = 0;
            session.refresh();
            debug!(step_count = session.state.steps.len(), "initial steps built");
        }

        self.open_step(0, generation).await;
        Ok(())
    }

    /// Stores a new field value and applies the strategy's same-step effects.
    ///
    /// Clears the field's error immediately. When the strategy marks the field as a
    /// structural selector (non-empty `dependent_fields`) or sets [`REBUILD_MARKER`], the
    /// dependent fields are cleared and the step list is rebuilt.
    ///
    /// On resumed sessions, fields owned by a locked step are read-only.
    pub fn on_field_value_change(&self, field_id: &str, value: impl Into<String>) -> Result<(), EngineError> {
        let value = value.into();
        let mut session = self.lock();
        let strategy = session.strategy.clone().ok_or(EngineError::NotInitialized)?;
        if let Some(step) = session.locked_owner(field_id) {
            debug!(field_id, step, "field belongs to a locked step");
            return Err(EngineError::LockedField {
                field_id: field_id.to_string(),
                step,
            });
        }

        session.state.form_data.insert(field_id.to_string(), value.clone());
        session.state.field_errors.shift_remove(field_id);
        session.clear_diagnostics();

        let dependents = match call_sync(|| strategy.dependent_fields(field_id)) {
            Ok(dependents) => dependents,
            Err(error) => {
                self.surface(&mut session, &error);
                Vec::new()
            }
        };

        let mut rebuild = false;
        match call_sync(|| strategy.handle_field_change(field_id, &value, &session.state.form_data)) {
            Ok(mut updated) => {
                rebuild = updated.shift_remove(REBUILD_MARKER).is_some();
                session.state.form_data = updated;
            }
            Err(error) => self.surface(&mut session, &error),
        }

        if !dependents.is_empty() {
            debug!(field_id, dependents = ?dependents, "clearing dependent fields");
            session.clear_fields(&dependents);
            rebuild = true;
        }

        if let Some(selector) = strategy.eligibility().map(|capability| capability.selector_field().to_string()) {
            let selection_changed = if selector == field_id {
                match &session.eligibility {
                    EligibilityState::Validating { entity } => entity != &value,
                    other => !other.is_settled_for(&value),
                }
            } else {
                dependents.contains(&selector)
            };
            if selection_changed && session.eligibility != EligibilityState::Idle {
                debug!(field_id, "selection changed; eligibility reset");
                session.eligibility = EligibilityState::Idle;
            }
        }

        self.settle(&mut session, rebuild);
        debug!(field_id, rebuild, "field value changed");
        Ok(())
    }

    /// Runs the strategy's on-blur check for `value`.
    ///
    /// The field is flagged as loading meanwhile. Results for a value the user has since
    /// changed are discarded; failures become an error on the field.
    pub async fn on_field_focus_lost(&self, field_id: &str, value: &str) -> Result<(), EngineError> {
        let (strategy, generation) = {
            let mut session = self.lock();
            let strategy = session.strategy.clone().ok_or(EngineError::NotInitialized)?;
            session.state.loading_fields.insert(field_id.to_string());
            (strategy, self.generation.load(Ordering::Acquire))
        };

        let result = call_async(strategy.on_field_focus_lost(field_id, value)).await;

        let mut session = self.lock();
        if !self.is_current(generation) {
            return Err(EngineError::Superseded);
        }
        session.state.loading_fields.remove(field_id);
        if session.state.value(field_id).unwrap_or_default() != value {
            debug!(field_id, "discarding focus-lost result for a stale value");
            session.refresh();
            return Ok(());
        }

        let mut rebuild = false;
        match result {
            Ok(FocusLostOutcome::NoAction) => {}
            Ok(FocusLostOutcome::UpdateFields(values)) => {
                debug!(field_id, updated = values.len(), "focus-lost check updated fields");
                for (key, updated) in values {
                    session.state.field_errors.shift_remove(&key);
                    session.state.form_data.insert(key, updated);
                }
                rebuild = true;
            }
            Ok(FocusLostOutcome::Error { field_id: target, message }) => {
                debug!(field_id = %target, "focus-lost check rejected value");
                session.state.field_errors.insert(target, message);
            }
            Err(error) => {
                warn!(field_id, error = %error, "focus-lost check failed");
                session.state.field_errors.insert(field_id.to_string(), error.user_message());
            }
        }
        self.settle(&mut session, rebuild);
        Ok(())
    }

    /// Validates and processes the current step, then moves forward.
    ///
    /// A call made while another `next` is in flight returns [`Transition::Ignored`]
    /// without touching state.
    pub async fn next(&self) -> Result<Transition, EngineError> {
        if self.next_in_flight.swap(true, Ordering::AcqRel) {
            debug!("next already in flight; ignoring");
            return Ok(Transition::Ignored);
        }
        let _in_flight = InFlight(&self.next_in_flight);
        self.advance().await
    }

    /// Returns true while a `next` call is being processed.
    pub fn is_next_in_flight(&self) -> bool {
        self.next_in_flight.load(Ordering::Acquire)
    }

    async fn advance(&self) -> Result<Transition, EngineError> {
        let (strategy, generation) = self.active()?;
        let (step_index, step_data, gate) = {
            let mut session = self.lock();
            self.settle(&mut session, false);
            self.validate_current(&mut session, strategy.as_ref())?;
            let step_index = session.state.current_step;
            let step_data = session
                .state
                .current()
                .map(|step| step.extract_values(&session.state.form_data))
                .ok_or(EngineError::NotInitialized)?;
            let gate = EligibilityGate::evaluate(&session, strategy.as_ref());
            (step_index, step_data, gate)
        };

        let route = match gate {
            EligibilityGate::NotRequired => None,
            EligibilityGate::Settled(route) => route,
            EligibilityGate::Rejected { entity, reason } => {
                let error = EngineError::EligibilityRejected { entity, reason };
                let mut session = self.lock();
                self.surface(&mut session, &error);
                return Err(error);
            }
            EligibilityGate::Check(entity) => self.run_eligibility(strategy.as_ref(), generation, &entity).await?,
        };

        debug!(step_index, field_count = step_data.len(), "processing step data");
        let outcome = call_async(strategy.process_step_data(step_index, &step_data)).await;

        let transition = {
            let mut session = self.lock();
            if !self.is_current(generation) || session.state.current_step != step_index {
                debug!(step_index, "discarding step result for a superseded session");
                return Err(EngineError::Superseded);
            }
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(step_index, error = %error, "step processing failed");
                    self.surface(&mut session, &error);
                    self.settle(&mut session, false);
                    return Err(error);
                }
            };
            self.settle(&mut session, true);

            let target = match outcome {
                StepOutcome::Block { diagnostics } => {
                    info!(step_index, "step blocked");
                    session.state.form_data.extend(diagnostics.clone());
                    let error = EngineError::step_blocked(diagnostics);
                    self.surface(&mut session, &error);
                    session.refresh();
                    return Err(error);
                }
                StepOutcome::Reroute(target) => Some(target),
                StepOutcome::Advance => route.or_else(|| navigation::next_index(step_index, session.state.steps.len())),
            };
            self.complete_step(&mut session, step_index, target)?
        };

        if let Some(target) = transition.target() {
            self.open_step(target, generation).await;
        }
        Ok(transition)
    }

    fn validate_current(&self, session: &mut Session, strategy: &dyn TransactionStrategy) -> Result<(), EngineError> {
        let step_index = session.state.current_step;
        if session.state.current().is_none() {
            return Err(EngineError::NotInitialized);
        }
        let validation = match call_sync(|| strategy.validate_step(step_index, &session.state.form_data)) {
            Ok(validation) => validation,
            Err(error) => {
                self.surface(session, &error);
                return Err(error);
            }
        };
        if validation.is_valid {
            return Ok(());
        }
        debug!(step_index, error_count = validation.field_errors.len(), "step validation failed");
        session.state.field_errors.extend(validation.field_errors.clone());
        session.refresh();
        Err(EngineError::FieldValidation {
            errors: validation.field_errors,
        })
    }

    fn complete_step(&self, session: &mut Session, from: usize, target: Option<usize>) -> Result<Transition, EngineError> {
        let Some(to) = target else {
            session.state.completed_steps.insert(from);
            session.clear_diagnostics();
            session.refresh();
            info!(step_index = from, "final step completed");
            return Ok(Transition::Finished { step: from });
        };

        if !navigation::is_valid_reroute(to, session.state.steps.len()) || to == from || session.state.locked_steps.contains(&to) {
            let error = EngineError::unknown(format!("step {} is not a valid destination from step {}", to, from));
            self.surface(session, &error);
            session.refresh();
            return Err(error);
        }

        session.state.completed_steps.insert(from);
        session.clear_diagnostics();
        session.state.current_step = to;
        session.refresh();
        info!(from, to, "step transition");
        if to == from + 1 {
            Ok(Transition::Advanced { from, to })
        } else {
            Ok(Transition::Rerouted { from, to })
        }
    }

    /// Moves back one step. On resumed sessions, locked steps are never re-entered.
    pub async fn previous(&self) -> Result<Transition, EngineError> {
        let (from, to, generation) = {
            let mut session = self.lock();
            let strategy = session.strategy.clone().ok_or(EngineError::NotInitialized)?;
            let from = session.state.current_step;
            if from == 0 {
                return Ok(Transition::Ignored);
            }
            let Some(to) = navigation::previous_index(from, &session.state.locked_steps, session.state.is_resumed_transaction) else {
                debug!(from, "previous step is locked");
                return Err(EngineError::NavigationDenied { target: from - 1 });
            };
            let rebuild = self.leave_step(&mut session, strategy.as_ref(), from);
            session.state.current_step = to;
            self.settle(&mut session, rebuild);
            (from, to, self.generation.load(Ordering::Acquire))
        };
        debug!(from, to, "moved back");
        self.open_step(to, generation).await;
        Ok(Transition::Returned { from, to })
    }

    /// Jumps straight to `target`: backwards freely, forwards only onto completed steps,
    /// never into a locked step.
    pub async fn go_to_step(&self, target: usize) -> Result<Transition, EngineError> {
        let (transition, generation) = {
            let mut session = self.lock();
            let strategy = session.strategy.clone().ok_or(EngineError::NotInitialized)?;
            if !navigation::can_jump_to(target, session.navigation_context()) {
                debug!(target, "jump denied");
                return Err(EngineError::NavigationDenied { target });
            }
            let from = session.state.current_step;
            if target == from {
                return Ok(Transition::Ignored);
            }
            let rebuild = target < from && self.leave_step(&mut session, strategy.as_ref(), from);
            session.state.current_step = target;
            self.settle(&mut session, rebuild);
            let transition = if target < from {
                Transition::Returned { from, to: target }
            } else {
                Transition::Advanced { from, to: target }
            };
            (transition, self.generation.load(Ordering::Acquire))
        };
        self.open_step(target, generation).await;
        Ok(transition)
    }

    /// Clears the fields the strategy invalidates when the user backs out of `step_index`.
    /// Returns true when anything was cleared.
    fn leave_step(&self, session: &mut Session, strategy: &dyn TransactionStrategy, step_index: usize) -> bool {
        let Some(step) = session.state.steps.get(step_index).cloned() else {
            return false;
        };
        let cleared = match call_sync(|| strategy.on_step_left(step_index, &step)) {
            Ok(cleared) => cleared,
            Err(error) => {
                self.surface(session, &error);
                return false;
            }
        };
        if cleared.is_empty() {
            return false;
        }
        debug!(step_index, cleared = ?cleared, "clearing fields on step exit");
        session.clear_fields(&cleared);
        let selector_cleared = strategy
            .eligibility()
            .is_some_and(|capability| cleared.iter().any(|field| field == capability.selector_field()));
        if selector_cleared {
            session.eligibility = EligibilityState::Idle;
        }
        true
    }

    /// Submits the whole transaction. Only available on the terminal step.
    pub async fn submit(&self) -> Result<SubmissionReceipt, EngineError> {
        let (strategy, generation, form_data) = {
            let mut session = self.lock();
            let strategy = session.strategy.clone().ok_or(EngineError::NotInitialized)?;
            if !session.state.is_terminal_step() {
                return Err(EngineError::NotTerminalStep);
            }
            match &session.state.submit_status {
                SubmitStatus::Loading => return Err(EngineError::SubmissionInFlight),
                SubmitStatus::Success { receipt } => {
                    debug!(request_id = %receipt.request_id, "transaction already submitted");
                    return Err(EngineError::AlreadySubmitted {
                        request_id: receipt.request_id.clone(),
                    });
                }
                SubmitStatus::Empty | SubmitStatus::Failure { .. } => {}
            }
            self.validate_current(&mut session, strategy.as_ref())?;
            session.state.submit_status = SubmitStatus::Loading;
            session.state.api_error = None;
            (strategy, self.generation.load(Ordering::Acquire), session.state.form_data.clone())
        };

        info!(transaction_type = %strategy.transaction_type(), "submitting transaction");
        let result = call_async(strategy.submit(&form_data)).await;

        let mut session = self.lock();
        if !self.is_current(generation) {
            return Err(EngineError::Superseded);
        }
        match result {
            Ok(receipt) => {
                info!(request_id = %receipt.request_id, "transaction submitted");
                let current = session.state.current_step;
                session.state.completed_steps.insert(current);
                session.state.submit_status = SubmitStatus::Success { receipt: receipt.clone() };
                Ok(receipt)
            }
            Err(error) => {
                warn!(error = %error, "submission failed");
                session.state.submit_status = SubmitStatus::Failure {
                    message: error.user_message(),
                };
                self.surface(&mut session, &error);
                Err(error)
            }
        }
    }

    /// Asks the UI to pick, view, or remove the file of a file-upload field on the current
    /// step. Removing also clears the stored value.
    pub fn request_file_action(&self, field_id: &str, action: FileAction) -> Result<(), EngineError> {
        let mut session = self.lock();
        if session.strategy.is_none() {
            return Err(EngineError::NotInitialized);
        }
        let is_file_field = session
            .state
            .current()
            .and_then(|step| step.field(field_id))
            .is_some_and(|field| matches!(field.kind, FieldKind::FileUpload { .. }));
        if !is_file_field {
            return Err(EngineError::unknown(format!("'{}' is not a file field on the current step", field_id)));
        }
        if action == FileAction::Remove {
            session.clear_fields(&[field_id.to_string()]);
            self.settle(&mut session, false);
        }
        let _ = self.events.send(EngineEvent::FileNavigation {
            field_id: field_id.to_string(),
            action,
        });
        Ok(())
    }

    /// Discards the session. Results of strategy calls still in flight are dropped when they
    /// complete.
    pub fn clear_for_new_transaction(&self) {
        let mut session = self.lock();
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *session = Session::default();
        info!(generation, "session cleared");
    }

    /// Returns a copy of the current state after applying pending strategy signals.
    pub fn snapshot(&self) -> TransactionState {
        let mut session = self.lock();
        self.settle(&mut session, false);
        session.state.clone()
    }

    pub fn eligibility_state(&self) -> EligibilityState {
        self.lock().eligibility.clone()
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// Returns the active strategy together with the session generation it belongs to.
    pub(super) fn active(&self) -> Result<(Arc<dyn TransactionStrategy>, u64), EngineError> {
        let session = self.lock();
        let strategy = session.strategy.clone().ok_or(EngineError::NotInitialized)?;
        Ok((strategy, self.generation.load(Ordering::Acquire)))
    }

    /// Records `error` as the visible API error and emits a toast. Inline errors are left to
    /// the caller.
    pub(super) fn surface(&self, session: &mut Session, error: &EngineError) {
        if error.is_inline() {
            return;
        }
        let message = error.user_message();
        session.state.api_error = Some(message.clone());
        let _ = self.events.send(EngineEvent::Toast { message });
    }

    /// Applies pending strategy signals, rebuilds the steps when needed, and recomputes
    /// derived flags.
    pub(super) fn settle(&self, session: &mut Session, force_rebuild: bool) {
        let rebuild = session.drain_signals() || force_rebuild;
        if rebuild && let Err(error) = session.rebuild_steps() {
            self.surface(session, &error);
        }
        session.refresh();
    }

    /// Runs the strategy's step-opened hook with the step's lookups that are not loaded yet.
    /// Failures are surfaced and never block navigation.
    pub(super) async fn open_step(&self, step_index: usize, generation: u64) {
        let (strategy, missing) = {
            let session = self.lock();
            if !self.is_current(generation) {
                return;
            }
            let Some(strategy) = session.strategy.clone() else {
                return;
            };
            let Some(step) = session.state.steps.get(step_index) else {
                return;
            };
            let missing: Vec<String> = step
                .required_lookups
                .iter()
                .filter(|key| {
                    !session
                        .state
                        .lookups
                        .get(key.as_str())
                        .is_some_and(|entry| entry.loading || entry.is_loaded())
                })
                .cloned()
                .collect();
            (strategy, missing)
        };

        debug!(step_index, missing_lookups = ?missing, "step opened");
        let result = call_async(strategy.on_step_opened(step_index, &missing)).await;

        let mut session = self.lock();
        if !self.is_current(generation) {
            return;
        }
        if let Err(error) = &result {
            warn!(step_index, error = %error, "step-opened hook failed");
            self.surface(&mut session, error);
        }
        self.settle(&mut session, false);
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Awaits a strategy or collaborator future, converting its error and any panic into an
/// [`EngineError`].
pub(super) async fn call_async<T, E, F>(future: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<EngineError>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result.map_err(Into::into),
        Err(payload) => Err(EngineError::unknown(panic_message(payload.as_ref()))),
    }
}

fn call_sync<T>(call: impl FnOnce() -> T) -> Result<T, EngineError> {
    panic::catch_unwind(AssertUnwindSafe(call)).map_err(|payload| EngineError::unknown(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("strategy panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("strategy panicked: {}", message)
    } else {
        "strategy panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_unknown_errors() {
        let error = call_sync(|| -> usize { panic!("bad index") }).expect_err("panic is caught");
        assert_eq!(error, EngineError::unknown("strategy panicked: bad index"));
    }

    #[tokio::test]
    async fn async_errors_are_converted() {
        let result: Result<(), EngineError> = call_async(async { Err(crate::ApiFailure::new(401, "expired")) }).await;
        assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let (engine, _events) = WorkflowEngine::new(StrategyRegistry::new());
        assert_eq!(engine.next().await, Err(EngineError::NotInitialized));
        assert_eq!(engine.on_field_value_change("name", "x"), Err(EngineError::NotInitialized));
        assert!(matches!(
            engine.initialize("missing").await,
            Err(EngineError::UnknownTransactionType { .. })
        ));
        assert!(!engine.snapshot().is_initialized());
    }
}
