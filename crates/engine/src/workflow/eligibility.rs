//! Eligibility sub-machine: `Idle -> Validating -> {Valid | Invalid | Error}`.
//!
//! Only strategies that declare an [`EligibilityCapability`](crate::EligibilityCapability)
//! take part. The check runs when `next` leaves the step holding the selector field (or
//! when the UI asks for it explicitly), and its decision holds until the selection changes.

use formflow_types::{ComplianceReason, DraftRequest, EligibilityDecision, EligibilityState, RequestStatus};
use tracing::{debug, info, warn};

use super::{
    engine::{Session, WorkflowEngine, call_async},
    events::EngineEvent,
};
use crate::{EngineError, TransactionStrategy};

/// What `next` must do about eligibility before processing the current step.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum EligibilityGate {
    /// The step has no eligibility selector, or nothing is selected yet.
    NotRequired,
    /// A valid decision already holds for the selection, possibly with a route.
    Settled(Option<usize>),
    /// An invalid decision already holds for the selection.
    Rejected { entity: String, reason: ComplianceReason },
    /// The selection has not been checked yet.
    Check(String),
}

impl EligibilityGate {
    pub(super) fn evaluate(session: &Session, strategy: &dyn TransactionStrategy) -> Self {
        let Some(capability) = strategy.eligibility() else {
            return Self::NotRequired;
        };
        let selector = capability.selector_field();
        let on_step = session.state.current().is_some_and(|step| step.contains_field(selector));
        if !on_step {
            return Self::NotRequired;
        }
        let Some(entity) = session.state.value(selector).filter(|value| !value.trim().is_empty()) else {
            return Self::NotRequired;
        };
        match &session.eligibility {
            EligibilityState::Valid { entity: checked, route_to } if checked == entity => Self::Settled(*route_to),
            EligibilityState::Invalid { entity: checked, reason } if checked == entity => Self::Rejected {
                entity: entity.to_string(),
                reason: reason.clone(),
            },
            _ => Self::Check(entity.to_string()),
        }
    }
}

impl WorkflowEngine {
    /// Checks the eligibility of the currently selected entity and returns the resulting state.
    ///
    /// A rejection is a valid outcome here: the state becomes `Invalid` and the compliance
    /// interrupt is emitted, but no error is returned.
    pub async fn check_eligibility(&self) -> Result<EligibilityState, EngineError> {
        let (strategy, generation) = self.active()?;
        let Some(capability) = strategy.eligibility() else {
            return Err(EngineError::unknown(format!(
                "transaction type '{}' does not check eligibility",
                strategy.transaction_type()
            )));
        };
        let entity = self
            .lock()
            .state
            .value(capability.selector_field())
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string);
        let Some(entity) = entity else {
            return Ok(self.eligibility_state());
        };

        match self.run_eligibility(strategy.as_ref(), generation, &entity).await {
            Ok(_) | Err(EngineError::EligibilityRejected { .. }) => Ok(self.eligibility_state()),
            Err(error) => Err(error),
        }
    }

    /// Runs the check for `entity`. Returns the step to route to on a valid decision.
    pub(super) async fn run_eligibility(
        &self,
        strategy: &dyn TransactionStrategy,
        generation: u64,
        entity: &str,
    ) -> Result<Option<usize>, EngineError> {
        let Some(capability) = strategy.eligibility() else {
            return Ok(None);
        };
        let validating = EligibilityState::Validating { entity: entity.to_string() };
        let form_data = {
            let mut session = self.lock();
            if !self.is_current(generation) {
                return Err(EngineError::Superseded);
            }
            session.eligibility = validating.clone();
            session.state.form_data.clone()
        };

        info!(entity, "checking eligibility");
        let result = call_async(capability.check_eligibility(entity, &form_data)).await;

        let (error, draft) = {
            let mut session = self.lock();
            if !self.is_current(generation) || session.eligibility != validating {
                debug!(entity, "discarding eligibility result for a changed selection");
                return Err(EngineError::Superseded);
            }
            match result {
                Ok(EligibilityDecision::ProceedToNextStep { extra_data }) => {
                    session.state.form_data.extend(extra_data);
                    session.eligibility = EligibilityState::Valid {
                        entity: entity.to_string(),
                        route_to: None,
                    };
                    self.settle(&mut session, true);
                    return Ok(None);
                }
                Ok(EligibilityDecision::RouteToConditionalStep { target_index, condition_data }) => {
                    debug!(entity, target_index, "eligibility routes to conditional step");
                    session.state.form_data.extend(condition_data);
                    session.eligibility = EligibilityState::Valid {
                        entity: entity.to_string(),
                        route_to: Some(target_index),
                    };
                    self.settle(&mut session, true);
                    return Ok(Some(target_index));
                }
                Ok(EligibilityDecision::ShowComplianceDetailScreen {
                    entity: flagged,
                    issues,
                    reason,
                }) => {
                    warn!(entity = %flagged, code = ?reason.code, "entity is not eligible");
                    session.eligibility = EligibilityState::Invalid {
                        entity: entity.to_string(),
                        reason: reason.clone(),
                    };
                    session.state.api_error = Some(reason.message.clone());
                    session.refresh();
                    let _ = self.events.send(EngineEvent::ComplianceInterrupt {
                        entity: flagged.clone(),
                        issues,
                        reason: reason.clone(),
                    });
                    let draft = if reason.code.is_pending() {
                        self.draft_request(&session, entity)
                    } else {
                        None
                    };
                    (EngineError::EligibilityRejected { entity: flagged, reason }, draft)
                }
                Err(error) => {
                    session.eligibility = EligibilityState::Error {
                        message: error.user_message(),
                    };
                    self.surface(&mut session, &error);
                    return Err(error);
                }
            }
        };

        if let Some(draft) = draft {
            self.save_draft(draft, generation).await;
        }
        Err(error)
    }

    fn draft_request(&self, session: &Session, entity: &str) -> Option<DraftRequest> {
        let transaction_type = session.state.transaction_type.clone()?;
        Some(DraftRequest {
            user_id: self.user_id.clone(),
            transaction_type,
            entity: entity.to_string(),
            form_data: session.state.form_data.clone(),
            last_completed_step: session.state.current_step,
            status: RequestStatus::Pending,
        })
    }

    async fn save_draft(&self, draft: DraftRequest, generation: u64) {
        let Some(sink) = self.draft_sink.clone() else {
            debug!(entity = %draft.entity, "no draft sink configured; progress not saved");
            return;
        };
        let result = call_async(sink.save_draft(&draft)).await;

        let mut session = self.lock();
        if !self.is_current(generation) {
            return;
        }
        match result {
            Ok(request_id) => {
                info!(request_id = %request_id, entity = %draft.entity, "draft saved");
                let _ = self.events.send(EngineEvent::DraftSaved { request_id });
            }
            Err(error) => {
                warn!(entity = %draft.entity, error = %error, "draft could not be saved");
                self.surface(&mut session, &error);
            }
        }
    }
}
