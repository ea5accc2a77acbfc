//! Rebuilding a session from saved progress.
//!
//! The saved values are replayed through the strategy before the step list is rebuilt, so any
//! state the strategy derives from them (for example, which optional steps exist) matches the
//! original session. Every step before the resume position is locked.

use std::collections::BTreeSet;

use formflow_types::ResumeRecord;
use tracing::info;

use super::{
    engine::{WorkflowEngine, call_async},
    events::EngineEvent,
};
use crate::EngineError;

/// Step a resumed session lands on: the one after the last completed step, clamped to the
/// step list.
pub(super) fn resume_position(last_completed_step: usize, step_count: usize) -> usize {
    last_completed_step.saturating_add(1).min(step_count.saturating_sub(1))
}

impl WorkflowEngine {
    /// Rebuilds a session from a saved record and positions it after the last completed step.
    pub async fn resume_from(&self, record: ResumeRecord) -> Result<(), EngineError> {
        self.initialize(record.transaction_type.clone()).await?;
        let (strategy, generation) = self.active()?;
        info!(
            transaction_type = %record.transaction_type,
            last_completed_step = record.last_completed_step,
            "resuming transaction"
        );

        let replay = call_async(strategy.process_step_data(0, &record.form_data)).await;

        let resume_step = {
            let mut session = self.lock();
            if !self.is_current(generation) {
                return Err(EngineError::Superseded);
            }
            if let Err(error) = replay {
                self.surface(&mut session, &error);
                return Err(error);
            }
            session.state.form_data.extend(record.form_data);
            self.settle(&mut session, true);

            let resume_step = resume_position(record.last_completed_step, session.state.steps.len());
            let passed: BTreeSet<usize> = (0..resume_step).collect();
            session.state.completed_steps = passed.clone();
            session.state.locked_steps = passed;
            session.state.is_resumed_transaction = true;
            session.state.current_step = resume_step;
            session.state.field_errors.clear();
            session.refresh();
            resume_step
        };

        info!(resume_step, "transaction resumed");
        self.open_step(resume_step, generation).await;
        Ok(())
    }

    /// Looks up a saved request and resumes it when the backend has verified it.
    ///
    /// Any other status emits [`EngineEvent::ResumeInterrupted`] and leaves the engine
    /// untouched.
    pub async fn resume_request(&self, request_id: &str) -> Result<(), EngineError> {
        let Some(source) = self.status_source.clone() else {
            return Err(EngineError::unknown("no request status source is configured"));
        };
        let record = match call_async(source.fetch_status(request_id)).await {
            Ok(record) => record,
            Err(error) => {
                let mut session = self.lock();
                self.surface(&mut session, &error);
                return Err(error);
            }
        };

        if !record.status.is_resumable() {
            info!(request_id, status = ?record.status, "request cannot be resumed");
            let _ = self.events.send(EngineEvent::ResumeInterrupted {
                request_id: record.id.clone(),
                status: record.status,
                rejection_reason: record.rejection_reason.clone(),
            });
            return Err(EngineError::NotResumable {
                request_id: record.id,
                status: record.status,
            });
        }

        self.resume_from(record.resume_record()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_position_is_clamped() {
        assert_eq!(resume_position(2, 5), 3);
        assert_eq!(resume_position(4, 5), 4);
        assert_eq!(resume_position(9, 5), 4);
        assert_eq!(resume_position(0, 1), 0);
    }
}
