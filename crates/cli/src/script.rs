//! Answer scripts that drive a session without a UI.
//!
//! A script names the transaction type, lists the values to enter on each step in order,
//! and says whether to submit at the end:
//!
//! ```yaml
//! transactionType: vessel_registration
//! answers:
//!   - step: 0
//!     values:
//!       owner_type: company
//!       owner_name: Fatima Al-Sabah
//!   - step: 1
//!     values:
//!       cr_number: "104857"
//!     blur: [cr_number]
//! submit: true
//! ```

use std::{fs, io::Write, path::Path};

use anyhow::{Context, Result, bail};
use formflow_engine::{EngineEvent, Transition, WorkflowEngine};
use formflow_types::TransactionState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionScript {
    /// Omitted when the script continues a resumed request.
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub answers: Vec<StepAnswers>,
    #[serde(default)]
    pub submit: bool,
}

/// Values entered on one step before pressing "Next".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StepAnswers {
    pub step: usize,
    #[serde(default)]
    pub values: IndexMap<String, String>,
    /// Fields that lose focus after their value is entered, in order.
    #[serde(default)]
    pub blur: Vec<String>,
}

impl SessionScript {
    /// Reads a script. `.json` files are parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("read script {}", path.display()))?;
        let is_json = path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content).with_context(|| format!("parse JSON script {}", path.display()))
        } else {
            serde_yaml::from_str(&content).with_context(|| format!("parse YAML script {}", path.display()))
        }
    }
}

/// Compact view of a snapshot printed after every transition.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary<'a> {
    pub current_step: usize,
    pub step_title: Option<&'a str>,
    pub step_count: usize,
    pub completed_steps: Vec<usize>,
    pub locked_steps: Vec<usize>,
    pub can_proceed_to_next: bool,
    pub api_error: Option<&'a str>,
    pub field_errors: &'a IndexMap<String, String>,
}

impl<'a> SnapshotSummary<'a> {
    pub fn of(state: &'a TransactionState) -> Self {
        Self {
            current_step: state.current_step,
            step_title: state.current().map(|step| step.title.as_str()),
            step_count: state.steps.len(),
            completed_steps: state.completed_steps.iter().copied().collect(),
            locked_steps: state.locked_steps.iter().copied().collect(),
            can_proceed_to_next: state.can_proceed_to_next,
            api_error: state.api_error.as_deref(),
            field_errors: &state.field_errors,
        }
    }
}

/// Drives an initialized (or resumed) session through the script's answers.
pub struct ScriptRunner<'a, W: Write> {
    engine: &'a WorkflowEngine,
    events: &'a mut UnboundedReceiver<EngineEvent>,
    out: W,
}

impl<'a, W: Write> ScriptRunner<'a, W> {
    pub fn new(engine: &'a WorkflowEngine, events: &'a mut UnboundedReceiver<EngineEvent>, out: W) -> Self {
        Self { engine, events, out }
    }

    pub async fn run(&mut self, script: &SessionScript) -> Result<()> {
        self.print_snapshot(None)?;
        for answers in &script.answers {
            let current = self.engine.snapshot().current_step;
            if current != answers.step {
                bail!("script expects step {} but the session is on step {}", answers.step, current);
            }
            self.enter(answers).await?;
            let result = self.engine.next().await;
            self.print_events()?;
            match result {
                Ok(transition) => {
                    info!(step = answers.step, transition = ?transition, "step answered");
                    self.print_snapshot(Some(transition))?;
                }
                Err(error) => {
                    self.print_snapshot(None)?;
                    bail!("step {} was not accepted: {}", answers.step, error);
                }
            }
        }

        if script.submit {
            let receipt = self.engine.submit().await;
            self.print_events()?;
            let receipt = receipt.context("submit transaction")?;
            writeln!(self.out, "{}", serde_json::to_string_pretty(&json!({ "submitted": receipt }))?)?;
        }
        Ok(())
    }

    async fn enter(&mut self, answers: &StepAnswers) -> Result<()> {
        for (field_id, value) in &answers.values {
            debug!(field_id = %field_id, "entering value");
            self.engine.on_field_value_change(field_id, value.as_str())?;
        }
        for field_id in &answers.blur {
            let value = self.engine.snapshot().value(field_id).unwrap_or_default().to_string();
            self.engine.on_field_focus_lost(field_id, &value).await?;
        }
        self.print_events()
    }

    pub fn print_snapshot(&mut self, transition: Option<Transition>) -> Result<()> {
        let state = self.engine.snapshot();
        let summary = SnapshotSummary::of(&state);
        let rendered = match transition {
            Some(transition) => json!({ "transition": transition, "state": summary }),
            None => json!({ "state": summary }),
        };
        writeln!(self.out, "{}", serde_json::to_string_pretty(&rendered)?)?;
        Ok(())
    }

    pub fn print_events(&mut self) -> Result<()> {
        while let Ok(event) = self.events.try_recv() {
            writeln!(self.out, "{}", serde_json::to_string(&event)?)?;
        }
        Ok(())
    }
}
