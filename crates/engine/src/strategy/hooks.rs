use std::future::Future;

use formflow_types::{LookupEntry, TransactionState};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Reserved form-data key a strategy sets from `handle_field_change` to force a rebuild.
///
/// The engine strips it before storing the returned data.
pub const REBUILD_MARKER: &str = "__rebuild_steps";

/// Notification sent from a strategy to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategySignal {
    StepsNeedRebuild,
    LookupStarted(String),
    LookupCompleted { key: String, data: Vec<String>, success: bool },
}

/// Sending half of the strategy signal channel.
///
/// The engine is the only subscriber. Sends after the engine dropped its receiver (for
/// example, after the session was replaced) are ignored.
#[derive(Debug, Clone)]
pub struct StrategyHooks {
    sender: UnboundedSender<StrategySignal>,
}

impl StrategyHooks {
    pub fn new(sender: UnboundedSender<StrategySignal>) -> Self {
        Self { sender }
    }

    pub fn steps_need_rebuild(&self) {
        let _ = self.sender.send(StrategySignal::StepsNeedRebuild);
    }

    pub fn lookup_started(&self, key: &str) {
        let _ = self.sender.send(StrategySignal::LookupStarted(key.to_string()));
    }

    pub fn lookup_completed(&self, key: &str, data: Vec<String>, success: bool) {
        let _ = self.sender.send(StrategySignal::LookupCompleted {
            key: key.to_string(),
            data,
            success,
        });
    }

    /// Runs a lookup future bracketed by the started/completed signals.
    ///
    /// On failure the lookup completes with empty data and `success = false`, and the error
    /// is returned to the caller unchanged.
    pub async fn track_lookup<F, E>(&self, key: &str, lookup: F) -> Result<Vec<String>, E>
    where
        F: Future<Output = Result<Vec<String>, E>>,
    {
        self.lookup_started(key);
        let result = lookup.await;
        match &result {
            Ok(data) => self.lookup_completed(key, data.clone(), true),
            Err(_) => self.lookup_completed(key, Vec::new(), false),
        }
        result
    }
}

/// Applies one signal to the lookup cache. Returns true when the step list must be rebuilt.
pub fn apply_signal(state: &mut TransactionState, signal: StrategySignal) -> bool {
    match signal {
        StrategySignal::StepsNeedRebuild => true,
        StrategySignal::LookupStarted(key) => {
            debug!(lookup_key = %key, "lookup started");
            let entry = state.lookups.entry(key).or_default();
            entry.loading = true;
            false
        }
        StrategySignal::LookupCompleted { key, data, success } => {
            debug!(lookup_key = %key, success, item_count = data.len(), "lookup completed");
            state.lookups.insert(key, LookupEntry { loading: false, data, success });
            true
        }
    }
}
