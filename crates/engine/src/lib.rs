//! # Formflow Engine
//!
//! Drives multi-step transactions whose shape depends on the data entered so far.
//!
//! ## Architecture
//!
//! - **`strategy`**: the per-transaction-type contract ([`TransactionStrategy`]), its signal
//!   hooks, and the [`StrategyRegistry`] that builds a fresh strategy per session
//! - **`navigation`**: pure rules for advancing, going back, and jumping between steps
//! - **`workflow`**: the [`WorkflowEngine`], which owns the transaction state, applies
//!   validation and navigation, and implements eligibility branching and resume
//! - **`remote`**: request-status and draft collaborators used by the engine
//! - **`strategies`**: bundled strategies, currently vessel registration
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use formflow_engine::{StrategyRegistry, TransactionStrategy, WorkflowEngine};
//! use formflow_engine::strategies::{RegistryService, VesselRegistrationStrategy};
//!
//! # async fn run(service: Arc<dyn RegistryService>) -> Result<(), formflow_engine::EngineError> {
//! let registry = StrategyRegistry::new().with(VesselRegistrationStrategy::TRANSACTION_TYPE, move || {
//!     Arc::new(VesselRegistrationStrategy::new(service.clone())) as Arc<dyn TransactionStrategy>
//! });
//! let (engine, _events) = WorkflowEngine::new(registry);
//! engine.initialize(VesselRegistrationStrategy::TRANSACTION_TYPE).await?;
//! engine.on_field_value_change("owner_type", "individual")?;
//! engine.next().await?;
//! # Ok(())
//! # }
//! ```

mod error;
pub mod navigation;
pub mod remote;
pub mod strategies;
pub mod strategy;
pub mod workflow;

pub use error::{API_ERROR_CODE_KEY, API_ERROR_MESSAGE_KEY, ApiFailure, EngineError, StrategyError};
pub use remote::{DraftSink, RequestStatusSource};
pub use strategy::{
    EligibilityCapability, FocusLostOutcome, REBUILD_MARKER, StepOutcome, StrategyFactory, StrategyHooks, StrategyRegistry, StrategySignal,
    TransactionStrategy,
};
pub use workflow::{EngineEvent, FileAction, Transition, WorkflowEngine};
