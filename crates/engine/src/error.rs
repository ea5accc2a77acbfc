//! Error taxonomy for the workflow engine.
//!
//! Strategies and remote collaborators report [`StrategyError`] / [`ApiFailure`]. The engine
//! converts every failure into an [`EngineError`] at its call sites, so nothing raw reaches the
//! UI layer.

use formflow_types::{ComplianceReason, FieldErrors, FormData, RequestStatus};
use thiserror::Error;

/// Form data key carrying the backend error code of a blocked step.
pub const API_ERROR_CODE_KEY: &str = "apiErrorCode";
/// Form data key carrying the backend error message of a blocked step.
pub const API_ERROR_MESSAGE_KEY: &str = "apiErrorMessage";

/// Typed failure returned by the transport collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("HTTP {status_code}: {message}")]
pub struct ApiFailure {
    pub status_code: u16,
    pub message: String,
}

impl ApiFailure {
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    /// Returns true for `401 Unauthorized`.
    pub fn is_unauthorized(&self) -> bool {
        self.status_code == 401
    }
}

/// Failure reported by a transaction strategy.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error(transparent)]
    Api(#[from] ApiFailure),

    #[error("{message}")]
    Rejected { message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StrategyError {
    /// Create a business-rule rejection.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }
}

/// Errors surfaced from the engine's public operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("engine is not initialized")]
    NotInitialized,

    #[error("no strategy registered for transaction type '{transaction_type}'")]
    UnknownTransactionType { transaction_type: String },

    #[error("{} field(s) need attention", errors.len())]
    FieldValidation { errors: FieldErrors },

    #[error("step was rejected: {message}")]
    StepBlocked { message: String, diagnostics: FormData },

    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("session expired: {message}")]
    Unauthorized { message: String },

    #[error("{entity} is not eligible: {}", reason.message)]
    EligibilityRejected { entity: String, reason: ComplianceReason },

    #[error("unexpected error: {message}")]
    Unknown { message: String },

    #[error("navigation to step {target} is not allowed")]
    NavigationDenied { target: usize },

    #[error("submission is only available on the final step")]
    NotTerminalStep,

    #[error("request {request_id} cannot be resumed while {status:?}")]
    NotResumable { request_id: String, status: RequestStatus },

    #[error("a submission is already in progress")]
    SubmissionInFlight,

    #[error("transaction was already submitted as {request_id}")]
    AlreadySubmitted { request_id: String },

    #[error("field '{field_id}' belongs to locked step {step}")]
    LockedField { field_id: String, step: usize },

    #[error("operation was superseded by a newer one")]
    Superseded,
}

impl EngineError {
    /// Create an unknown error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown { message: message.into() }
    }

    /// Create an API error.
    pub fn api(code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            message: message.into(),
        }
    }

    /// Builds the blocked-step error from the diagnostics a strategy returned.
    pub fn step_blocked(diagnostics: FormData) -> Self {
        let message = diagnostics
            .get(API_ERROR_MESSAGE_KEY)
            .cloned()
            .or_else(|| diagnostics.get(API_ERROR_CODE_KEY).map(|code| format!("request failed with code {}", code)))
            .unwrap_or_else(|| "the submitted data was not accepted".to_string());
        Self::StepBlocked { message, diagnostics }
    }

    /// Message suitable for a toast or banner. Backend messages are surfaced verbatim.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Api { message, .. } | EngineError::Unauthorized { message } | EngineError::StepBlocked { message, .. } => {
                message.clone()
            }
            EngineError::EligibilityRejected { reason, .. } => reason.message.clone(),
            other => other.to_string(),
        }
    }

    /// Errors rendered inline (or not at all) rather than as a toast.
    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            EngineError::FieldValidation { .. }
                | EngineError::Superseded
                | EngineError::SubmissionInFlight
                | EngineError::AlreadySubmitted { .. }
                | EngineError::NavigationDenied { .. }
                | EngineError::LockedField { .. }
        )
    }
}

impl From<ApiFailure> for EngineError {
    fn from(failure: ApiFailure) -> Self {
        if failure.is_unauthorized() {
            EngineError::Unauthorized { message: failure.message }
        } else {
            EngineError::Api {
                code: failure.status_code,
                message: failure.message,
            }
        }
    }
}

impl From<StrategyError> for EngineError {
    fn from(error: StrategyError) -> Self {
        match error {
            StrategyError::Api(failure) => failure.into(),
            StrategyError::Rejected { message } => EngineError::StepBlocked {
                message,
                diagnostics: FormData::new(),
            },
            StrategyError::Other(error) => EngineError::unknown(format!("{:#}", error)),
        }
    }
}
