//! Shared data model for formflow transactions.
//!
//! - [`form`]: steps, fields, the string-encoded value contract, and the form validator
//! - [`state`]: the transaction snapshot owned by the engine
//! - [`request`]: saved-progress records used to resume a transaction
//! - [`eligibility`]: decisions returned by entity eligibility checks

pub mod eligibility;
pub mod form;
pub mod request;
pub mod state;

pub use eligibility::{ComplianceCode, ComplianceIssue, ComplianceReason, EligibilityDecision, EligibilityState};
pub use form::validation::{StepValidation, validate_field, validate_step, validate_step_on};
pub use form::value::{
    DATE_FORMAT, FieldDecodeError, FieldValue, FileReference, Record, encode_choices, encode_file, encode_records, has_meaningful_value,
};
pub use form::{FieldCondition, FieldDefinition, FieldErrors, FieldKind, FormData, StepDefinition, StepKind, TextField, TextInputKind};
pub use request::{DraftRequest, RequestStatus, RequestStatusRecord, ResumeRecord};
pub use state::{LookupEntry, SubmissionReceipt, SubmitStatus, TransactionState, TransactionType};
