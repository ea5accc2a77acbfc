use async_trait::async_trait;
use formflow_types::{ComplianceIssue, FormData, SubmissionReceipt};
use serde::{Deserialize, Serialize};

use crate::ApiFailure;

/// Company found by commercial registration number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyRecord {
    pub cr_number: String,
    pub name: String,
}

/// Backend verdict on one submitted step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepReceipt {
    pub accepted: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StepReceipt {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            ..Self::default()
        }
    }

    pub fn rejected(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            accepted: false,
            error_code: Some(error_code.into()),
            message: Some(message.into()),
        }
    }
}

/// Registry status of a vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VesselStatus {
    Clear,
    InspectionRequired,
    InspectionPending,
    Detained,
    Expired,
}

/// Result of checking a vessel against the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VesselCheck {
    pub vessel_id: String,
    pub status: VesselStatus,
    /// Particulars already on file (name, type, tonnage), keyed by field id.
    #[serde(default)]
    pub particulars: Option<FormData>,
    #[serde(default)]
    pub issues: Vec<ComplianceIssue>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Backend operations used by the vessel registration strategy.
#[async_trait]
pub trait RegistryService: Send + Sync {
    /// Fetches the option list for a lookup key (for example, `ports`).
    async fn fetch_lookup(&self, lookup_key: &str) -> Result<Vec<String>, ApiFailure>;

    async fn find_company(&self, cr_number: &str) -> Result<Option<CompanyRecord>, ApiFailure>;

    async fn check_vessel(&self, vessel_id: &str) -> Result<VesselCheck, ApiFailure>;

    /// Submits the values of one step, identified by a stable step key.
    async fn submit_step(&self, step_key: &str, values: &FormData) -> Result<StepReceipt, ApiFailure>;

    async fn submit_transaction(&self, values: &FormData) -> Result<SubmissionReceipt, ApiFailure>;
}
