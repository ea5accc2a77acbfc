//! Saved-progress records exchanged with the backend.
//!
//! A transaction interrupted by a pending compliance check is saved as a draft request. The
//! backend later reports the request's status; verified requests are resumed at the step
//! after the last one the user completed.

use serde::{Deserialize, Serialize};

use crate::form::FormData;
use crate::state::TransactionType;

/// Lifecycle status of a saved request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Verified,
    Rejected,
    InProgress,
    Completed,
}

impl RequestStatus {
    /// Only verified requests may continue where they left off.
    pub fn is_resumable(self) -> bool {
        matches!(self, RequestStatus::Verified)
    }
}

/// Persisted progress needed to rebuild a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeRecord {
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub form_data: FormData,
    /// Index of the last step the user completed before the request was saved.
    pub last_completed_step: usize,
}

/// Response of the request-status lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStatusRecord {
    pub id: String,
    pub status: RequestStatus,
    pub transaction_type: TransactionType,
    #[serde(default)]
    pub form_data: FormData,
    pub last_completed_step: usize,
    #[serde(default)]
    pub rejection_reason: Option<String>,
}

impl RequestStatusRecord {
    /// Extracts the part of the record needed by the resume protocol.
    pub fn resume_record(&self) -> ResumeRecord {
        ResumeRecord {
            transaction_type: self.transaction_type.clone(),
            form_data: self.form_data.clone(),
            last_completed_step: self.last_completed_step,
        }
    }
}

/// Payload of the save-draft call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRequest {
    pub user_id: String,
    pub transaction_type: TransactionType,
    /// Identifier of the real-world entity the draft concerns (for example, a vessel id).
    pub entity: String,
    pub form_data: FormData,
    pub last_completed_step: usize,
    pub status: RequestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_record_deserializes_from_backend_payload() {
        let payload = r#"{
            "id": "REQ-7",
            "status": "VERIFIED",
            "transactionType": "vessel_registration",
            "formData": {"vessel_id": "V-1"},
            "lastCompletedStep": 2
        }"#;

        let record: RequestStatusRecord = serde_json::from_str(payload).expect("deserialize status record");

        assert!(record.status.is_resumable());
        assert_eq!(record.rejection_reason, None);
        let resume = record.resume_record();
        assert_eq!(resume.last_completed_step, 2);
        assert_eq!(resume.form_data.get("vessel_id").map(String::as_str), Some("V-1"));
    }

    #[test]
    fn non_verified_statuses_are_not_resumable() {
        for status in [RequestStatus::Pending, RequestStatus::Rejected, RequestStatus::InProgress, RequestStatus::Completed] {
            assert!(!status.is_resumable());
        }
    }
}
