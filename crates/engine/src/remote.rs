//! Remote collaborators used by the engine itself (not by strategies).

use async_trait::async_trait;
use formflow_types::{DraftRequest, RequestStatusRecord};

use crate::ApiFailure;

/// Looks up the backend status of a saved request.
#[async_trait]
pub trait RequestStatusSource: Send + Sync {
    async fn fetch_status(&self, request_id: &str) -> Result<RequestStatusRecord, ApiFailure>;
}

/// Persists partial progress so a session can be resumed later.
#[async_trait]
pub trait DraftSink: Send + Sync {
    /// Saves the draft and returns the opaque request id used to resume it.
    async fn save_draft(&self, draft: &DraftRequest) -> Result<String, ApiFailure>;
}
