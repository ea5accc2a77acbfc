use async_trait::async_trait;
use formflow_engine::{
    ApiFailure, DraftSink, RequestStatusSource,
    strategies::{CompanyRecord, RegistryService, StepReceipt, VesselCheck, VesselRegistrationStrategy},
};
use formflow_types::{DraftRequest, FormData, RequestStatusRecord, SubmissionReceipt};
use serde::Deserialize;
use tracing::debug;

use crate::FormflowClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftCreated {
    request_id: String,
}

/// Backend endpoints used by the bundled strategies and by the engine's resume and draft paths.
#[derive(Debug, Clone)]
pub struct HttpRegistryService {
    client: FormflowClient,
}

impl HttpRegistryService {
    pub fn new(client: FormflowClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &FormflowClient {
        &self.client
    }
}

#[async_trait]
impl RegistryService for HttpRegistryService {
    async fn fetch_lookup(&self, lookup_key: &str) -> Result<Vec<String>, ApiFailure> {
        let items: Option<Vec<String>> = self.client.get_json(&["lookups", lookup_key]).await?;
        Ok(items.unwrap_or_default())
    }

    async fn find_company(&self, cr_number: &str) -> Result<Option<CompanyRecord>, ApiFailure> {
        match self.client.get_json(&["companies", cr_number]).await {
            Ok(company) => Ok(company),
            Err(failure) if failure.status_code == 404 => {
                debug!(cr_number, "no company registered");
                Ok(None)
            }
            Err(failure) => Err(failure),
        }
    }

    async fn check_vessel(&self, vessel_id: &str) -> Result<VesselCheck, ApiFailure> {
        self.client.get_json(&["vessels", vessel_id, "check"]).await
    }

    async fn submit_step(&self, step_key: &str, values: &FormData) -> Result<StepReceipt, ApiFailure> {
        self.client
            .post_json(&["transactions", VesselRegistrationStrategy::TRANSACTION_TYPE, "steps", step_key], values)
            .await
    }

    async fn submit_transaction(&self, values: &FormData) -> Result<SubmissionReceipt, ApiFailure> {
        self.client
            .post_json(&["transactions", VesselRegistrationStrategy::TRANSACTION_TYPE], values)
            .await
    }
}

#[async_trait]
impl RequestStatusSource for HttpRegistryService {
    async fn fetch_status(&self, request_id: &str) -> Result<RequestStatusRecord, ApiFailure> {
        self.client.get_json(&["requests", request_id]).await
    }
}

#[async_trait]
impl DraftSink for HttpRegistryService {
    async fn save_draft(&self, draft: &DraftRequest) -> Result<String, ApiFailure> {
        let created: DraftCreated = self.client.post_json(&["requests", "drafts"], draft).await?;
        Ok(created.request_id)
    }
}
