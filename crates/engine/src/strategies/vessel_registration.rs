//! Registration of a vessel under an individual or company owner.
//!
//! Step shape depends on the data entered so far: company owners get a commercial
//! registration step, and vessels flagged for inspection get an inspection step. Vessels with
//! particulars already on file skip the details step through an eligibility reroute.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use formflow_types::{
    ComplianceCode, ComplianceReason, EligibilityDecision, FieldCondition, FieldDefinition, FieldKind, FormData, StepDefinition, StepKind,
    SubmissionReceipt, TextInputKind, TransactionType,
};
use indexmap::IndexMap;
use tracing::{debug, warn};

use super::service::{RegistryService, VesselCheck, VesselStatus};
use crate::{
    API_ERROR_CODE_KEY, API_ERROR_MESSAGE_KEY, EligibilityCapability, FocusLostOutcome, REBUILD_MARKER, StepOutcome, StrategyError,
    StrategyHooks, TransactionStrategy,
};

/// Field identifiers used by the vessel registration steps.
pub mod fields {
    pub const OWNER_TYPE: &str = "owner_type";
    pub const OWNER_NAME: &str = "owner_name";
    pub const CIVIL_ID: &str = "civil_id";
    pub const EMAIL: &str = "email";
    pub const PHONE: &str = "phone";
    pub const CR_NUMBER: &str = "cr_number";
    pub const COMPANY_NAME: &str = "company_name";
    pub const VESSEL_ID: &str = "vessel_id";
    pub const INSPECTION_REQUIRED: &str = "inspection_required";
    pub const VESSEL_NAME: &str = "vessel_name";
    pub const VESSEL_TYPE: &str = "vessel_type";
    pub const PORT_OF_REGISTRY: &str = "port_of_registry";
    pub const GROSS_TONNAGE: &str = "gross_tonnage";
    pub const BUILD_DATE: &str = "build_date";
    pub const INSPECTION_DATE: &str = "inspection_date";
    pub const INSPECTION_PORT: &str = "inspection_port";
    pub const ENGINES: &str = "engines";
    pub const OWNERSHIP_PROOF: &str = "ownership_proof";
    pub const SURVEY_CERTIFICATE: &str = "survey_certificate";
    pub const REGISTRATION_FEE: &str = "registration_fee";
}

use fields::*;

pub const PORTS_LOOKUP: &str = "ports";
pub const VESSEL_TYPES_LOOKUP: &str = "vessel_types";
pub const OWNER_INDIVIDUAL: &str = "individual";
pub const OWNER_COMPANY: &str = "company";

const BASE_FEE: f64 = 50.0;
const FEE_PER_TON: f64 = 2.0;
const CURRENCY: &str = "KWD";
const DOCUMENT_TYPES: [&str; 3] = ["application/pdf", "image/jpeg", "image/png"];
const MAX_DOCUMENT_MB: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VesselStep {
    Owner,
    CommercialRegistration,
    VesselSelection,
    VesselDetails,
    Inspection,
    Engines,
    Documents,
    Payment,
    Review,
}

impl VesselStep {
    /// Key sent to the backend with the step's values.
    fn key(self) -> &'static str {
        match self {
            VesselStep::Owner => "owner",
            VesselStep::CommercialRegistration => "commercial_registration",
            VesselStep::VesselSelection => "vessel_selection",
            VesselStep::VesselDetails => "vessel_details",
            VesselStep::Inspection => "inspection",
            VesselStep::Engines => "engines",
            VesselStep::Documents => "documents",
            VesselStep::Payment => "payment",
            VesselStep::Review => "review",
        }
    }

    fn is_submitted(self) -> bool {
        !matches!(self, VesselStep::VesselSelection | VesselStep::Payment | VesselStep::Review)
    }
}

fn holds(view: &FormData, field_id: &str, expected: &str) -> bool {
    view.get(field_id).is_some_and(|value| value == expected)
}

fn layout(view: &FormData) -> Vec<VesselStep> {
    let mut steps = vec![VesselStep::Owner];
    if holds(view, OWNER_TYPE, OWNER_COMPANY) {
        steps.push(VesselStep::CommercialRegistration);
    }
    steps.extend([VesselStep::VesselSelection, VesselStep::VesselDetails]);
    if holds(view, INSPECTION_REQUIRED, "true") {
        steps.push(VesselStep::Inspection);
    }
    steps.extend([VesselStep::Engines, VesselStep::Documents, VesselStep::Payment, VesselStep::Review]);
    steps
}

/// Registration fee for the declared gross tonnage, formatted with three decimals.
pub fn registration_fee(gross_tonnage: Option<&str>) -> String {
    let tonnage = gross_tonnage
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|tons| tons.is_finite() && *tons > 0.0)
        .unwrap_or(0.0);
    format!("{:.3}", BASE_FEE + FEE_PER_TON * tonnage)
}

fn date_field(id: &str, label: &str, allow_past: bool, allow_future: bool) -> FieldDefinition {
    let mut field = FieldDefinition::date(id, label);
    field.kind = FieldKind::DatePicker { allow_past, allow_future };
    field
}

fn document_field(id: &str, label: &str) -> FieldDefinition {
    FieldDefinition::file_upload(id, label, DOCUMENT_TYPES.iter().map(|kind| kind.to_string()).collect(), MAX_DOCUMENT_MB)
}

fn compliance_code(status: VesselStatus) -> ComplianceCode {
    match status {
        VesselStatus::InspectionPending => ComplianceCode::InspectionPending,
        VesselStatus::Detained => ComplianceCode::Detained,
        VesselStatus::Expired => ComplianceCode::Expired,
        VesselStatus::Clear | VesselStatus::InspectionRequired => ComplianceCode::Other,
    }
}

fn default_compliance_message(status: VesselStatus) -> &'static str {
    match status {
        VesselStatus::InspectionPending => "The vessel is awaiting an inspection result",
        VesselStatus::Detained => "The vessel is currently detained",
        VesselStatus::Expired => "The vessel's previous registration has expired",
        VesselStatus::Clear | VesselStatus::InspectionRequired => "The vessel cannot be registered",
    }
}

#[derive(Debug, Default)]
struct Accumulated {
    /// Values of every step processed so far.
    submitted: FormData,
    /// Option lists loaded from the registry.
    lookups: IndexMap<String, Vec<String>>,
}

/// Strategy for the `vessel_registration` transaction type.
pub struct VesselRegistrationStrategy {
    service: Arc<dyn RegistryService>,
    accumulated: Mutex<Accumulated>,
    hooks: Mutex<Option<StrategyHooks>>,
}

impl VesselRegistrationStrategy {
    pub const TRANSACTION_TYPE: &'static str = "vessel_registration";

    pub fn new(service: Arc<dyn RegistryService>) -> Self {
        Self {
            service,
            accumulated: Mutex::new(Accumulated::default()),
            hooks: Mutex::new(None),
        }
    }

    fn accumulated(&self) -> MutexGuard<'_, Accumulated> {
        self.accumulated.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks(&self) -> Option<StrategyHooks> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Processed values overlaid with the live form values.
    fn view(&self, live: &FormData) -> FormData {
        let mut view = self.accumulated().submitted.clone();
        view.extend(live.iter().map(|(key, value)| (key.clone(), value.clone())));
        view
    }

    fn forget(&self, field_ids: &[String]) {
        let mut accumulated = self.accumulated();
        for field_id in field_ids {
            accumulated.submitted.shift_remove(field_id);
        }
    }

    async fn load_lookup(&self, lookup_key: &str) -> Result<Vec<String>, StrategyError> {
        let fetch = self.service.fetch_lookup(lookup_key);
        let data = match self.hooks() {
            Some(hooks) => hooks.track_lookup(lookup_key, fetch).await?,
            None => fetch.await?,
        };
        debug!(lookup_key, item_count = data.len(), "lookup loaded");
        self.accumulated().lookups.insert(lookup_key.to_string(), data.clone());
        Ok(data)
    }

    fn build_step(step: VesselStep, view: &FormData, lookups: &IndexMap<String, Vec<String>>) -> StepDefinition {
        let options = |lookup_key: &str| lookups.get(lookup_key).cloned().unwrap_or_default();
        match step {
            VesselStep::Owner => StepDefinition::new("Owner details")
                .with_description("Who the vessel will be registered to")
                .with_field(
                    FieldDefinition::radio_group(OWNER_TYPE, "Owner type", vec![OWNER_INDIVIDUAL.to_string(), OWNER_COMPANY.to_string()])
                        .mandatory(),
                )
                .with_field(FieldDefinition::text(OWNER_NAME, "Full name").mandatory())
                .with_field(
                    FieldDefinition::text_of(CIVIL_ID, "Civil ID", TextInputKind::Numeric)
                        .mandatory_when(FieldCondition::new(OWNER_TYPE, OWNER_INDIVIDUAL)),
                )
                .with_field(FieldDefinition::text_of(EMAIL, "Email", TextInputKind::Email))
                .with_field(FieldDefinition::text_of(PHONE, "Mobile number", TextInputKind::Phone).mandatory()),
            VesselStep::CommercialRegistration => StepDefinition::new("Commercial registration")
                .with_description("The company registering the vessel")
                .with_field(
                    FieldDefinition::text_of(CR_NUMBER, "Commercial registration number", TextInputKind::Numeric)
                        .mandatory()
                        .with_placeholder("e.g. 104857"),
                )
                .with_field(FieldDefinition::text(COMPANY_NAME, "Company name").mandatory()),
            VesselStep::VesselSelection => StepDefinition::new("Select vessel")
                .with_kind(StepKind::EntitySelection)
                .with_field(
                    FieldDefinition::text(VESSEL_ID, "Vessel number")
                        .mandatory()
                        .with_placeholder("e.g. KW-1234"),
                ),
            VesselStep::VesselDetails => StepDefinition::new("Vessel details")
                .with_lookup(PORTS_LOOKUP)
                .with_field(FieldDefinition::text(VESSEL_NAME, "Vessel name").mandatory())
                .with_field(
                    FieldDefinition::lookup_drop_down(VESSEL_TYPE, "Vessel type", VESSEL_TYPES_LOOKUP, options(VESSEL_TYPES_LOOKUP)).mandatory(),
                )
                .with_field(FieldDefinition::lookup_drop_down(PORT_OF_REGISTRY, "Port of registry", PORTS_LOOKUP, options(PORTS_LOOKUP)).mandatory())
                .with_field(FieldDefinition::text_of(GROSS_TONNAGE, "Gross tonnage", TextInputKind::Decimal).mandatory())
                .with_field(date_field(BUILD_DATE, "Build date", true, false)),
            VesselStep::Inspection => StepDefinition::new("Inspection appointment")
                .with_description("The vessel must be inspected before registration")
                .with_lookup(PORTS_LOOKUP)
                .with_field(date_field(INSPECTION_DATE, "Inspection date", false, true).mandatory())
                .with_field(FieldDefinition::lookup_drop_down(INSPECTION_PORT, "Inspection port", PORTS_LOOKUP, options(PORTS_LOOKUP)).mandatory()),
            VesselStep::Engines => StepDefinition::new("Engines").with_field(
                FieldDefinition::record_list(
                    ENGINES,
                    "Engines",
                    vec![
                        FieldDefinition::text("serial_number", "Serial number").mandatory(),
                        FieldDefinition::text("manufacturer", "Manufacturer"),
                        FieldDefinition::text_of("power_kw", "Power (kW)", TextInputKind::Numeric).mandatory(),
                    ],
                    1,
                )
                .mandatory(),
            ),
            VesselStep::Documents => StepDefinition::new("Documents")
                .with_kind(StepKind::Documents)
                .with_field(document_field(OWNERSHIP_PROOF, "Proof of ownership").mandatory())
                .with_field(document_field(SURVEY_CERTIFICATE, "Survey certificate")),
            VesselStep::Payment => StepDefinition::new("Payment").with_kind(StepKind::Payment).with_field(FieldDefinition::line_item(
                REGISTRATION_FEE,
                "Registration fee",
                registration_fee(view.get(GROSS_TONNAGE).map(String::as_str)),
                CURRENCY,
            )),
            VesselStep::Review => StepDefinition::new("Review and submit").with_kind(StepKind::Review),
        }
    }

    fn map_check(&self, check: VesselCheck, form_data: &FormData) -> EligibilityDecision {
        match check.status {
            VesselStatus::InspectionPending | VesselStatus::Detained | VesselStatus::Expired => {
                EligibilityDecision::ShowComplianceDetailScreen {
                    reason: ComplianceReason {
                        code: compliance_code(check.status),
                        message: check
                            .message
                            .unwrap_or_else(|| default_compliance_message(check.status).to_string()),
                    },
                    entity: check.vessel_id,
                    issues: check.issues,
                }
            }
            VesselStatus::Clear | VesselStatus::InspectionRequired => {
                let mut condition = check.particulars.clone().unwrap_or_default();
                let inspection_required = (check.status == VesselStatus::InspectionRequired).to_string();
                condition.insert(INSPECTION_REQUIRED.to_string(), inspection_required.clone());
                // No step owns the flag, so record it here for process_step_data's layout.
                self.accumulated()
                    .submitted
                    .insert(INSPECTION_REQUIRED.to_string(), inspection_required);
                if check.particulars.is_some() {
                    let mut view = self.view(form_data);
                    view.extend(condition.clone());
                    if let Some(details) = layout(&view).iter().position(|step| *step == VesselStep::VesselDetails) {
                        return EligibilityDecision::RouteToConditionalStep {
                            target_index: details + 1,
                            condition_data: condition,
                        };
                    }
                }
                EligibilityDecision::ProceedToNextStep { extra_data: condition }
            }
        }
    }
}

#[async_trait]
impl TransactionStrategy for VesselRegistrationStrategy {
    fn transaction_type(&self) -> TransactionType {
        TransactionType::new(Self::TRANSACTION_TYPE)
    }

    fn attach(&self, hooks: StrategyHooks) {
        *self.hooks.lock().unwrap_or_else(PoisonError::into_inner) = Some(hooks);
    }

    fn get_steps(&self, accumulated: &FormData) -> Vec<StepDefinition> {
        let view = self.view(accumulated);
        let lookups = self.accumulated().lookups.clone();
        layout(&view)
            .into_iter()
            .map(|step| Self::build_step(step, &view, &lookups))
            .collect()
    }

    async fn load_dynamic_options(&self) -> Result<IndexMap<String, Vec<String>>, StrategyError> {
        let vessel_types = self.load_lookup(VESSEL_TYPES_LOOKUP).await?;
        Ok(IndexMap::from([(VESSEL_TYPES_LOOKUP.to_string(), vessel_types)]))
    }

    fn handle_field_change(&self, field_id: &str, _new_value: &str, form_data: &FormData) -> FormData {
        let dependents = self.dependent_fields(field_id);
        if !dependents.is_empty() {
            self.forget(&dependents);
        }
        let mut updated = form_data.clone();
        if field_id == GROSS_TONNAGE {
            updated.insert(REBUILD_MARKER.to_string(), "true".to_string());
        }
        updated
    }

    fn dependent_fields(&self, field_id: &str) -> Vec<String> {
        let dependents: &[&str] = match field_id {
            OWNER_TYPE => &[CIVIL_ID, CR_NUMBER, COMPANY_NAME],
            VESSEL_ID => &[INSPECTION_REQUIRED],
            _ => &[],
        };
        dependents.iter().map(|field| field.to_string()).collect()
    }

    async fn on_field_focus_lost(&self, field_id: &str, value: &str) -> Result<FocusLostOutcome, StrategyError> {
        if field_id != CR_NUMBER || value.trim().is_empty() {
            return Ok(FocusLostOutcome::NoAction);
        }
        match self.service.find_company(value.trim()).await? {
            Some(company) => Ok(FocusLostOutcome::UpdateFields(FormData::from([(COMPANY_NAME.to_string(), company.name)]))),
            None => Ok(FocusLostOutcome::Error {
                field_id: CR_NUMBER.to_string(),
                message: "No company is registered under this number".to_string(),
            }),
        }
    }

    async fn process_step_data(&self, step_index: usize, step_data: &FormData) -> Result<StepOutcome, StrategyError> {
        let view = {
            let mut accumulated = self.accumulated();
            accumulated
                .submitted
                .extend(step_data.iter().map(|(key, value)| (key.clone(), value.clone())));
            accumulated.submitted.clone()
        };
        let Some(step) = layout(&view).get(step_index).copied() else {
            return Err(StrategyError::rejected(format!("vessel registration has no step {}", step_index)));
        };
        if !step.is_submitted() {
            return Ok(StepOutcome::Advance);
        }

        let receipt = self.service.submit_step(step.key(), step_data).await?;
        if receipt.accepted {
            debug!(step = step.key(), "step accepted");
            return Ok(StepOutcome::Advance);
        }
        warn!(step = step.key(), error_code = ?receipt.error_code, "step rejected by registry");
        let mut diagnostics = FormData::new();
        if let Some(code) = receipt.error_code {
            diagnostics.insert(API_ERROR_CODE_KEY.to_string(), code);
        }
        if let Some(message) = receipt.message {
            diagnostics.insert(API_ERROR_MESSAGE_KEY.to_string(), message);
        }
        Ok(StepOutcome::Block { diagnostics })
    }

    async fn submit(&self, form_data: &FormData) -> Result<SubmissionReceipt, StrategyError> {
        let values = self.view(form_data);
        Ok(self.service.submit_transaction(&values).await?)
    }

    async fn on_step_opened(&self, step_index: usize, missing_lookups: &[String]) -> Result<(), StrategyError> {
        let mut first_error = None;
        for lookup_key in missing_lookups {
            if let Err(error) = self.load_lookup(lookup_key).await {
                warn!(step_index, lookup_key = %lookup_key, error = %error, "lookup failed");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn on_step_left(&self, _step_index: usize, step: &StepDefinition) -> Vec<String> {
        if !step.contains_field(VESSEL_ID) {
            return Vec::new();
        }
        let cleared = vec![VESSEL_ID.to_string(), INSPECTION_REQUIRED.to_string()];
        self.forget(&cleared);
        cleared
    }

    fn eligibility(&self) -> Option<&dyn EligibilityCapability> {
        Some(self)
    }
}

#[async_trait]
impl EligibilityCapability for VesselRegistrationStrategy {
    fn selector_field(&self) -> &str {
        VESSEL_ID
    }

    async fn check_eligibility(&self, entity: &str, form_data: &FormData) -> Result<EligibilityDecision, StrategyError> {
        let check = self.service.check_vessel(entity).await?;
        debug!(entity, status = ?check.status, "vessel checked");
        Ok(self.map_check(check, form_data))
    }
}
