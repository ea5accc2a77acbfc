use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use formflow_engine::{
    ApiFailure, EngineError, EngineEvent, Transition, WorkflowEngine,
    strategies::{CompanyRecord, RegistryService, StepReceipt, VesselCheck, VesselRegistrationStrategy, VesselStatus, default_registry},
};
use formflow_types::{EligibilityState, FieldKind, FormData, SubmissionReceipt};
use indexmap::IndexMap;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Default)]
struct FakeRegistry {
    checks: Mutex<IndexMap<String, VesselCheck>>,
    fetched_lookups: Mutex<Vec<String>>,
    submitted_steps: Mutex<Vec<String>>,
    step_values: Mutex<IndexMap<String, FormData>>,
    transactions: Mutex<Vec<FormData>>,
}

impl FakeRegistry {
    fn with_vessel(self, vessel_id: &str, status: VesselStatus, particulars: Option<FormData>) -> Self {
        self.checks.lock().unwrap().insert(
            vessel_id.to_string(),
            VesselCheck {
                vessel_id: vessel_id.to_string(),
                status,
                particulars,
                issues: Vec::new(),
                message: None,
            },
        );
        self
    }
}

#[async_trait]
impl RegistryService for FakeRegistry {
    async fn fetch_lookup(&self, lookup_key: &str) -> Result<Vec<String>, ApiFailure> {
        self.fetched_lookups.lock().unwrap().push(lookup_key.to_string());
        match lookup_key {
            "ports" => Ok(vec!["Shuwaikh".into(), "Shuaiba".into()]),
            "vessel_types" => Ok(vec!["Fishing".into(), "Leisure".into()]),
            other => Err(ApiFailure::new(404, format!("unknown lookup {}", other))),
        }
    }

    async fn find_company(&self, cr_number: &str) -> Result<Option<CompanyRecord>, ApiFailure> {
        Ok((cr_number == "104857").then(|| CompanyRecord {
            cr_number: cr_number.to_string(),
            name: "Gulf Marine Co.".to_string(),
        }))
    }

    async fn check_vessel(&self, vessel_id: &str) -> Result<VesselCheck, ApiFailure> {
        self.checks
            .lock()
            .unwrap()
            .get(vessel_id)
            .cloned()
            .ok_or_else(|| ApiFailure::new(404, "vessel not found"))
    }

    async fn submit_step(&self, step_key: &str, values: &FormData) -> Result<StepReceipt, ApiFailure> {
        self.submitted_steps.lock().unwrap().push(step_key.to_string());
        self.step_values.lock().unwrap().insert(step_key.to_string(), values.clone());
        Ok(StepReceipt::accepted())
    }

    async fn submit_transaction(&self, values: &FormData) -> Result<SubmissionReceipt, ApiFailure> {
        self.transactions.lock().unwrap().push(values.clone());
        Ok(SubmissionReceipt {
            request_id: "REQ-1".into(),
            message: None,
        })
    }
}

async fn start(service: &Arc<FakeRegistry>) -> (WorkflowEngine, UnboundedReceiver<EngineEvent>) {
    let (engine, events) = WorkflowEngine::new(default_registry(service.clone()));
    engine
        .initialize(VesselRegistrationStrategy::TRANSACTION_TYPE)
        .await
        .expect("initialize vessel registration");
    (engine, events)
}

fn titles(engine: &WorkflowEngine) -> Vec<String> {
    engine.snapshot().steps.into_iter().map(|step| step.title).collect()
}

fn current_title(engine: &WorkflowEngine) -> Option<String> {
    engine.snapshot().current().map(|step| step.title.clone())
}

/// Enters `values` on the current step and presses next.
async fn answer(engine: &WorkflowEngine, values: &[(&str, &str)]) -> Result<Transition, EngineError> {
    for (field_id, value) in values {
        engine.on_field_value_change(field_id, *value)?;
    }
    engine.next().await
}

const OWNER: [(&str, &str); 4] = [
    ("owner_type", "individual"),
    ("owner_name", "Ali Al-Ahmad"),
    ("civil_id", "287041512345"),
    ("phone", "+965 6666 4321"),
];
const DETAILS: [(&str, &str); 5] = [
    ("vessel_name", "Al Salmiya"),
    ("vessel_type", "Fishing"),
    ("port_of_registry", "Shuwaikh"),
    ("gross_tonnage", "120"),
    ("build_date", "2015-06-01"),
];
const ENGINES: [(&str, &str); 1] = [("engines", r#"[{"serial_number":"ENG-1","manufacturer":"Yanmar","power_kw":"300"}]"#)];
const DOCUMENTS: [(&str, &str); 1] = [(
    "ownership_proof",
    r#"{"name":"deed.pdf","mimeType":"application/pdf","sizeBytes":2048}"#,
)];

#[tokio::test]
async fn company_owner_registers_vessel_with_lazy_ports() {
    let service = Arc::new(FakeRegistry::default().with_vessel("KW-7", VesselStatus::Clear, None));
    let (engine, mut events) = start(&service).await;

    let state = engine.snapshot();
    assert!(state.lookups["vessel_types"].is_loaded());
    assert!(!state.lookups.contains_key("ports"));

    let individual_steps = titles(&engine).len();
    engine.on_field_value_change("owner_type", "company").expect("owner type");
    engine.on_field_value_change("owner_name", "Fatima Al-Sabah").expect("owner name");
    engine.on_field_value_change("phone", "+965 5555 1234").expect("phone");
    let steps = titles(&engine);
    assert_eq!(steps.len(), individual_steps + 1);
    assert_eq!(steps[1], "Commercial registration");
    assert_eq!(engine.next().await, Ok(Transition::Advanced { from: 0, to: 1 }));

    engine.on_field_value_change("cr_number", "104857").expect("cr number");
    engine.on_field_focus_lost("cr_number", "104857").await.expect("company lookup");
    assert_eq!(engine.snapshot().value("company_name"), Some("Gulf Marine Co."));
    assert_eq!(engine.next().await, Ok(Transition::Advanced { from: 1, to: 2 }));

    engine.on_field_value_change("vessel_id", "KW-7").expect("vessel");
    assert_eq!(engine.next().await, Ok(Transition::Advanced { from: 2, to: 3 }));

    let state = engine.snapshot();
    assert_eq!(state.current().map(|step| step.title.as_str()), Some("Vessel details"));
    assert_eq!(state.value("inspection_required"), Some("false"));
    assert!(state.lookups["ports"].is_loaded());
    let port_options = state
        .current()
        .and_then(|step| step.field("port_of_registry"))
        .and_then(|field| match &field.kind {
            FieldKind::DropDown { options, .. } => Some(options.clone()),
            _ => None,
        });
    assert_eq!(port_options, Some(vec!["Shuwaikh".to_string(), "Shuaiba".to_string()]));
    assert!(!titles(&engine).iter().any(|title| title == "Inspection appointment"));
    assert_eq!(service.submitted_steps.lock().unwrap().as_slice(), ["owner", "commercial_registration"]);
    assert_eq!(service.fetched_lookups.lock().unwrap().as_slice(), ["vessel_types", "ports"]);
    assert!(matches!(engine.eligibility_state(), EligibilityState::Valid { route_to: None, .. }));

    engine.previous().await.expect("back to selection");
    engine.previous().await.expect("back to commercial registration");
    assert_eq!(engine.snapshot().value("vessel_id"), None);
    assert_eq!(engine.eligibility_state(), EligibilityState::Idle);

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        received.push(event);
    }
    assert!(received.is_empty(), "unexpected events: {:?}", received);
}

#[tokio::test]
async fn vessel_on_file_skips_details_and_requires_inspection() {
    let particulars: FormData = [("vessel_name".to_string(), "Al Salmiya".to_string())].into_iter().collect();
    let service = Arc::new(FakeRegistry::default().with_vessel("KW-8", VesselStatus::InspectionRequired, Some(particulars)));
    let (engine, _events) = start(&service).await;

    engine.on_field_value_change("owner_type", "individual").expect("owner type");
    engine.on_field_value_change("owner_name", "Ali Al-Ahmad").expect("owner name");
    engine.on_field_value_change("civil_id", "287041512345").expect("civil id");
    engine.on_field_value_change("phone", "+965 6666 4321").expect("phone");
    assert_eq!(engine.next().await, Ok(Transition::Advanced { from: 0, to: 1 }));

    engine.on_field_value_change("vessel_id", "KW-8").expect("vessel");
    assert_eq!(engine.next().await, Ok(Transition::Rerouted { from: 1, to: 3 }));

    let state = engine.snapshot();
    assert_eq!(state.current().map(|step| step.title.as_str()), Some("Inspection appointment"));
    assert_eq!(state.value("vessel_name"), Some("Al Salmiya"));
    assert!(state.lookups["ports"].is_loaded());
    assert!(!state.completed_steps.contains(&2));
}

#[tokio::test]
async fn unknown_company_number_is_flagged_on_the_field() {
    let service = Arc::new(FakeRegistry::default());
    let (engine, _events) = start(&service).await;
    engine.on_field_value_change("owner_type", "company").expect("owner type");
    engine.on_field_value_change("cr_number", "999").expect("cr number");

    engine.on_field_focus_lost("cr_number", "999").await.expect("company lookup");

    let state = engine.snapshot();
    assert_eq!(
        state.field_errors.get("cr_number").map(String::as_str),
        Some("No company is registered under this number")
    );
    assert_eq!(state.value("company_name"), None);
}

#[tokio::test]
async fn clear_vessel_walks_every_step_and_submits_once() {
    let service = Arc::new(FakeRegistry::default().with_vessel("KW-7", VesselStatus::Clear, None));
    let (engine, _events) = start(&service).await;

    assert_eq!(answer(&engine, &OWNER).await, Ok(Transition::Advanced { from: 0, to: 1 }));
    assert_eq!(answer(&engine, &[("vessel_id", "KW-7")]).await, Ok(Transition::Advanced { from: 1, to: 2 }));
    assert_eq!(answer(&engine, &DETAILS).await, Ok(Transition::Advanced { from: 2, to: 3 }));
    assert_eq!(current_title(&engine).as_deref(), Some("Engines"));
    assert_eq!(answer(&engine, &ENGINES).await, Ok(Transition::Advanced { from: 3, to: 4 }));
    assert_eq!(answer(&engine, &DOCUMENTS).await, Ok(Transition::Advanced { from: 4, to: 5 }));
    assert_eq!(current_title(&engine).as_deref(), Some("Payment"));
    assert_eq!(answer(&engine, &[]).await, Ok(Transition::Advanced { from: 5, to: 6 }));
    assert_eq!(current_title(&engine).as_deref(), Some("Review and submit"));
    assert_eq!(engine.next().await, Ok(Transition::Finished { step: 6 }));

    let receipt = engine.submit().await.expect("submitted");
    assert_eq!(receipt.request_id, "REQ-1");
    assert_eq!(
        service.submitted_steps.lock().unwrap().as_slice(),
        ["owner", "vessel_details", "engines", "documents"]
    );
    let transactions = service.transactions.lock().unwrap().clone();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].get("inspection_required").map(String::as_str), Some("false"));
    assert!(transactions[0].contains_key("engines"));

    assert_eq!(
        engine.submit().await,
        Err(EngineError::AlreadySubmitted {
            request_id: "REQ-1".to_string()
        })
    );
    assert_eq!(service.transactions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn inspection_step_is_posted_under_its_own_key() {
    let service = Arc::new(FakeRegistry::default().with_vessel("KW-5", VesselStatus::InspectionRequired, None));
    let (engine, _events) = start(&service).await;

    assert_eq!(answer(&engine, &OWNER).await, Ok(Transition::Advanced { from: 0, to: 1 }));
    assert_eq!(answer(&engine, &[("vessel_id", "KW-5")]).await, Ok(Transition::Advanced { from: 1, to: 2 }));
    assert_eq!(current_title(&engine).as_deref(), Some("Vessel details"));
    assert_eq!(answer(&engine, &DETAILS).await, Ok(Transition::Advanced { from: 2, to: 3 }));
    assert_eq!(current_title(&engine).as_deref(), Some("Inspection appointment"));

    let inspection = [("inspection_date", "2099-01-15"), ("inspection_port", "Shuaiba")];
    assert_eq!(answer(&engine, &inspection).await, Ok(Transition::Advanced { from: 3, to: 4 }));
    assert_eq!(current_title(&engine).as_deref(), Some("Engines"));
    assert_eq!(answer(&engine, &ENGINES).await, Ok(Transition::Advanced { from: 4, to: 5 }));
    assert_eq!(answer(&engine, &DOCUMENTS).await, Ok(Transition::Advanced { from: 5, to: 6 }));
    assert_eq!(answer(&engine, &[]).await, Ok(Transition::Advanced { from: 6, to: 7 }));
    assert_eq!(engine.next().await, Ok(Transition::Finished { step: 7 }));
    engine.submit().await.expect("submitted");

    assert_eq!(
        service.submitted_steps.lock().unwrap().as_slice(),
        ["owner", "vessel_details", "inspection", "engines", "documents"]
    );
    let step_values = service.step_values.lock().unwrap().clone();
    assert_eq!(step_values["inspection"].get("inspection_port").map(String::as_str), Some("Shuaiba"));
    assert!(step_values["engines"].contains_key("engines"));
    assert!(step_values["documents"].contains_key("ownership_proof"));
}
