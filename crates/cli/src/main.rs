//! Command line driver for formflow transaction sessions.
//!
//! ```bash
//! # Show the initial steps of a transaction type
//! formflow steps vessel_registration
//!
//! # Drive a session from an answer script
//! formflow run session.yaml
//!
//! # Resume a verified request, optionally continuing with a script
//! formflow resume REQ-42 --script rest.yaml
//! ```

mod script;

use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use formflow_api::{FormflowClient, HttpRegistryService, NO_RESPONSE_STATUS, SettingsTokenRefresher};
use formflow_engine::{
    ApiFailure, EngineEvent, WorkflowEngine,
    strategies::{CompanyRecord, RegistryService, StepReceipt, VesselCheck, default_registry},
};
use formflow_types::{FieldKind, FormData, SubmissionReceipt, TransactionType};
use formflow_util::{Settings, settings::default_settings_path};
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::script::{ScriptRunner, SessionScript};

#[derive(Parser)]
#[command(name = "formflow")]
#[command(version)]
#[command(about = "Drive multi-step transaction sessions from the command line")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to $FORMFLOW_SETTINGS_PATH or the config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the steps a transaction type starts with
    Steps {
        /// Transaction type, for example vessel_registration
        transaction_type: String,
    },

    /// Start a new session and answer it from a YAML or JSON script
    Run {
        /// Answer script
        script: PathBuf,
    },

    /// Resume a saved request by id
    Resume {
        request_id: String,

        /// Script answering the steps after the resume point
        #[arg(long)]
        script: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings_path = cli.settings.clone().unwrap_or_else(default_settings_path);
    let settings = load_settings(cli.settings.as_ref())?;
    init_tracing(&settings);
    debug!(settings = ?settings, path = %settings_path.display(), "settings resolved");

    match cli.command {
        Commands::Steps { transaction_type } => print_steps(&transaction_type),
        Commands::Run { script } => run_script(&settings, &settings_path, &script).await,
        Commands::Resume { request_id, script } => resume(&settings, &settings_path, &request_id, script.as_ref()).await,
    }
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => {
            let mut settings = Settings::load_from(path)?;
            settings.apply_env_overrides();
            settings
        }
        None => Settings::load().with_context(|| format!("load settings from {}", default_settings_path().display()))?,
    };
    Ok(settings)
}

/// `RUST_LOG` wins over the settings' `logFilter`, which wins over `info`.
fn init_tracing(settings: &Settings) {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or_else(|| settings.log_filter.clone())
        .unwrap_or_else(|| "info".into());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Builds an engine backed by the HTTP service. Expired tokens are reloaded from the
/// settings file.
fn build_engine(settings: &Settings, settings_path: &Path) -> Result<(WorkflowEngine, UnboundedReceiver<EngineEvent>)> {
    let client = FormflowClient::new(&settings.api_base_url, settings.access_token.clone(), settings.request_timeout())
        .context("configure API client")?
        .with_refresher(Arc::new(SettingsTokenRefresher::new(settings_path)));
    info!(base_url = %client.base_url(), "using formflow backend");
    let service = Arc::new(HttpRegistryService::new(client));
    let (engine, events) = WorkflowEngine::new(default_registry(service.clone()));
    let engine = engine
        .with_status_source(service.clone())
        .with_draft_sink(service)
        .with_user_id(settings.user_id.clone());
    Ok((engine, events))
}

/// Registry stand-in for commands that never talk to the backend.
struct OfflineRegistry;

impl OfflineRegistry {
    fn unavailable<T>() -> Result<T, ApiFailure> {
        Err(ApiFailure::new(NO_RESPONSE_STATUS, "the backend is not used by this command"))
    }
}

#[async_trait]
impl RegistryService for OfflineRegistry {
    async fn fetch_lookup(&self, _lookup_key: &str) -> Result<Vec<String>, ApiFailure> {
        Self::unavailable()
    }

    async fn find_company(&self, _cr_number: &str) -> Result<Option<CompanyRecord>, ApiFailure> {
        Self::unavailable()
    }

    async fn check_vessel(&self, _vessel_id: &str) -> Result<VesselCheck, ApiFailure> {
        Self::unavailable()
    }

    async fn submit_step(&self, _step_key: &str, _values: &FormData) -> Result<StepReceipt, ApiFailure> {
        Self::unavailable()
    }

    async fn submit_transaction(&self, _values: &FormData) -> Result<SubmissionReceipt, ApiFailure> {
        Self::unavailable()
    }
}

/// Prints the initial steps of `transaction_type` as JSON. Needs no settings or network.
fn print_steps(transaction_type: &str) -> Result<()> {
    let registry = default_registry(Arc::new(OfflineRegistry));
    let transaction_type = TransactionType::new(transaction_type);
    let Some(strategy) = registry.create(&transaction_type) else {
        let known: Vec<&str> = registry.transaction_types().map(TransactionType::as_str).collect();
        bail!("unknown transaction type '{}'; known types: {}", transaction_type, known.join(", "));
    };

    let steps: Vec<_> = strategy
        .get_steps(&FormData::new())
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let fields: Vec<_> = step
                .fields
                .iter()
                .map(|field| {
                    json!({
                        "id": field.id,
                        "label": field.label,
                        "kind": field_kind_name(&field.kind),
                        "mandatory": field.mandatory,
                    })
                })
                .collect();
            json!({ "index": index, "title": step.title, "fields": fields, "lookups": step.required_lookups })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&steps)?);
    Ok(())
}

fn field_kind_name(kind: &FieldKind) -> &'static str {
    match kind {
        FieldKind::Text(_) => "text",
        FieldKind::DropDown { .. } => "drop_down",
        FieldKind::CheckBox => "check_box",
        FieldKind::DatePicker { .. } => "date",
        FieldKind::FileUpload { .. } => "file_upload",
        FieldKind::MultiSelect { .. } => "multi_select",
        FieldKind::RadioGroup { .. } => "radio_group",
        FieldKind::RecordList { .. } => "record_list",
        FieldKind::ComputedLineItem { .. } => "line_item",
    }
}

async fn run_script(settings: &Settings, settings_path: &Path, path: &Path) -> Result<()> {
    let script = SessionScript::load(path)?;
    let Some(transaction_type) = script.transaction_type.clone() else {
        bail!("script {} does not name a transactionType", path.display());
    };
    let (engine, mut events) = build_engine(settings, settings_path)?;
    engine
        .initialize(transaction_type.as_str())
        .await
        .with_context(|| format!("initialize {}", transaction_type))?;

    let stdout = io::stdout();
    ScriptRunner::new(&engine, &mut events, stdout.lock()).run(&script).await
}

async fn resume(settings: &Settings, settings_path: &Path, request_id: &str, script: Option<&PathBuf>) -> Result<()> {
    let script = script.map(|path| SessionScript::load(path)).transpose()?;
    let (engine, mut events) = build_engine(settings, settings_path)?;
    let resumed = engine.resume_request(request_id).await;

    let stdout = io::stdout();
    let mut runner = ScriptRunner::new(&engine, &mut events, stdout.lock());
    runner.print_events()?;
    resumed.with_context(|| format!("resume request {}", request_id))?;

    match script {
        Some(script) => runner.run(&script).await,
        None => runner.print_snapshot(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_listed_without_a_backend() {
        let registry = default_registry(Arc::new(OfflineRegistry));
        let strategy = registry.create(&TransactionType::new("vessel_registration")).expect("bundled strategy");

        let steps = strategy.get_steps(&FormData::new());

        assert!(!steps.is_empty());
        assert_eq!(steps[0].title, "Owner details");
        assert!(print_steps("vessel_registration").is_ok());
        assert!(print_steps("boat_licence").is_err());
    }

    #[tokio::test]
    async fn offline_registry_never_answers() {
        let failure = OfflineRegistry.fetch_lookup("ports").await.expect_err("offline");
        assert_eq!(failure.status_code, NO_RESPONSE_STATUS);
    }
}
