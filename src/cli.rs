use crate::config::{self, StepDescriptor};
use crate::engine::HttpStepCaller;
use crate::model::{AnalysisReport, Document, StepEvent};
use crate::orchestrator::RunController;
use crate::{report, storage};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "resume-extract",
    version,
    about = "Multi-endpoint resume extraction with per-step progress tracking"
)]
pub struct Cli {
    /// Resume document to analyze
    pub file: PathBuf,

    /// Base URL of the extraction service (used by the built-in step table)
    #[arg(long, default_value = "http://127.0.0.1:8000")]
    pub base_url: String,

    /// JSON file with a custom step table, replacing the built-in one
    #[arg(long)]
    pub steps_config: Option<PathBuf>,

    /// Print the aggregated report as JSON instead of text
    #[arg(long)]
    pub json: bool,

    /// Timeout per extraction call
    #[arg(long, default_value = "30s")]
    pub call_timeout: humantime::Duration,

    /// Fixed delay between consecutive steps
    #[arg(long, default_value = "500ms")]
    pub pacing: humantime::Duration,

    /// Export the report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the report as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,
}

/// One-line payload description for progress output.
fn payload_summary(data: &Value) -> String {
    match data {
        Value::Object(map) => format!("{} categories", map.len()),
        Value::Array(items) => format!("{} items", items.len()),
        _ => "unrecognized payload".to_string(),
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let steps = match args.steps_config.as_deref() {
        Some(path) => config::load_steps(path)?,
        None => config::default_steps(&args.base_url),
    };
    let doc = Document::from_path(&args.file).await?;

    let caller = Arc::new(HttpStepCaller::new(args.call_timeout.into())?);
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<StepEvent>();
    let controller =
        RunController::new(steps.clone(), caller, args.pacing.into()).with_events(evt_tx);

    // Progress lines go to stderr so stdout stays clean for the report.
    let quiet = args.json;
    let printer = tokio::spawn(async move {
        while let Some(ev) = evt_rx.recv().await {
            if quiet {
                continue;
            }
            match ev {
                StepEvent::Started { key } => eprintln!("== {key} =="),
                StepEvent::Completed { key, data } => {
                    eprintln!("{key}: ok ({})", payload_summary(&data));
                }
                StepEvent::Errored { key, error, .. } => eprintln!("{key}: {error}"),
            }
        }
    });

    let outcome = controller
        .start_run(&doc)
        .await?
        .context("analysis already in progress")?;

    // Close the event channel so the printer drains and exits.
    drop(controller);
    let _ = printer.await;

    let report = AnalysisReport::new(&doc, outcome);
    handle_exports(&args, &steps, &report)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for line in report::build_text_report(&steps, &report) {
            println!("{line}");
        }
    }
    Ok(())
}

/// Handle export operations (JSON and CSV) for both output modes.
fn handle_exports(args: &Cli, steps: &[StepDescriptor], report: &AnalysisReport) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        storage::export_json(p, report)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        storage::export_csv(p, steps, report)?;
    }
    Ok(())
}
