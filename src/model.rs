use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// An uploaded resume document with a stable (name, size) identity.
///
/// The identity is what step fingerprints and run tokens are derived from;
/// the byte content is what gets posted to the extraction endpoints.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub size: u64,
    pub bytes: Bytes,
}

impl Document {
    pub async fn from_path(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("resume")
            .to_string();
        Ok(Self::from_bytes(name, data))
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }
}

/// Token identifying one analysis run.
///
/// Used only to detect staleness: events and settlements carry the token they
/// were minted under, and the controller drops anything whose token no longer
/// matches the current one. Never persisted, never part of a result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    pub fn mint(doc: &Document) -> Self {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        RunId(format!("{}-{}-{}", doc.name, doc.size, nanos))
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Started,
    Completed,
    Errored,
}

/// Externally observed per-step lifecycle state.
///
/// Every step starts Pending when a run begins, moves to Started right before
/// its remote call, then to exactly one of Completed/Errored, and never again
/// within that run.
#[derive(Debug, Clone, Serialize)]
pub struct StepState {
    pub status: StepStatus,
    pub error: Option<String>,
}

impl StepState {
    pub fn pending() -> Self {
        Self {
            status: StepStatus::Pending,
            error: None,
        }
    }
}

/// Lifecycle transitions emitted by the step runner, two per step.
#[derive(Debug, Clone)]
pub enum StepEvent {
    Started {
        key: String,
    },
    Completed {
        key: String,
        data: Value,
    },
    Errored {
        key: String,
        placeholder: Value,
        error: String,
    },
}

impl StepEvent {
    pub fn key(&self) -> &str {
        match self {
            StepEvent::Started { key }
            | StepEvent::Completed { key, .. }
            | StepEvent::Errored { key, .. } => key,
        }
    }
}

/// Final partition of a run: unwrapped data per step, plus error messages for
/// the subset of steps whose call failed.
///
/// Every configured step key appears in `results` exactly once; a failed step
/// holds its shape's empty placeholder there.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunOutcome {
    pub results: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
}

/// One extracted finding as the endpoints report it.
///
/// Field names follow the remote JSON contract; everything past the tag
/// identifier is optional because the endpoints evolve independently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub tag: String,
    #[serde(default, rename = "SAP_Activate_Task_Reference")]
    pub task_reference: Option<String>,
    #[serde(default, rename = "SAP_Activate_Deliverable_Reference")]
    pub deliverable_reference: Option<String>,
    #[serde(default)]
    pub supporting_resume_text: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

/// Aggregated run output ready for printing and export.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub timestamp_utc: String,
    pub source_file: String,
    pub source_size: u64,
    pub results: HashMap<String, Value>,
    pub errors: HashMap<String, String>,
}

impl AnalysisReport {
    pub fn new(doc: &Document, outcome: RunOutcome) -> Self {
        Self {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            source_file: doc.name.clone(),
            source_size: doc.size,
            results: outcome.results,
            errors: outcome.errors,
        }
    }
}
