//! Declarative step table.
//!
//! Each extraction step is pure data: a key, an endpoint, the response-key
//! variants the endpoint is known to answer with, and the shape of its
//! payload. The orchestrator never branches on individual steps, so adding a
//! step is a table edit, not a code change. Deployments can replace the
//! built-in table with `--steps-config`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;

/// Payload shape a step's endpoint is declared to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepShape {
    /// Mapping of category name to a list of tags (project-phase steps).
    CategoryMap,
    /// Flat list of items (experience steps).
    ItemList,
}

impl StepShape {
    /// Placeholder recorded for a step whose call failed.
    pub fn empty_value(self) -> Value {
        match self {
            StepShape::CategoryMap => Value::Object(serde_json::Map::new()),
            StepShape::ItemList => Value::Array(Vec::new()),
        }
    }
}

/// Static configuration for one extraction step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDescriptor {
    pub key: String,
    pub endpoint: String,
    /// Response-envelope keys to probe, in order. Empty means "probe the
    /// step key itself".
    #[serde(default)]
    pub response_keys: Vec<String>,
    pub shape: StepShape,
}

impl StepDescriptor {
    fn phase(key: &str, base_url: &str, path: &str, response_keys: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
            response_keys: response_keys.iter().map(|k| k.to_string()).collect(),
            shape: StepShape::CategoryMap,
        }
    }

    fn experience(key: &str, base_url: &str, path: &str) -> Self {
        Self {
            key: key.to_string(),
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), path),
            response_keys: Vec::new(),
            shape: StepShape::ItemList,
        }
    }
}

/// Built-in SAP Activate step table: six project phases followed by three
/// experience categories. The response-key variants reflect the envelope
/// spellings the individual endpoints actually use.
pub fn default_steps(base_url: &str) -> Vec<StepDescriptor> {
    vec![
        StepDescriptor::phase(
            "Pre-Implementation/Discovery",
            base_url,
            "/parsePdfPreImpl",
            &[
                "Pre-Implementation / Discovery",
                "Pre-Implementation/Discovery",
            ],
        ),
        StepDescriptor::phase(
            "Build/Configuration",
            base_url,
            "/parsePdfBuild",
            &["Build / Configuration", "Build/Configuration"],
        ),
        StepDescriptor::phase("Design", base_url, "/parsePdfDesign", &["Design"]),
        StepDescriptor::phase("Testing", base_url, "/parsePdfTesting", &["Testing"]),
        StepDescriptor::phase(
            "Deployment",
            base_url,
            "/parsePdfDeploymentGoLive",
            &["Deployment / Cutover", "Deployment", "Cutover"],
        ),
        StepDescriptor::phase(
            "Post-Implementation",
            base_url,
            "/parsePdfPostImplementation",
            &["Post-Go-Live / Run"],
        ),
        StepDescriptor::experience(
            "business_process_experience",
            base_url,
            "/TM/parsePdfBusinessTM",
        ),
        StepDescriptor::experience(
            "wricef_development_experience",
            base_url,
            "/TM/parsePdfWRICEFTM",
        ),
        StepDescriptor::experience("integration_experience", base_url, "/parsePdfIntegration"),
    ]
}

/// Load a deployment-supplied step table from a JSON file.
pub fn load_steps(path: &Path) -> Result<Vec<StepDescriptor>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read step table {}", path.display()))?;
    let steps: Vec<StepDescriptor> = serde_json::from_str(&raw)
        .with_context(|| format!("parse step table {}", path.display()))?;
    validate_steps(&steps)?;
    Ok(steps)
}

/// Reject empty tables, duplicate keys, and steps without an endpoint.
pub fn validate_steps(steps: &[StepDescriptor]) -> Result<()> {
    if steps.is_empty() {
        bail!("step table is empty");
    }
    let mut seen = HashSet::new();
    for step in steps {
        if step.key.is_empty() {
            bail!("step table contains a step with an empty key");
        }
        if !seen.insert(step.key.as_str()) {
            bail!("duplicate step key: {}", step.key);
        }
        if step.endpoint.is_empty() {
            bail!("step {} has no endpoint", step.key);
        }
    }
    Ok(())
}
