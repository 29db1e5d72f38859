//! Text report builder for CLI output.
//!
//! Formats the aggregated run results as human-readable lines, one per step
//! in table order, with a totals line at the end.

use crate::config::{StepDescriptor, StepShape};
use crate::model::AnalysisReport;
use serde_json::Value;

fn tag_count(data: &Value) -> usize {
    match data {
        Value::Object(map) => map.values().filter_map(Value::as_array).map(Vec::len).sum(),
        Value::Array(items) => items.len(),
        _ => 0,
    }
}

/// Build the per-step lines and summary for text mode.
pub fn build_text_report(steps: &[StepDescriptor], report: &AnalysisReport) -> Vec<String> {
    let mut lines = Vec::new();
    lines.push(format!(
        "Resume: {} ({} bytes)",
        report.source_file, report.source_size
    ));
    lines.push(format!("Analyzed: {}", report.timestamp_utc));
    lines.push(String::new());

    let mut total_tags = 0usize;
    let mut succeeded = 0usize;
    for step in steps {
        if let Some(err) = report.errors.get(&step.key) {
            lines.push(format!("{:<34} FAILED: {}", step.key, err));
            continue;
        }
        let data = report.results.get(&step.key);
        let tags = data.map(tag_count).unwrap_or(0);
        total_tags += tags;
        succeeded += 1;
        match step.shape {
            StepShape::CategoryMap => {
                let categories = data.and_then(Value::as_object).map(|m| m.len()).unwrap_or(0);
                lines.push(format!(
                    "{:<34} {} categories, {} tags",
                    step.key, categories, tags
                ));
            }
            StepShape::ItemList => {
                lines.push(format!("{:<34} {} items", step.key, tags));
            }
        }
    }

    lines.push(String::new());
    lines.push(format!(
        "{}/{} steps succeeded, {} tags extracted",
        succeeded,
        steps.len(),
        total_tags
    ));
    lines
}
