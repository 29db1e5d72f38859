//! Result exporters.
//!
//! Writes the aggregated report to explicitly requested paths. There is no
//! implicit history or auto-save; results live only as long as the caller
//! keeps them.

use crate::config::{StepDescriptor, StepShape};
use crate::model::{AnalysisReport, Tag};
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;

/// Export the full report as pretty-printed JSON.
pub fn export_json(path: &Path, report: &AnalysisReport) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    std::fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

const CSV_HEADER: [&str; 8] = [
    "Step",
    "Category",
    "Tag",
    "SAP Activate Task Reference",
    "SAP Activate Deliverable Reference",
    "Supporting Resume Text",
    "Summary",
    "Confidence Score",
];

/// Export one row per extracted tag, in step-table order.
///
/// Empty categories are kept as explicit "No tags extracted" rows so the
/// sheet mirrors the full result set, not just the hits.
pub fn export_csv(path: &Path, steps: &[StepDescriptor], report: &AnalysisReport) -> Result<()> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    rows.push(CSV_HEADER.iter().map(|s| s.to_string()).collect());

    for step in steps {
        let Some(data) = report.results.get(&step.key) else {
            continue;
        };
        match step.shape {
            StepShape::CategoryMap => {
                if let Some(categories) = data.as_object() {
                    for (category, tags) in categories {
                        match tags.as_array() {
                            Some(list) if !list.is_empty() => {
                                for tag in list {
                                    rows.push(tag_row(&step.key, category, tag));
                                }
                            }
                            _ => rows.push(empty_category_row(&step.key, category)),
                        }
                    }
                }
            }
            StepShape::ItemList => {
                if let Some(items) = data.as_array() {
                    for tag in items {
                        rows.push(tag_row(&step.key, "", tag));
                    }
                }
            }
        }
    }

    let csv = rows
        .iter()
        .map(|row| {
            row.iter()
                .map(|field| csv_escape(field))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n");
    std::fs::write(path, csv).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn tag_row(step: &str, category: &str, value: &Value) -> Vec<String> {
    let tag: Tag = serde_json::from_value(value.clone()).unwrap_or_default();
    vec![
        step.to_string(),
        category.to_string(),
        tag.tag,
        tag.task_reference.unwrap_or_default(),
        tag.deliverable_reference.unwrap_or_default(),
        tag.supporting_resume_text.unwrap_or_default(),
        tag.summary.unwrap_or_default(),
        tag.confidence_score
            .map(|c| format!("{:.1}%", c * 100.0))
            .unwrap_or_default(),
    ]
}

fn empty_category_row(step: &str, category: &str) -> Vec<String> {
    let mut row = vec![
        step.to_string(),
        category.to_string(),
        "No tags extracted".to_string(),
    ];
    row.resize(CSV_HEADER.len(), String::new());
    row
}

fn csv_escape(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
