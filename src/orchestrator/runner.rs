//! Sequential step execution.
//!
//! Drives every configured step to settlement, one at a time, and partitions
//! the outcome into per-step results and errors. A step failure is data here,
//! not an exception: it is recorded and the sequence continues.

use crate::config::StepDescriptor;
use crate::engine::unwrap::unwrap_response;
use crate::engine::StepCaller;
use crate::model::{Document, RunOutcome, StepEvent};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Executes the configured steps strictly in list order against one document.
///
/// Owns the in-flight fingerprint set for its runs. The run-level single
/// flight guard in the controller is the primary protection against
/// overlapping work; this set is a defensive net that only trips if two
/// `run_steps` calls are ever driven concurrently on the same runner.
pub struct StepRunner {
    caller: Arc<dyn StepCaller>,
    pacing: Duration,
    in_flight: Mutex<HashSet<String>>,
}

impl StepRunner {
    pub fn new(caller: Arc<dyn StepCaller>, pacing: Duration) -> Self {
        Self {
            caller,
            pacing,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Run every step to settlement and return the accumulated partition.
    ///
    /// Emits exactly two transitions per step (Started, then Completed or
    /// Errored), in list order, with no interleaving between steps. Never
    /// aborts the remaining sequence because one step failed.
    pub async fn run_steps<F>(
        &self,
        doc: &Document,
        steps: &[StepDescriptor],
        mut on_transition: F,
    ) -> RunOutcome
    where
        F: FnMut(StepEvent),
    {
        let mut outcome = RunOutcome::default();

        for (i, step) in steps.iter().enumerate() {
            on_transition(StepEvent::Started {
                key: step.key.clone(),
            });

            match self.call_step(doc, step).await {
                Ok(data) => {
                    debug!(step = %step.key, "step completed");
                    outcome.results.insert(step.key.clone(), data.clone());
                    on_transition(StepEvent::Completed {
                        key: step.key.clone(),
                        data,
                    });
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(step = %step.key, error = %error, "step failed");
                    let placeholder = step.shape.empty_value();
                    outcome.results.insert(step.key.clone(), placeholder.clone());
                    outcome.errors.insert(step.key.clone(), error.clone());
                    on_transition(StepEvent::Errored {
                        key: step.key.clone(),
                        placeholder,
                        error,
                    });
                }
            }

            // Pace the remote service between calls, but not after the last.
            if i + 1 < steps.len() && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }

        outcome
    }

    /// One remote call with the duplicate-invocation guard around it.
    ///
    /// The fingerprint is removed on both the success and the failure path.
    async fn call_step(&self, doc: &Document, step: &StepDescriptor) -> Result<Value> {
        let fingerprint = format!("{}-{}-{}", step.key, doc.name, doc.size);
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(fingerprint.clone()) {
                bail!("{} analysis already in progress", step.key);
            }
        }

        let res = self
            .caller
            .call(doc, step)
            .await
            .with_context(|| format!("failed to analyze {}", step.key))
            .map(|raw| unwrap_response(&raw, step));

        self.in_flight.lock().unwrap().remove(&fingerprint);
        res
    }
}
