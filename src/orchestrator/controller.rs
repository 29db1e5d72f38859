//! Run lifecycle controller.
//!
//! Owns the identity of the current analysis run, enforces one run at a time,
//! filters out events from superseded runs, and exposes run status to
//! presentation layers via a progress map and completion flags.

use crate::config::StepDescriptor;
use crate::engine::StepCaller;
use crate::model::{Document, RunId, RunOutcome, StepEvent, StepState, StepStatus};
use crate::orchestrator::StepRunner;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

/// Controller-side view of the active run.
struct RunState {
    current_run: Option<RunId>,
    progress: HashMap<String, StepState>,
    extracted: HashMap<String, Value>,
    errors: HashMap<String, String>,
    run_error: Option<String>,
    is_running: bool,
    is_complete: bool,
}

impl RunState {
    fn idle(steps: &[StepDescriptor]) -> Self {
        Self {
            current_run: None,
            progress: pending_progress(steps),
            extracted: HashMap::new(),
            errors: HashMap::new(),
            run_error: None,
            is_running: false,
            is_complete: false,
        }
    }
}

fn pending_progress(steps: &[StepDescriptor]) -> HashMap<String, StepState> {
    steps
        .iter()
        .map(|s| (s.key.clone(), StepState::pending()))
        .collect()
}

/// Drives analysis runs and aggregates their externally visible state.
///
/// Clones share one state; a run started from any clone is observed by all.
#[derive(Clone)]
pub struct RunController {
    steps: Arc<[StepDescriptor]>,
    runner: Arc<StepRunner>,
    state: Arc<Mutex<RunState>>,
    event_tx: Option<UnboundedSender<StepEvent>>,
}

impl RunController {
    pub fn new(steps: Vec<StepDescriptor>, caller: Arc<dyn StepCaller>, pacing: Duration) -> Self {
        let state = RunState::idle(&steps);
        Self {
            steps: steps.into(),
            runner: Arc::new(StepRunner::new(caller, pacing)),
            state: Arc::new(Mutex::new(state)),
            event_tx: None,
        }
    }

    /// Forward accepted (non-stale) transitions to a presentation layer.
    pub fn with_events(mut self, tx: UnboundedSender<StepEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Forget the current run and clear all observed state.
    ///
    /// Called when a new document is attached. Any run still in flight
    /// becomes stale: its remaining transitions and its settlement are
    /// silently discarded, and it will not touch the flags of whatever run
    /// replaces it.
    pub fn reset(&self) {
        let mut st = self.state.lock().unwrap();
        *st = RunState::idle(&self.steps);
    }

    pub fn progress(&self) -> HashMap<String, StepState> {
        self.state.lock().unwrap().progress.clone()
    }

    pub fn extracted_data(&self) -> HashMap<String, Value> {
        self.state.lock().unwrap().extracted.clone()
    }

    pub fn errors(&self) -> HashMap<String, String> {
        self.state.lock().unwrap().errors.clone()
    }

    pub fn run_error(&self) -> Option<String> {
        self.state.lock().unwrap().run_error.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().unwrap().is_running
    }

    pub fn is_complete(&self) -> bool {
        self.state.lock().unwrap().is_complete
    }

    /// Execute all configured steps against `doc`.
    ///
    /// Returns `Ok(None)` without touching any state when a run is already
    /// active. Individual step failures are absorbed into the outcome's
    /// `errors` partition and still settle as a completed run; `Err` is
    /// reserved for a failure of the run task itself.
    pub async fn start_run(&self, doc: &Document) -> Result<Option<RunOutcome>> {
        let run_id = {
            let mut st = self.state.lock().unwrap();
            if st.is_running {
                warn!(file = %doc.name, "analysis already in progress, ignoring duplicate request");
                return Ok(None);
            }
            let run_id = RunId::mint(doc);
            st.current_run = Some(run_id.clone());
            st.progress = pending_progress(&self.steps);
            st.extracted.clear();
            st.errors.clear();
            st.run_error = None;
            st.is_running = true;
            st.is_complete = false;
            run_id
        };
        info!(run = %run_id, steps = self.steps.len(), "starting analysis run");

        let runner = self.runner.clone();
        let steps = self.steps.clone();
        let run_doc = doc.clone();
        let state = self.state.clone();
        let event_tx = self.event_tx.clone();
        let cb_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            runner
                .run_steps(&run_doc, &steps, move |ev| {
                    apply_transition(&state, &event_tx, &cb_run_id, ev)
                })
                .await
        });

        match handle.await {
            Ok(outcome) => {
                let superseded = {
                    let mut st = self.state.lock().unwrap();
                    if st.current_run.as_ref() == Some(&run_id) {
                        st.extracted = outcome.results.clone();
                        st.errors = outcome.errors.clone();
                        st.is_complete = true;
                        st.is_running = false;
                        false
                    } else {
                        true
                    }
                };
                if superseded {
                    warn!(run = %run_id, "run was superseded, ignoring results");
                } else {
                    info!(
                        run = %run_id,
                        succeeded = outcome.results.len() - outcome.errors.len(),
                        failed = outcome.errors.len(),
                        "analysis run completed"
                    );
                }
                Ok(Some(outcome))
            }
            Err(join_err) => {
                {
                    let mut st = self.state.lock().unwrap();
                    if st.current_run.as_ref() == Some(&run_id) {
                        st.run_error = Some(format!("analysis run failed: {join_err}"));
                        st.is_running = false;
                    }
                }
                Err(join_err).context("analysis run failed")
            }
        }
    }
}

/// Apply one transition to the shared state, dropping it when the run that
/// produced it is no longer current.
fn apply_transition(
    state: &Mutex<RunState>,
    event_tx: &Option<UnboundedSender<StepEvent>>,
    run_id: &RunId,
    ev: StepEvent,
) {
    {
        let mut st = state.lock().unwrap();
        if st.current_run.as_ref() != Some(run_id) {
            warn!(step = ev.key(), "ignoring transition from superseded run");
            return;
        }
        debug!(step = ev.key(), "step transition");
        match &ev {
            StepEvent::Started { key } => {
                st.progress.insert(
                    key.clone(),
                    StepState {
                        status: StepStatus::Started,
                        error: None,
                    },
                );
            }
            StepEvent::Completed { key, data } => {
                st.progress.insert(
                    key.clone(),
                    StepState {
                        status: StepStatus::Completed,
                        error: None,
                    },
                );
                st.extracted.insert(key.clone(), data.clone());
            }
            StepEvent::Errored { key, error, .. } => {
                st.progress.insert(
                    key.clone(),
                    StepState {
                        status: StepStatus::Errored,
                        error: Some(error.clone()),
                    },
                );
            }
        }
    }
    if let Some(tx) = event_tx {
        let _ = tx.send(ev);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StepDescriptor, StepShape};
    use crate::orchestrator::runner::tests::{doc, step, Script, ScriptedCaller};
    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Semaphore;

    fn two_steps() -> Vec<StepDescriptor> {
        vec![
            step("Design", StepShape::CategoryMap),
            step("integration_experience", StepShape::ItemList),
        ]
    }

    fn happy_caller() -> Arc<ScriptedCaller> {
        Arc::new(ScriptedCaller::new(vec![
            (
                "Design",
                Script::ok(json!({"Design": {"Solution Design": [{"tag": "X"}]}})),
            ),
            (
                "integration_experience",
                Script::ok(json!({"integration_experience": [{"tag": "IDoc"}]})),
            ),
        ]))
    }

    /// Caller that blocks on a closed semaphore for one document name and
    /// answers immediately for everything else.
    struct GatedCaller {
        gate: Arc<Semaphore>,
        gated_doc: String,
    }

    #[async_trait]
    impl StepCaller for GatedCaller {
        async fn call(&self, doc: &Document, _stp: &StepDescriptor) -> anyhow::Result<Value> {
            if doc.name == self.gated_doc {
                let permit = self.gate.acquire().await?;
                permit.forget();
            }
            // Flat, array-valued payload: the unwrapping fallback passes it
            // through unchanged for either step shape.
            Ok(json!({"Category": [{"tag": doc.name.clone()}]}))
        }
    }

    struct PanickingCaller;

    #[async_trait]
    impl StepCaller for PanickingCaller {
        async fn call(&self, _doc: &Document, _stp: &StepDescriptor) -> anyhow::Result<Value> {
            panic!("defect in step caller");
        }
    }

    #[tokio::test]
    async fn completed_run_updates_progress_and_data() {
        let controller = RunController::new(two_steps(), happy_caller(), Duration::ZERO);
        let d = doc();

        let outcome = controller.start_run(&d).await.unwrap().unwrap();

        assert!(controller.is_complete());
        assert!(!controller.is_running());
        assert!(outcome.errors.is_empty());
        let progress = controller.progress();
        assert_eq!(progress.len(), 2);
        assert!(progress
            .values()
            .all(|s| s.status == StepStatus::Completed));
        assert_eq!(
            controller.extracted_data()["Design"],
            json!({"Solution Design": [{"tag": "X"}]})
        );

        // A settled controller accepts a fresh run without an explicit reset.
        let again = controller.start_run(&d).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn step_failures_still_settle_as_complete() {
        let steps = two_steps();
        let caller = Arc::new(ScriptedCaller::new(vec![
            ("Design", Script::fail("503 Service Unavailable")),
            (
                "integration_experience",
                Script::ok(json!({"integration_experience": []})),
            ),
        ]));
        let controller = RunController::new(steps, caller, Duration::ZERO);

        let outcome = controller.start_run(&doc()).await.unwrap().unwrap();

        assert!(controller.is_complete());
        assert!(controller.run_error().is_none());
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(controller.errors().len(), 1);
        let progress = controller.progress();
        assert_eq!(progress["Design"].status, StepStatus::Errored);
        assert_eq!(
            progress["integration_experience"].status,
            StepStatus::Completed
        );
        // The failed step is still present in the data, as its empty shape.
        assert_eq!(controller.extracted_data()["Design"], json!({}));
    }

    #[tokio::test]
    async fn second_start_while_running_is_a_noop() {
        let gate = Arc::new(Semaphore::new(0));
        let caller = Arc::new(GatedCaller {
            gate: gate.clone(),
            gated_doc: "resume.pdf".to_string(),
        });
        let controller = RunController::new(two_steps(), caller, Duration::ZERO);
        let d = doc();

        let background = {
            let controller = controller.clone();
            let d = d.clone();
            tokio::spawn(async move { controller.start_run(&d).await })
        };
        // Let the first run claim the single-flight slot.
        while !controller.is_running() {
            tokio::task::yield_now().await;
        }
        let progress_before = controller.progress();

        let rejected = controller.start_run(&d).await.unwrap();
        assert!(rejected.is_none());
        assert!(controller.is_running());
        assert_eq!(controller.progress().len(), progress_before.len());
        assert!(controller.extracted_data().is_empty());

        gate.add_permits(8);
        let outcome = background.await.unwrap().unwrap();
        assert!(outcome.is_some());
        assert!(controller.is_complete());
    }

    #[tokio::test]
    async fn superseded_run_cannot_touch_newer_state() {
        let gate = Arc::new(Semaphore::new(0));
        let caller = Arc::new(GatedCaller {
            gate: gate.clone(),
            gated_doc: "old.pdf".to_string(),
        });
        let controller = RunController::new(two_steps(), caller, Duration::ZERO);
        let old_doc = Document::from_bytes("old.pdf", &b"old"[..]);
        let new_doc = Document::from_bytes("new.pdf", &b"fresh"[..]);

        let run_a = {
            let controller = controller.clone();
            let old_doc = old_doc.clone();
            tokio::spawn(async move { controller.start_run(&old_doc).await })
        };
        while !controller.is_running() {
            tokio::task::yield_now().await;
        }

        // New upload: state is reset while run A is still blocked in step 1.
        controller.reset();
        let outcome_b = controller.start_run(&new_doc).await.unwrap().unwrap();
        assert!(controller.is_complete());
        assert_eq!(
            controller.extracted_data()["Design"],
            json!({"Category": [{"tag": "new.pdf"}]})
        );

        // Unblock run A; its late transitions and settlement must be ignored.
        gate.add_permits(8);
        let outcome_a = run_a.await.unwrap().unwrap();
        assert!(outcome_a.is_some());

        assert!(controller.is_complete());
        assert!(!controller.is_running());
        assert_eq!(
            controller.extracted_data()["Design"],
            json!({"Category": [{"tag": "new.pdf"}]})
        );
        let progress = controller.progress();
        assert!(progress
            .values()
            .all(|s| s.status == StepStatus::Completed));
        assert_eq!(controller.errors(), outcome_b.errors);
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let controller = RunController::new(two_steps(), happy_caller(), Duration::ZERO);
        controller.start_run(&doc()).await.unwrap().unwrap();
        assert!(controller.is_complete());

        controller.reset();

        assert!(!controller.is_complete());
        assert!(!controller.is_running());
        assert!(controller.extracted_data().is_empty());
        assert!(controller
            .progress()
            .values()
            .all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn run_task_panic_surfaces_as_run_error() {
        let controller =
            RunController::new(two_steps(), Arc::new(PanickingCaller), Duration::ZERO);

        let res = controller.start_run(&doc()).await;

        assert!(res.is_err());
        assert!(!controller.is_running());
        assert!(!controller.is_complete());
        assert!(controller.run_error().unwrap().contains("failed"));
    }

    #[tokio::test]
    async fn accepted_transitions_are_forwarded_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let controller =
            RunController::new(two_steps(), happy_caller(), Duration::ZERO).with_events(tx);

        controller.start_run(&doc()).await.unwrap().unwrap();
        drop(controller);

        let mut keys = Vec::new();
        while let Some(ev) = rx.recv().await {
            keys.push(ev.key().to_string());
        }
        assert_eq!(
            keys,
            vec![
                "Design",
                "Design",
                "integration_experience",
                "integration_experience"
            ]
        );
    }
}
