//! Run orchestration.
//!
//! This module owns the analysis run lifecycle: the controller enforces one
//! run at a time and screens out stale events, the runner drives the step
//! sequence itself. Presentation layers call into this module and observe it
//! through the progress map and the optional event feed.

mod controller;
pub(crate) mod runner;

pub use controller::RunController;
pub use runner::StepRunner;
