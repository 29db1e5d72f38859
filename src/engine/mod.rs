//! Remote extraction calls.
//!
//! The orchestrator talks to the document-understanding service through the
//! [`StepCaller`] seam; the production implementation posts multipart HTTP,
//! tests script responses without a network.

mod http;
pub(crate) mod unwrap;

pub use http::HttpStepCaller;

use crate::config::StepDescriptor;
use crate::model::Document;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// One remote extraction call: accepts a document, returns the raw JSON
/// response body, may fail (network error, non-2xx status, timeout).
#[async_trait]
pub trait StepCaller: Send + Sync {
    async fn call(&self, doc: &Document, step: &StepDescriptor) -> Result<Value>;
}
