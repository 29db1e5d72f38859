use crate::config::StepDescriptor;
use crate::engine::StepCaller;
use crate::model::Document;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde_json::Value;
use std::time::Duration;

/// HTTP implementation of [`StepCaller`].
///
/// One shared client with a whole-request timeout; a timed-out call surfaces
/// as an ordinary error, never a hang.
pub struct HttpStepCaller {
    http: reqwest::Client,
}

impl HttpStepCaller {
    pub fn new(call_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .context("build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl StepCaller for HttpStepCaller {
    async fn call(&self, doc: &Document, step: &StepDescriptor) -> Result<Value> {
        let part = multipart::Part::bytes(doc.bytes.to_vec())
            .file_name(doc.name.clone())
            .mime_str("application/octet-stream")
            .context("build multipart part")?;
        let form = multipart::Form::new().part("file", part);

        let resp = self
            .http
            .post(&step.endpoint)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("post {}", step.endpoint))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("{} returned {}", step.endpoint, status);
        }

        resp.json::<Value>()
            .await
            .with_context(|| format!("decode response from {}", step.endpoint))
    }
}
