use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::tweaks::Tweaks;

/// Caller-supplied application token. Never printed, never logged.
#[derive(Clone)]
pub struct BearerToken(String);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self { Self(token.into()) }

    pub fn expose(&self) -> &str { &self.0 }
}

impl std::fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BearerToken(<redacted>)")
    }
}

impl std::fmt::Display for BearerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowInvocationRequest {
    pub flow_id: String,
    pub workspace_id: String,
    pub input_value: String,
    pub input_type: &'static str,
    pub output_type: &'static str,
    pub tweaks: Tweaks,
    pub stream: bool,
}

impl FlowInvocationRequest {
    pub fn chat(
        flow_id: impl Into<String>,
        workspace_id: impl Into<String>,
        input_value: impl Into<String>,
        tweaks: Tweaks,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            workspace_id: workspace_id.into(),
            input_value: input_value.into(),
            input_type: "chat",
            output_type: "chat",
            tweaks,
            stream: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunFlowBody<'a> {
    input_value: &'a str,
    input_type: &'a str,
    output_type: &'a str,
    tweaks: &'a Tweaks,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub message: String,
    pub status: Option<u16>,
    pub raw_body: Option<String>,
}

impl TransportError {
    fn network(e: reqwest::Error) -> Self {
        Self { message: format!("flow request failed: {e}"), status: None, raw_body: None }
    }
}

#[async_trait]
pub trait FlowInvoker: Send + Sync {
    /// Runs the flow once. On 2xx the JSON body comes back untouched.
    async fn invoke(
        &self,
        request: &FlowInvocationRequest,
        token: &BearerToken,
    ) -> Result<Value, TransportError>;
}

#[derive(Clone)]
pub struct HttpFlowClient {
    http: reqwest::Client,
    endpoint_base: String,
}

impl HttpFlowClient {
    pub fn new(endpoint_base: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint_base: endpoint_base.into() }
    }

    pub fn run_url(&self, workspace_id: &str, flow_id: &str) -> String {
        format!(
            "{}/{}/api/v1/run/{}",
            self.endpoint_base.trim_end_matches('/'),
            workspace_id,
            flow_id
        )
    }
}

#[async_trait]
impl FlowInvoker for HttpFlowClient {
    async fn invoke(
        &self,
        request: &FlowInvocationRequest,
        token: &BearerToken,
    ) -> Result<Value, TransportError> {
        let url = self.run_url(&request.workspace_id, &request.flow_id);
        let body = RunFlowBody {
            input_value: &request.input_value,
            input_type: request.input_type,
            output_type: request.output_type,
            tweaks: &request.tweaks,
        };
        debug!(%url, tweaks = request.tweaks.node_count(), "invoking flow");
        let resp = self
            .http
            .post(&url)
            .query(&[("stream", request.stream)])
            .bearer_auth(token.expose())
            .json(&body)
            .send()
            .await
            .map_err(TransportError::network)?;

        let status = resp.status();
        let text = resp.text().await.map_err(TransportError::network)?;
        if !status.is_success() {
            return Err(TransportError {
                message: format!("flow request failed with status {status}"),
                status: Some(status.as_u16()),
                raw_body: Some(text),
            });
        }
        serde_json::from_str(&text).map_err(|e| TransportError {
            message: format!("flow response is not JSON: {e}"),
            status: Some(status.as_u16()),
            raw_body: Some(text),
        })
    }
}
