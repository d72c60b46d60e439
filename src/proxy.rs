use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::{get, post}, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tracing::{info, warn};

use crate::client::{BearerToken, FlowInvocationRequest, FlowInvoker, HttpFlowClient};
use crate::tweaks::Tweaks;

#[derive(Clone)]
pub struct ProxyState {
    pub http: reqwest::Client,
    pub client: Arc<HttpFlowClient>,
    pub tweaks: Tweaks,
    pub metrics: Option<PrometheusHandle>,
}

impl ProxyState {
    pub fn new(endpoint_base: impl Into<String>, tweaks: Tweaks) -> Self {
        Self {
            http: reqwest::Client::new(),
            client: Arc::new(HttpFlowClient::new(endpoint_base)),
            tweaks,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Same-origin rewrite onto the upstream run endpoint. Body, auth and query
/// pass through; status and body come back verbatim.
async fn forward_run(
    State(state): State<ProxyState>,
    Path((workspace_id, flow_id)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    metrics::counter!("flow_chat_proxy_requests_total", "route" => "run").increment(1);
    let mut url = state.client.run_url(&workspace_id, &flow_id);
    if let Some(q) = query {
        url.push('?');
        url.push_str(&q);
    }
    let mut rb = state
        .http
        .post(&url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body);
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        rb = rb.header(header::AUTHORIZATION, auth.clone());
    }
    match rb.send().await {
        Ok(resp) => {
            let status = StatusCode::from_u16(resp.status().as_u16())
                .unwrap_or(StatusCode::BAD_GATEWAY);
            let content_type = resp.headers().get(header::CONTENT_TYPE).cloned();
            match resp.bytes().await {
                Ok(bytes) => {
                    let mut out = (status, bytes).into_response();
                    if let Some(ct) = content_type {
                        out.headers_mut().insert(header::CONTENT_TYPE, ct);
                    }
                    out
                }
                Err(e) => {
                    warn!(error = %e, "upstream body read failed");
                    StatusCode::BAD_GATEWAY.into_response()
                }
            }
        }
        Err(e) => {
            warn!(error = %e, %workspace_id, %flow_id, "upstream unreachable");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRouteBody {
    #[serde(rename = "input_value")]
    pub input_value: String,
    pub langflow_id: String,
    pub flow_id: String,
    pub application_token: String,
}

async fn chat(
    State(state): State<ProxyState>,
    body: Result<Json<ChatRouteBody>, JsonRejection>,
) -> Response {
    metrics::counter!("flow_chat_proxy_requests_total", "route" => "chat").increment(1);
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "chat route body rejected");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "An unexpected error occurred" })),
            )
                .into_response();
        }
    };
    let request = FlowInvocationRequest::chat(
        body.flow_id,
        body.langflow_id,
        body.input_value,
        state.tweaks.clone(),
    );
    let token = BearerToken::new(body.application_token);
    match state.client.invoke(&request, &token).await {
        Ok(v) => Json(v).into_response(),
        Err(e) => {
            warn!(error = %e, status = ?e.status, "chat route invocation failed");
            let details = e
                .raw_body
                .as_deref()
                .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| json!(raw)))
                .unwrap_or(serde_json::Value::Null);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.message, "details": details })),
            )
                .into_response()
        }
    }
}

async fn render_metrics(State(state): State<ProxyState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/langflow/:workspace_id/api/v1/run/:flow_id", post(forward_run))
        .route("/api/chat", post(chat))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: ProxyState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "proxy listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "ctrl-c handler failed");
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tweaks::FlowGraph;
    use axum::extract::Query;
    use serde_json::Value;
    use std::collections::HashMap;

    async fn spawn(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn upstream() -> Router {
        Router::new().route(
            "/lf/:workspace/api/v1/run/:flow",
            post(
                |Path((workspace, flow)): Path<(String, String)>,
                 Query(q): Query<HashMap<String, String>>,
                 headers: HeaderMap,
                 Json(body): Json<Value>| async move {
                    if body["input_value"] == "fail" {
                        let detail = Json(json!({"detail": "nope"}));
                        return (StatusCode::UNAUTHORIZED, detail).into_response();
                    }
                    Json(json!({
                        "workspace": workspace,
                        "flow": flow,
                        "stream": q.get("stream"),
                        "auth": headers.get("authorization").and_then(|v| v.to_str().ok()),
                        "tweak_count": body["tweaks"].as_object().map(|o| o.len()),
                    }))
                    .into_response()
                },
            ),
        )
    }

    async fn proxy() -> String {
        let up = spawn(upstream()).await;
        let tweaks = Tweaks::for_graph(FlowGraph::Groq);
        let state = ProxyState::new(format!("http://{}/lf", up), tweaks);
        format!("http://{}", spawn(router(state)).await)
    }

    #[tokio::test]
    async fn run_route_forwards_path_query_and_auth() {
        let base = proxy().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/langflow/ws-9/api/v1/run/flow-9?stream=false", base))
            .bearer_auth("tok")
            .json(&json!({"input_value": "hi", "tweaks": {}}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let v: Value = resp.json().await.unwrap();
        assert_eq!(v["workspace"], "ws-9");
        assert_eq!(v["flow"], "flow-9");
        assert_eq!(v["stream"], "false");
        assert_eq!(v["auth"], "Bearer tok");
    }

    #[tokio::test]
    async fn run_route_relays_upstream_errors() {
        let base = proxy().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/langflow/ws/api/v1/run/flow", base))
            .json(&json!({"input_value": "fail"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);
        let v: Value = resp.json().await.unwrap();
        assert_eq!(v["detail"], "nope");
    }

    #[tokio::test]
    async fn chat_route_injects_tweaks_and_token() {
        let base = proxy().await;
        let v: Value = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .json(&json!({
                "input_value": "hi",
                "langflowId": "ws-1",
                "flowId": "flow-1",
                "applicationToken": "app-tok"
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(v["workspace"], "ws-1");
        assert_eq!(v["auth"], "Bearer app-tok");
        assert_eq!(v["tweak_count"], 11);
    }

    #[tokio::test]
    async fn chat_route_reports_failures_as_500() {
        let base = proxy().await;
        let resp = reqwest::Client::new()
            .post(format!("{}/api/chat", base))
            .json(&json!({
                "input_value": "fail",
                "langflowId": "ws",
                "flowId": "flow",
                "applicationToken": "t"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 500);
        let v: Value = resp.json().await.unwrap();
        assert!(v["error"].as_str().unwrap().contains("401"));
        assert_eq!(v["details"]["detail"], "nope");
    }

    #[tokio::test]
    async fn chat_route_answers_unreadable_bodies_with_500() {
        let base = proxy().await;
        let client = reqwest::Client::new();

        let missing_fields = client
            .post(format!("{}/api/chat", base))
            .json(&json!({"input_value": "hi"}))
            .send()
            .await
            .unwrap();
        let malformed = client
            .post(format!("{}/api/chat", base))
            .header("content-type", "application/json")
            .body("{oops")
            .send()
            .await
            .unwrap();

        for resp in [missing_fields, malformed] {
            assert_eq!(resp.status(), 500);
            let v: Value = resp.json().await.unwrap();
            assert_eq!(v["error"], "An unexpected error occurred");
        }
    }

    #[tokio::test]
    async fn metrics_route_is_absent_without_recorder() {
        let base = proxy().await;
        let resp = reqwest::get(format!("{}/metrics", base)).await.unwrap();
        assert_eq!(resp.status(), 404);
    }
}
