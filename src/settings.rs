use std::path::PathBuf;

use crate::client::BearerToken;
use crate::tweaks::FlowGraph;

pub const DEFAULT_ENDPOINT: &str = "https://api.langflow.astra.datastax.com/lf";
pub const DEFAULT_FLOW_ID: &str = "defaultFlowIdOrName";
pub const DEFAULT_WORKSPACE_ID: &str = "defaultLangflowId";
pub const DEFAULT_TOKEN: &str = "defaultApplicationToken";

/// Values picked up from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvDefaults {
    pub endpoint: Option<String>,
    pub flow_id: Option<String>,
    pub workspace_id: Option<String>,
    pub token: Option<String>,
    pub store_path: Option<PathBuf>,
}

impl EnvDefaults {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            endpoint: var("FLOW_CHAT_ENDPOINT"),
            flow_id: var("FLOW_CHAT_FLOW_ID"),
            workspace_id: var("FLOW_CHAT_WORKSPACE_ID"),
            token: var("FLOW_CHAT_TOKEN"),
            store_path: var("FLOW_CHAT_STORE").map(PathBuf::from),
        }
    }
}

/// Values given on the command line; these win over the environment.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct FlowOverrides {
    /// Base URL of the flow execution API
    #[arg(long)]
    pub endpoint: Option<String>,
    #[arg(long)]
    pub flow_id: Option<String>,
    #[arg(long)]
    pub workspace_id: Option<String>,
    /// Where chat sessions are persisted
    #[arg(long)]
    pub store: Option<PathBuf>,
    /// Node id set of the deployed flow graph
    #[arg(long, value_enum, default_value_t = FlowGraph::Agent)]
    pub graph: FlowGraph,
}

#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub endpoint: String,
    pub flow_id: String,
    pub workspace_id: String,
    pub token: BearerToken,
    /// `None` means the default data directory.
    pub store_path: Option<PathBuf>,
    pub graph: FlowGraph,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid endpoint {endpoint:?}: {source}")]
pub struct InvalidEndpoint {
    pub endpoint: String,
    #[source]
    pub source: url::ParseError,
}

pub fn resolve_flow_settings(
    env: &EnvDefaults,
    overrides: &FlowOverrides,
) -> Result<FlowSettings, InvalidEndpoint> {
    let endpoint = overrides
        .endpoint
        .clone()
        .or_else(|| env.endpoint.clone())
        .unwrap_or_else(|| DEFAULT_ENDPOINT.into());
    url::Url::parse(&endpoint)
        .map_err(|source| InvalidEndpoint { endpoint: endpoint.clone(), source })?;

    Ok(FlowSettings {
        endpoint,
        flow_id: overrides
            .flow_id
            .clone()
            .or_else(|| env.flow_id.clone())
            .unwrap_or_else(|| DEFAULT_FLOW_ID.into()),
        workspace_id: overrides
            .workspace_id
            .clone()
            .or_else(|| env.workspace_id.clone())
            .unwrap_or_else(|| DEFAULT_WORKSPACE_ID.into()),
        token: BearerToken::new(env.token.clone().unwrap_or_else(|| DEFAULT_TOKEN.into())),
        store_path: overrides.store.clone().or_else(|| env.store_path.clone()),
        graph: overrides.graph,
    })
}
