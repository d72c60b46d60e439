use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tracing::warn;
use tracing_subscriber::{fmt, EnvFilter};

mod client;
mod dispatch;
mod extract;
mod proxy;
mod repl;
mod session;
mod settings;
mod storage;
mod store;
mod tweaks;

use client::HttpFlowClient;
use dispatch::{FlowTarget, MessageDispatcher};
use settings::{resolve_flow_settings, EnvDefaults, FlowOverrides, FlowSettings};
use storage::{JsonFileStorage, SessionStorage};
use store::SessionStore;
use tweaks::Tweaks;

#[derive(Debug, Parser)]
#[command(name = "flow_chat")]
#[command(about = "Terminal chat client for hosted Langflow flows", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive chat against the configured flow
    Chat {
        #[command(flatten)]
        flow: FlowOverrides,
    },
    /// List persisted chat sessions
    Sessions {
        #[command(flatten)]
        flow: FlowOverrides,
    },
    /// Serve the local same-origin proxy routes
    Proxy {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        #[command(flatten)]
        flow: FlowOverrides,
    },
}

fn open_store(settings: &FlowSettings) -> anyhow::Result<SessionStore> {
    let storage: Arc<dyn SessionStorage> = match &settings.store_path {
        Some(path) => Arc::new(JsonFileStorage::new(path)),
        None => Arc::new(JsonFileStorage::at_default_location()?),
    };
    Ok(SessionStore::load(storage))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let env = EnvDefaults::from_env();
    match cli.command {
        Commands::Chat { flow } => {
            let settings = resolve_flow_settings(&env, &flow)?;
            let store = open_store(&settings)?;
            let client = HttpFlowClient::new(&settings.endpoint);
            let target = FlowTarget {
                flow_id: settings.flow_id,
                workspace_id: settings.workspace_id,
                token: settings.token,
                tweaks: Tweaks::for_graph(settings.graph),
            };
            let store = Arc::new(Mutex::new(store));
            let dispatcher = MessageDispatcher::new(store, Arc::new(client), target);
            let stdin = BufReader::new(tokio::io::stdin());
            repl::run(&dispatcher, stdin, &mut std::io::stdout()).await?;
        }
        Commands::Sessions { flow } => {
            let settings = resolve_flow_settings(&env, &flow)?;
            let store = open_store(&settings)?;
            for (i, s) in store.sessions().iter().enumerate() {
                println!("{:>3}. {}  {}  ({} messages)", i + 1, s.id, s.name, s.messages.len());
            }
        }
        Commands::Proxy { listen, flow } => {
            let settings = resolve_flow_settings(&env, &flow)?;
            let addr: SocketAddr = listen.parse()?;
            let tweaks = Tweaks::for_graph(settings.graph);
            let mut state = proxy::ProxyState::new(settings.endpoint, tweaks);
            match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => state = state.with_metrics(handle),
                Err(e) => warn!(error = %e, "metrics recorder unavailable"),
            }
            proxy::serve(addr, state).await?;
        }
    }
    Ok(())
}
