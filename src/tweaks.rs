use clap::ValueEnum;
use serde::Serialize;
use serde_json::{Map, Value};

/// Deployed flow graph versions we know the node ids of. The remote service
/// silently ignores unknown ids, so these lists must track the deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FlowGraph {
    /// Retrieval + web search agent on Gemini.
    #[default]
    Agent,
    /// Retrieval pipeline on Groq, as used by the server-side chat route.
    Groq,
}

const SHARED_NODES: &[&str] = &[
    "ChatInput-Uwwvb",
    "ParseData-4Sb3V",
    "Prompt-ZgxaM",
    "SplitText-nOYZS",
    "ChatOutput-5quGo",
    "AstraDB-uQPjR",
    "AstraDB-0uLmd",
    "File-7PLSY",
    "AzureOpenAIEmbeddings-Lp3gW",
    "AzureOpenAIEmbeddings-7xuTF",
];

const AGENT_NODES: &[&str] = &[
    "GoogleGenerativeAIModel-Sf9GG",
    "DuckDuckGoSearch-j8oGC",
    "Agent-0fISA",
];

const GROQ_NODES: &[&str] = &["GroqModel-4Sn1l"];

impl FlowGraph {
    pub fn node_ids(self) -> impl Iterator<Item = &'static str> {
        let extra = match self {
            FlowGraph::Agent => AGENT_NODES,
            FlowGraph::Groq => GROQ_NODES,
        };
        SHARED_NODES.iter().chain(extra.iter()).copied()
    }
}

/// Per-node overrides sent with every invocation. Each node currently maps to
/// an empty object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Tweaks(Map<String, Value>);

impl Tweaks {
    pub fn for_graph(graph: FlowGraph) -> Self {
        Self(
            graph
                .node_ids()
                .map(|id| (id.to_string(), Value::Object(Map::new())))
                .collect(),
        )
    }

    pub fn node_count(&self) -> usize { self.0.len() }

    pub fn contains(&self, node_id: &str) -> bool { self.0.contains_key(node_id) }
}

impl Default for Tweaks {
    fn default() -> Self { Self::for_graph(FlowGraph::default()) }
}
