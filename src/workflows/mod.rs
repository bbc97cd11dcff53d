// Orchestrators and activities hosted by the durable runtime

pub mod embeddings;
pub mod multi_agent;

use crate::agents::AgentTeam;
use crate::config::constants::{EMBEDDINGS_ORCHESTRATOR, MULTI_AGENT_ORCHESTRATOR};
use crate::config::Settings;
use crate::orchestration::Registry;
use crate::storage::SnippetService;

/// Services the activities need; cloned into every registered closure
#[derive(Clone)]
pub struct WorkflowDeps {
    pub snippets: SnippetService,
    pub agents: AgentTeam,
}

/// Register every orchestrator and activity
pub fn register_all(registry: &mut Registry, deps: WorkflowDeps, settings: &Settings) {
    let chunk_size = settings.retrieval.chunk_size;
    registry.register_orchestrator(EMBEDDINGS_ORCHESTRATOR, move |ctx, input| {
        embeddings::embeddings_orchestrator(ctx, input, chunk_size)
    });

    let agent_settings = settings.agents.clone();
    registry.register_orchestrator(MULTI_AGENT_ORCHESTRATOR, move |ctx, input| {
        multi_agent::multi_agent_orchestrator(ctx, input, agent_settings.clone())
    });

    macro_rules! activity {
        ($name:expr, $f:path) => {{
            let deps = deps.clone();
            registry.register_activity($name, move |input| $f(deps.clone(), input));
        }};
    }

    activity!(embeddings::EMBED_CHUNK_ACTIVITY, embeddings::embed_chunk_activity);
    activity!(embeddings::PERSIST_SNIPPET_ACTIVITY, embeddings::persist_snippet_activity);
    activity!(multi_agent::LOAD_SNIPPET_ACTIVITY, multi_agent::load_snippet_activity);
    activity!(multi_agent::CODE_REVIEW_ACTIVITY, multi_agent::code_review_agent_activity);
    activity!(multi_agent::DOCUMENTATION_ACTIVITY, multi_agent::documentation_agent_activity);
    activity!(multi_agent::TESTING_ACTIVITY, multi_agent::testing_agent_activity);
}
