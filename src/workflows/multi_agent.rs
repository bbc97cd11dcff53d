// Multi-agent workflow: load -> guardrails -> review -> (docs, tests)

use anyhow::Result;
use serde_json::{json, Value};

use super::WorkflowDeps;
use crate::agents::apply_guardrails;
use crate::config::constants::DEFAULT_PROJECT;
use crate::config::AgentSettings;
use crate::orchestration::OrchestrationContext;

pub const LOAD_SNIPPET_ACTIVITY: &str = "load_snippet_activity";
pub const CODE_REVIEW_ACTIVITY: &str = "code_review_agent_activity";
pub const DOCUMENTATION_ACTIVITY: &str = "documentation_agent_activity";
pub const TESTING_ACTIVITY: &str = "testing_agent_activity";

const DEFAULT_WORKFLOW: &str = "code-review-and-docs";

fn str_field<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

pub async fn multi_agent_orchestrator(
    ctx: OrchestrationContext,
    input: Value,
    agents: AgentSettings,
) -> Result<Value> {
    let corr = ctx.instance_id().to_string();
    let project_id = str_field(&input, "projectId").unwrap_or(DEFAULT_PROJECT);
    let snippet_id = str_field(&input, "snippetId")
        .or_else(|| str_field(&input, "name"))
        .unwrap_or("");
    let workflow = str_field(&input, "workflow").unwrap_or(DEFAULT_WORKFLOW);

    tracing::info!(instance = %corr, project = %project_id, snippet = %snippet_id, workflow, "Multi-agent orchestration start");

    if snippet_id.is_empty() {
        return Ok(json!({"ok": false, "error": "snippetId is required", "correlationId": corr}));
    }

    // One cycle needs two steps: review, then docs/tests
    if agents.max_iterations < 2 {
        return Ok(json!({"ok": false, "error": "MAX_AGENT_ITERATIONS too low", "correlationId": corr}));
    }

    let snippet = ctx
        .call_activity(LOAD_SNIPPET_ACTIVITY, json!({"name": snippet_id}))
        .await?;
    let code = str_field(&snippet, "code").unwrap_or("");

    let (safe_code, guardrail_issues) =
        apply_guardrails(code, agents.token_limit, agents.content_filter);
    if !guardrail_issues.is_empty() {
        tracing::warn!(instance = %corr, issues = ?guardrail_issues, "Guardrails modified agent input");
    }

    ctx.set_custom_status(json!("reviewing")).await?;
    let review = ctx
        .call_activity(
            CODE_REVIEW_ACTIVITY,
            json!({"code": safe_code, "projectId": project_id, "correlationId": corr}),
        )
        .await?;

    ctx.set_custom_status(json!("documenting")).await?;
    let followups = vec![
        ctx.call_activity(
            DOCUMENTATION_ACTIVITY,
            json!({"code": safe_code, "review": review, "projectId": project_id, "correlationId": corr}),
        ),
        ctx.call_activity(
            TESTING_ACTIVITY,
            json!({"code": safe_code, "review": review, "projectId": project_id, "correlationId": corr}),
        ),
    ];
    let mut results = ctx
        .task_all_limited(followups, agents.max_concurrent)
        .await?
        .into_iter();
    let documentation = results.next().unwrap_or(Value::Null);
    let testing = results.next().unwrap_or(Value::Null);

    ctx.set_custom_status(json!("done")).await?;
    tracing::info!(instance = %corr, "Multi-agent orchestration done");

    Ok(json!({
        "ok": true,
        "correlationId": corr,
        "guardrails": guardrail_issues,
        "agents": {
            "review": review,
            "documentation": documentation,
            "testing": testing,
        }
    }))
}

/// Snippet document without its embedding, or `{}` when missing
pub async fn load_snippet_activity(deps: WorkflowDeps, input: Value) -> Result<Value> {
    let Some(name) = str_field(&input, "name").filter(|n| !n.is_empty()) else {
        return Ok(json!({}));
    };

    match deps.snippets.get(name).await {
        Ok(Some(snippet)) => Ok(json!({
            "id": snippet.id,
            "name": snippet.name,
            "projectId": snippet.project_id,
            "code": snippet.code,
        })),
        Ok(None) => Ok(json!({})),
        Err(e) => {
            tracing::error!(snippet = %name, "load_snippet failed: {:#}", e);
            Ok(json!({}))
        }
    }
}

pub async fn code_review_agent_activity(deps: WorkflowDeps, input: Value) -> Result<Value> {
    let code = str_field(&input, "code").unwrap_or("");
    let corr = str_field(&input, "correlationId").unwrap_or("");
    Ok(deps.agents.review(code, corr).await)
}

pub async fn documentation_agent_activity(deps: WorkflowDeps, input: Value) -> Result<Value> {
    let code = str_field(&input, "code").unwrap_or("");
    let corr = str_field(&input, "correlationId").unwrap_or("");
    let review = input.get("review").cloned().unwrap_or_else(|| json!({}));
    Ok(deps.agents.document(code, &review, corr).await)
}

pub async fn testing_agent_activity(deps: WorkflowDeps, input: Value) -> Result<Value> {
    let code = str_field(&input, "code").unwrap_or("");
    let corr = str_field(&input, "correlationId").unwrap_or("");
    let review = input.get("review").cloned().unwrap_or_else(|| json!({}));
    Ok(deps.agents.test(code, &review, corr).await)
}
