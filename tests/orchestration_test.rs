// Integration tests for durable orchestrations: starters, status API,
// terminate/purge, replay and resume

mod common;

use anyhow::anyhow;
use axum::http::{header, StatusCode};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use common::*;
use snippy::config::AgentSettings;
use snippy::metrics::Metrics;
use snippy::orchestration::{
    DurableRuntime, InstanceStore, OrchestrationError, Registry, RuntimeStatus,
};
use snippy::storage::open_in_memory;
use snippy::workflows::multi_agent::{
    multi_agent_orchestrator, CODE_REVIEW_ACTIVITY, DOCUMENTATION_ACTIVITY, LOAD_SNIPPET_ACTIVITY,
    TESTING_ACTIVITY,
};

const INSTANCES: &str = "/runtime/webhooks/durabletask/instances";

#[tokio::test]
async fn test_embeddings_starter_returns_check_status() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = app(test_settings(dir.path()));

    let (status, headers, body) = send(
        &app,
        post_json(
            "/api/orchestrators/embeddings",
            &json!({"projectId": "p1", "name": "durable", "text": "fn durable() {}"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let id = body["id"].as_str().unwrap().to_string();
    let expected = format!("http://localhost:7071{}/{}", INSTANCES, id);
    assert_eq!(body["statusQueryGetUri"], expected.as_str());
    assert_eq!(headers[header::LOCATION], expected.as_str());
    assert_eq!(body["purgeHistoryDeleteUri"], expected.as_str());

    let done = wait_for_instance(&app, &id).await;
    assert_eq!(done["runtimeStatus"], "Completed");
    assert_eq!(done["name"], "embeddings_orchestrator");
    assert_eq!(done["instanceId"], id.as_str());
    assert_eq!(done["output"], json!({"ok": true, "id": "durable"}));

    let (status, _, snippet) = send(&app, get("/api/snippets/durable")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snippet["projectId"], "p1");
    assert_eq!(snippet["embeddingDimensions"], 384);
}

#[tokio::test]
async fn test_location_derived_from_host_header() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.server.public_base_url = None;
    let (_, app) = app(settings);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/orchestrators/embeddings")
        .header(header::HOST, "snippy.internal:8080")
        .body(axum::body::Body::from(r#"{"text": "x"}"#))
        .unwrap();
    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["statusQueryGetUri"]
        .as_str()
        .unwrap()
        .starts_with("http://snippy.internal:8080/runtime/webhooks/durabletask/instances/"));
}

#[tokio::test]
async fn test_batch_embeddings() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.retrieval.chunk_size = 8;
    let (_, app) = app(settings);

    let (status, _, body) = send(
        &app,
        post_json(
            "/api/orchestrators/embeddings",
            &json!({"projectId": "batch", "snippets": [
                {"name": "first", "code": "first snippet body that spans chunks"},
                {"id": "second", "text": "second"}
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let done = wait_for_instance(&app, body["id"].as_str().unwrap()).await;
    assert_eq!(done["runtimeStatus"], "Completed");
    assert_eq!(done["output"]["ok"], true);
    let results = done["output"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["id"], "first");
    assert_eq!(results[1]["id"], "second");

    let (_, _, listed) = send(&app, get("/api/snippets?projectId=batch")).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_lenient_starter_and_bad_json() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = app(test_settings(dir.path()));

    let (status, _, _) = send(&app, post_raw("/api/orchestrators/embeddings", "not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, body) = send(&app, post_json("/api/orchestrators/embeddings", &json!({}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let done = wait_for_instance(&app, body["id"].as_str().unwrap()).await;
    assert_eq!(done["output"], json!({"ok": true, "id": "unnamed"}));
}

#[tokio::test]
async fn test_multi_agent_review() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = app(test_settings(dir.path()));

    send(
        &app,
        post_json(
            "/api/snippets",
            &json!({"name": "printer", "code": "def greet():\n    print('hi')\n"}),
        ),
    )
    .await;

    let (status, _, body) = send(
        &app,
        post_json("/api/orchestrators/multi-agent-review", &json!({"snippetId": "printer"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().unwrap().to_string();

    let done = wait_for_instance(&app, &id).await;
    assert_eq!(done["runtimeStatus"], "Completed");
    let output = &done["output"];
    assert_eq!(output["ok"], true);
    assert_eq!(output["correlationId"], id.as_str());

    let review = &output["agents"]["review"];
    assert_eq!(review["summary"], "Review executed (mock)");
    assert_eq!(review["issues"][0]["type"], "style");

    let markdown = output["agents"]["documentation"]["markdown"].as_str().unwrap();
    assert!(markdown.starts_with("# Code Documentation"));
    assert!(markdown.contains("- Issues found: 1"));
    assert!(markdown.contains("- Adopt logging best practices; avoid prints."));

    let testing = &output["agents"]["testing"];
    assert_eq!(testing["tests"][0]["name"], "test_function_exists");
    assert_eq!(testing["correlationId"], id.as_str());
}

#[tokio::test]
async fn test_multi_agent_publishes_phase() {
    let dir = tempfile::tempdir().unwrap();
    let (state, app) = app(test_settings(dir.path()));

    send(&app, post_json("/api/snippets", &json!({"name": "phased", "code": "x = 1"}))).await;
    let (_, _, body) = send(
        &app,
        post_json("/api/orchestrators/multi-agent-review", &json!({"snippetId": "phased"})),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    let done = wait_for_instance(&app, &id).await;
    assert_eq!(done["runtimeStatus"], "Completed");
    assert_eq!(done["customStatus"], "done");

    let record = state.runtime.status(&id).await.unwrap();
    assert_eq!(record.custom_status, Some(json!("done")));
}

#[tokio::test]
async fn test_multi_agent_refuses_single_iteration_budget() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = test_settings(dir.path());
    settings.agents.max_iterations = 1;
    let (_, app) = app(settings);

    send(&app, post_json("/api/snippets", &json!({"name": "tight", "code": "x = 1"}))).await;
    let (_, _, body) = send(
        &app,
        post_json("/api/orchestrators/multi-agent-review", &json!({"snippetId": "tight"})),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    let done = wait_for_instance(&app, &id).await;
    assert_eq!(done["runtimeStatus"], "Completed");
    assert_eq!(
        done["output"],
        json!({"ok": false, "error": "MAX_AGENT_ITERATIONS too low", "correlationId": id})
    );
    assert_eq!(done["customStatus"], Value::Null);
}

#[tokio::test]
async fn test_multi_agent_requires_snippet_id() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = app(test_settings(dir.path()));

    let (_, _, body) = send(&app, post_json("/api/orchestrators/multi-agent-review", &json!({}))).await;
    let id = body["id"].as_str().unwrap().to_string();
    let done = wait_for_instance(&app, &id).await;
    assert_eq!(
        done["output"],
        json!({"ok": false, "error": "snippetId is required", "correlationId": id})
    );
}

#[tokio::test]
async fn test_instance_management_codes() {
    let dir = tempfile::tempdir().unwrap();
    let (_, app) = app(test_settings(dir.path()));

    let (status, _, _) = send(&app, get(&format!("{}/missing", INSTANCES))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, post_raw(&format!("{}/missing/terminate?reason=x", INSTANCES), "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = send(&app, delete(&format!("{}/missing", INSTANCES))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, _, body) = send(&app, post_json("/api/orchestrators/embeddings", &json!({"text": "x"}))).await;
    let id = body["id"].as_str().unwrap().to_string();
    wait_for_instance(&app, &id).await;

    let instance = format!("{}/{}", INSTANCES, id);
    let (status, _, _) = send(&app, post_raw(&format!("{}/terminate?reason=late", instance), "")).await;
    assert_eq!(status, StatusCode::GONE);
    let (status, _, _) = send(&app, post_json(&format!("{}/raiseEvent/approval", instance), &json!({"ok": true}))).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _, body) = send(&app, delete(&instance)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"instancesDeleted": 1}));
    let (status, _, _) = send(&app, get(&instance)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn runtime_with(registry: Registry) -> (DurableRuntime, InstanceStore) {
    runtime_with_limit(registry, 4)
}

fn runtime_with_limit(registry: Registry, max_activities: usize) -> (DurableRuntime, InstanceStore) {
    let store = InstanceStore::new(open_in_memory().unwrap());
    let runtime = DurableRuntime::new(
        registry,
        store.clone(),
        max_activities,
        Metrics::new().unwrap(),
        CancellationToken::new(),
    );
    (runtime, store)
}

/// Orchestrator that waits on an activity which never finishes
fn stuck_registry() -> Registry {
    let mut registry = Registry::new();
    registry.register_activity("wait_forever", |_input| async {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok::<_, anyhow::Error>(Value::Null)
    });
    registry.register_orchestrator("stuck", |ctx, input| async move {
        let output = ctx.call_activity("wait_forever", input).await?;
        Ok::<_, anyhow::Error>(output)
    });
    registry
}

#[tokio::test]
async fn test_terminate_running_instance() {
    let (runtime, store) = runtime_with(stuck_registry());

    let id = runtime.start_new("stuck", Some("job-1".into()), json!({})).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runtime.status(&id).await.unwrap().status, RuntimeStatus::Running);

    runtime.raise_event(&id, "approval", json!({"approved": true})).await.unwrap();
    assert_eq!(store.events(&id).await.unwrap()[0].name, "approval");

    assert!(matches!(
        runtime.purge(&id).await,
        Err(OrchestrationError::NotRunning { .. })
    ));
    assert!(matches!(
        runtime.start_new("stuck", Some(id.clone()), json!({})).await,
        Err(OrchestrationError::AlreadyExists(_))
    ));

    runtime.terminate(&id, "operator stop").await.unwrap();
    let record = runtime.status(&id).await.unwrap();
    assert_eq!(record.status, RuntimeStatus::Terminated);
    assert_eq!(record.output, Some(json!("operator stop")));

    assert!(matches!(
        runtime.terminate(&id, "again").await,
        Err(OrchestrationError::NotRunning { .. })
    ));
    assert!(matches!(
        runtime.raise_event(&id, "late", Value::Null).await,
        Err(OrchestrationError::NotRunning { .. })
    ));

    // Terminal ids can be reused
    runtime.start_new("stuck", Some(id.clone()), json!({})).await.unwrap();
    runtime.terminate(&id, "done").await.unwrap();
    runtime.purge(&id).await.unwrap();
    assert!(matches!(
        runtime.status(&id).await,
        Err(OrchestrationError::InstanceNotFound(_))
    ));
}

#[tokio::test]
async fn test_concurrent_starts_with_same_id() {
    let (runtime, _) = runtime_with(stuck_registry());

    let (first, second) = tokio::join!(
        runtime.start_new("stuck", Some("twin".into()), json!({})),
        runtime.start_new("stuck", Some("twin".into()), json!({})),
    );
    let outcomes = [first, second];

    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|r| matches!(r, Err(OrchestrationError::AlreadyExists(id)) if id == "twin")));
    runtime.terminate("twin", "test over").await.unwrap();
}

#[tokio::test]
async fn test_unknown_orchestrator_rejected() {
    let (runtime, _) = runtime_with(Registry::new());
    assert!(matches!(
        runtime.start_new("nope", None, json!({})).await,
        Err(OrchestrationError::UnknownOrchestrator(_))
    ));
}

#[tokio::test]
async fn test_resume_replays_recorded_activities() {
    let calls = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    let counter = Arc::clone(&calls);
    registry.register_activity("double", move |input| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let n = input.as_i64().ok_or_else(|| anyhow!("expected a number"))?;
            Ok::<_, anyhow::Error>(json!(n * 2))
        }
    });
    registry.register_orchestrator("pipeline", |ctx, _input| async move {
        let first = ctx.call_activity("double", json!(1)).await?;
        let second = ctx.call_activity("double", json!(10)).await?;
        Ok::<_, anyhow::Error>(json!([first, second]))
    });

    let (runtime, store) = runtime_with(registry);

    // A previous process recorded the first step, then stopped
    store.create("resume-me", "pipeline", &json!({})).await.unwrap();
    store.mark_running("resume-me").await.unwrap();
    store
        .append_history("resume-me", 0, "double", &json!(999))
        .await
        .unwrap();

    assert_eq!(runtime.resume_incomplete().await.unwrap(), 1);
    let record = runtime
        .wait_for_completion("resume-me", Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(record.status, RuntimeStatus::Completed);
    // Recorded output wins over re-execution
    assert_eq!(record.output, Some(json!([999, 20])));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_resume_fails_unregistered_orchestrator() {
    let (runtime, store) = runtime_with(Registry::new());
    store.create("orphan", "removed_orchestrator", &json!({})).await.unwrap();

    assert_eq!(runtime.resume_incomplete().await.unwrap(), 0);
    assert_eq!(
        runtime.status("orphan").await.unwrap().status,
        RuntimeStatus::Failed
    );
}

#[tokio::test]
async fn test_activity_error_fails_instance() {
    let mut registry = Registry::new();
    registry.register_activity("explode", |_input| async {
        Err::<Value, _>(anyhow!("boom"))
    });
    registry.register_orchestrator("fragile", |ctx, input| async move {
        let output = ctx.call_activity("explode", input).await?;
        Ok::<_, anyhow::Error>(output)
    });
    let (runtime, _) = runtime_with(registry);

    let id = runtime.start_new("fragile", None, json!({})).await.unwrap();
    let record = runtime.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(record.status, RuntimeStatus::Failed);
    assert!(record.output.unwrap().as_str().unwrap().contains("boom"));
}

/// Activity that echoes its input and remembers the most calls seen at once
#[derive(Clone, Default)]
struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlight {
    fn register(&self, registry: &mut Registry, name: &str) {
        let tracker = self.clone();
        registry.register_activity(name, move |input| {
            let tracker = tracker.clone();
            async move {
                let now = tracker.current.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                tracker.current.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(input)
            }
        });
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[tokio::test]
async fn test_task_all_limited_bounds_fan_out() {
    let tracker = InFlight::default();
    let mut registry = Registry::new();
    tracker.register(&mut registry, "track");
    registry.register_orchestrator("limited", |ctx, _input| async move {
        let calls: Vec<_> = (0..6).map(|i| ctx.call_activity("track", json!(i))).collect();
        let results = ctx.task_all_limited(calls, 2).await?;
        Ok::<_, anyhow::Error>(json!(results))
    });
    let (runtime, _) = runtime_with_limit(registry, 8);

    let id = runtime.start_new("limited", None, json!({})).await.unwrap();
    let record = runtime.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(record.status, RuntimeStatus::Completed);
    assert_eq!(record.output, Some(json!([0, 1, 2, 3, 4, 5])));
    assert_eq!(tracker.peak(), 2);
}

#[tokio::test]
async fn test_activity_semaphore_caps_concurrency() {
    let tracker = InFlight::default();
    let mut registry = Registry::new();
    tracker.register(&mut registry, "track");
    registry.register_orchestrator("wide", |ctx, _input| async move {
        let calls: Vec<_> = (0..6).map(|i| ctx.call_activity("track", json!(i))).collect();
        let results = ctx.task_all(calls).await?;
        Ok::<_, anyhow::Error>(json!(results))
    });
    let (runtime, _) = runtime_with_limit(registry, 3);

    let id = runtime.start_new("wide", None, json!({})).await.unwrap();
    let record = runtime.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(record.status, RuntimeStatus::Completed);
    assert_eq!(record.output, Some(json!([0, 1, 2, 3, 4, 5])));
    assert_eq!(tracker.peak(), 3);
}

#[tokio::test]
async fn test_task_all_fails_on_first_error() {
    let mut registry = stuck_registry();
    registry.register_activity("explode", |_input| async {
        Err::<Value, _>(anyhow!("boom"))
    });
    registry.register_orchestrator("mixed", |ctx, _input| async move {
        let calls = vec![
            ctx.call_activity("wait_forever", Value::Null),
            ctx.call_activity("explode", Value::Null),
        ];
        let results = ctx.task_all(calls).await?;
        Ok::<_, anyhow::Error>(json!(results))
    });
    let (runtime, _) = runtime_with(registry);

    let id = runtime.start_new("mixed", None, json!({})).await.unwrap();
    // The slow branch never finishes, so completion proves the error short-circuited
    let record = runtime.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(record.status, RuntimeStatus::Failed);
    assert!(record.output.unwrap().as_str().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_custom_status_visible_while_running() {
    let mut registry = stuck_registry();
    registry.register_orchestrator("reporting", |ctx, input| async move {
        ctx.set_custom_status(json!({"phase": "waiting"})).await?;
        let output = ctx.call_activity("wait_forever", input).await?;
        Ok::<_, anyhow::Error>(output)
    });
    let (runtime, _) = runtime_with(registry);

    let id = runtime.start_new("reporting", None, json!({})).await.unwrap();
    let mut record = runtime.status(&id).await.unwrap();
    for _ in 0..100 {
        if record.custom_status.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        record = runtime.status(&id).await.unwrap();
    }

    assert_eq!(record.status, RuntimeStatus::Running);
    assert_eq!(record.custom_status, Some(json!({"phase": "waiting"})));
    runtime.terminate(&id, "test over").await.unwrap();
}

#[tokio::test]
async fn test_multi_agent_guardrails_shape_agent_input() {
    let forwarded = Arc::new(Mutex::new(Vec::new()));
    let code = format!("DROP TABLE users; {}", "x".repeat(400));

    let mut registry = Registry::new();
    let source = code.clone();
    registry.register_activity(LOAD_SNIPPET_ACTIVITY, move |_input| {
        let source = source.clone();
        async move { Ok::<_, anyhow::Error>(json!({"code": source})) }
    });
    for agent in [CODE_REVIEW_ACTIVITY, DOCUMENTATION_ACTIVITY, TESTING_ACTIVITY] {
        let seen = Arc::clone(&forwarded);
        registry.register_activity(agent, move |input| {
            let seen = Arc::clone(&seen);
            async move {
                let code = input["code"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(code);
                Ok::<_, anyhow::Error>(json!({"summary": "stub"}))
            }
        });
    }
    let agents = AgentSettings {
        token_limit: 0,
        content_filter: true,
        ..AgentSettings::default()
    };
    registry.register_orchestrator("guarded", move |ctx, input| {
        multi_agent_orchestrator(ctx, input, agents.clone())
    });
    let (runtime, _) = runtime_with(registry);

    let id = runtime
        .start_new("guarded", None, json!({"snippetId": "risky"}))
        .await
        .unwrap();
    let record = runtime.wait_for_completion(&id, Duration::from_secs(5)).await.unwrap();

    assert_eq!(record.status, RuntimeStatus::Completed);
    let output = record.output.unwrap();
    assert_eq!(
        output["guardrails"],
        json!(["truncated:418->256", "content-filter:blocked"])
    );

    let forwarded = forwarded.lock().unwrap();
    assert_eq!(forwarded.len(), 3);
    for code in forwarded.iter() {
        assert_eq!(code.chars().count(), 256);
        assert!(code.starts_with("[REDACTED] users;"));
        assert!(!code.contains("DROP TABLE"));
    }
}
