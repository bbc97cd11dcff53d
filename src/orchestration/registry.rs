// Name -> function tables for orchestrators and activities

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::OrchestrationContext;

pub type OrchestratorFn =
    Arc<dyn Fn(OrchestrationContext, Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

pub type ActivityFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct Registry {
    orchestrators: HashMap<String, OrchestratorFn>,
    activities: HashMap<String, ActivityFn>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_orchestrator<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(OrchestrationContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.orchestrators
            .insert(name.to_string(), Arc::new(move |ctx, input| f(ctx, input).boxed()));
        self
    }

    pub fn register_activity<F, Fut>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.activities
            .insert(name.to_string(), Arc::new(move |input| f(input).boxed()));
        self
    }

    pub fn orchestrator(&self, name: &str) -> Option<OrchestratorFn> {
        self.orchestrators.get(name).cloned()
    }

    pub fn activity(&self, name: &str) -> Option<ActivityFn> {
        self.activities.get(name).cloned()
    }

    pub fn has_orchestrator(&self, name: &str) -> bool {
        self.orchestrators.contains_key(name)
    }

    pub fn orchestrator_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.orchestrators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
