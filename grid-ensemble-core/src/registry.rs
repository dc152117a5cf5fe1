//! Name-based registry of agents and their method handlers
//!
//! The registry is a map of agent descriptors plus a map of maps from
//! `agent_id` to `method` to [`Handler`]. Both registrations are upserts:
//! registering the same agent or `(agent, method)` pair again replaces the
//! previous entry.

use crate::agent::AgentDescriptor;
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Result type returned by every handler
pub type HandlerResult = anyhow::Result<Value>;

type HandlerFn = dyn Fn(Value) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A callable operation scoped to one agent
///
/// Synchronous and asynchronous callables are both stored behind the same
/// async signature, so dispatch never needs to know which kind it holds.
#[derive(Clone)]
pub struct Handler {
    inner: Arc<HandlerFn>,
}

impl Handler {
    /// Wrap an async callable
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let f = Arc::new(f);
        Self {
            inner: Arc::new(move |params: Value| -> BoxFuture<'static, HandlerResult> {
                let f = Arc::clone(&f);
                Box::pin(async move { f(params).await })
            }),
        }
    }

    /// Wrap a synchronous callable
    pub fn from_sync<F>(f: F) -> Self
    where
        F: Fn(Value) -> HandlerResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            inner: Arc::new(move |params: Value| -> BoxFuture<'static, HandlerResult> {
                let f = Arc::clone(&f);
                Box::pin(async move { f(params) })
            }),
        }
    }

    /// Invoke the handler with `params`
    ///
    /// The callable runs when the returned future is first polled.
    pub fn call(&self, params: Value) -> BoxFuture<'static, HandlerResult> {
        (self.inner)(params)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, AgentDescriptor>,
    handlers: HashMap<String, HashMap<String, Handler>>,
}

/// Shared registry of agents and handlers
#[derive(Clone, Default)]
pub struct AgentRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that does not keep the registry alive
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            state: Arc::downgrade(&self.state),
        }
    }

    /// Register or replace an agent descriptor
    ///
    /// An empty handler set is created for a new id; handlers already
    /// registered under the id are kept.
    pub async fn register_agent(&self, descriptor: AgentDescriptor) {
        let descriptor = descriptor.stamped(Utc::now());
        let agent_id = descriptor.id.clone();

        let mut state = self.state.write().await;
        let replaced = state.agents.insert(agent_id.clone(), descriptor).is_some();
        state.handlers.entry(agent_id.clone()).or_default();
        drop(state);

        if replaced {
            info!("Agent re-registered: {}", agent_id);
        } else {
            info!("Agent registered: {}", agent_id);
        }
    }

    /// Register or replace the handler for `(agent_id, method)`
    ///
    /// The agent does not have to be registered yet; such a handler is
    /// stored but cannot be dispatched to until the agent registers.
    pub async fn register_handler<A, M>(&self, agent_id: A, method: M, handler: Handler)
    where
        A: Into<String>,
        M: Into<String>,
    {
        let agent_id = agent_id.into();
        let method = method.into();

        let mut state = self.state.write().await;
        state
            .handlers
            .entry(agent_id.clone())
            .or_default()
            .insert(method.clone(), handler);
        drop(state);

        info!("Handler registered: {}.{}", agent_id, method);
    }

    pub async fn get_agent(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.state.read().await.agents.get(agent_id).cloned()
    }

    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.state.read().await.agents.contains_key(agent_id)
    }

    pub async fn get_handler(&self, agent_id: &str, method: &str) -> Option<Handler> {
        self.state
            .read()
            .await
            .handlers
            .get(agent_id)
            .and_then(|methods| methods.get(method))
            .cloned()
    }

    /// All registered agents, sorted by id
    pub async fn list_agents(&self) -> Vec<AgentDescriptor> {
        let state = self.state.read().await;
        let mut agents: Vec<_> = state.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));
        agents
    }

    pub async fn agent_count(&self) -> usize {
        self.state.read().await.agents.len()
    }

    /// Registered method names of one agent, sorted
    pub async fn methods(&self, agent_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut methods: Vec<String> = state
            .handlers
            .get(agent_id)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        methods.sort();
        methods
    }

    /// Handlers for `method` on every registered agent that has one
    pub(crate) async fn handlers_for(&self, method: &str) -> Vec<(String, Handler)> {
        let state = self.state.read().await;
        let mut targets: Vec<(String, Handler)> = state
            .agents
            .keys()
            .filter_map(|agent_id| {
                state
                    .handlers
                    .get(agent_id)
                    .and_then(|methods| methods.get(method))
                    .map(|handler| (agent_id.clone(), handler.clone()))
            })
            .collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        debug!("{} agents handle {}", targets.len(), method);
        targets
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry").finish_non_exhaustive()
    }
}

/// Non-owning handle to an [`AgentRegistry`]
///
/// Handlers that call back into the registry hold one of these, so the
/// registry and everything it stores can be freed once its owners drop it.
#[derive(Clone)]
pub struct WeakRegistry {
    state: Weak<RwLock<RegistryState>>,
}

impl WeakRegistry {
    pub fn upgrade(&self) -> Option<AgentRegistry> {
        self.state.upgrade().map(|state| AgentRegistry { state })
    }
}

impl fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("live", &(self.state.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;
    use serde_json::json;

    fn descriptor(id: &str, name: &str) -> AgentDescriptor {
        AgentDescriptor::builder()
            .id(id)
            .name(name)
            .agent_type(AgentType::Custom("test".to_string()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_agent() {
        let registry = AgentRegistry::new();
        registry.register_agent(descriptor("test-agent", "Test Agent")).await;

        let agent = registry.get_agent("test-agent").await.unwrap();
        assert_eq!(agent.name, "Test Agent");
        assert!(agent.registered_at.is_some());
        assert!(registry.methods("test-agent").await.is_empty());
        assert!(registry.get_agent("other").await.is_none());
    }

    #[tokio::test]
    async fn test_reregistration_keeps_latest_metadata_and_handlers() {
        let registry = AgentRegistry::new();
        registry.register_agent(descriptor("agent1", "First")).await;
        registry
            .register_handler("agent1", "ping", Handler::from_sync(|_| Ok(json!("pong"))))
            .await;
        registry.register_agent(descriptor("agent1", "Second")).await;

        assert_eq!(registry.agent_count().await, 1);
        assert_eq!(registry.get_agent("agent1").await.unwrap().name, "Second");
        assert!(registry.get_handler("agent1", "ping").await.is_some());
    }

    #[tokio::test]
    async fn test_register_handler_last_write_wins() {
        let registry = AgentRegistry::new();
        registry.register_agent(descriptor("agent1", "Agent 1")).await;
        registry
            .register_handler("agent1", "version", Handler::from_sync(|_| Ok(json!(1))))
            .await;
        registry
            .register_handler(
                "agent1",
                "version",
                Handler::from_async(|_| async { Ok(json!(2)) }),
            )
            .await;

        let handler = registry.get_handler("agent1", "version").await.unwrap();
        assert_eq!(handler.call(json!({})).await.unwrap(), json!(2));
        assert_eq!(registry.methods("agent1").await, vec!["version".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_for_unregistered_agent_is_stored() {
        let registry = AgentRegistry::new();
        registry
            .register_handler("late-agent", "ping", Handler::from_sync(|_| Ok(json!("pong"))))
            .await;

        assert!(!registry.is_registered("late-agent").await);
        assert!(registry.get_handler("late-agent", "ping").await.is_some());
        assert!(registry.handlers_for("ping").await.is_empty());

        registry.register_agent(descriptor("late-agent", "Late")).await;
        assert_eq!(registry.handlers_for("ping").await.len(), 1);
    }

    #[tokio::test]
    async fn test_list_agents_sorted() {
        let registry = AgentRegistry::new();
        registry.register_agent(descriptor("agent2", "Agent 2")).await;
        registry.register_agent(descriptor("agent1", "Agent 1")).await;

        let ids: Vec<_> = registry
            .list_agents()
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec!["agent1", "agent2"]);
    }

    #[test]
    fn test_async_handler_body_runs_on_first_poll() {
        let handler = Handler::from_async(|params: Value| {
            let n = params["readings"].as_array().unwrap().len();
            async move { Ok(json!(n)) }
        });
        // Building the future must not run the callable.
        let pending = handler.call(json!({}));
        drop(pending);
    }

    #[tokio::test]
    async fn test_weak_registry_does_not_keep_state_alive() {
        let registry = AgentRegistry::new();
        registry.register_agent(descriptor("agent1", "Agent 1")).await;
        let weak = registry.downgrade();

        let upgraded = weak.upgrade().unwrap();
        assert!(upgraded.is_registered("agent1").await);
        drop(upgraded);

        drop(registry);
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_sync_handler_receives_params() {
        let handler = Handler::from_sync(|params| Ok(json!({ "echo": params["data"].clone() })));
        let result = handler.call(json!({ "data": "test" })).await.unwrap();
        assert_eq!(result["echo"], "test");
    }
}
