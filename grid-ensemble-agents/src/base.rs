//! Agent trait, bounded memory and wiring into the dispatcher
//!
//! An agent joins the system through [`attach`], which registers its
//! descriptor and then its handlers. Every agent answers the standard
//! `analyze` and `get_status` methods in addition to its own.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use grid_ensemble_core::agent::AgentDescriptor;
use grid_ensemble_core::dispatch::{Dispatcher, WeakDispatcher};
use grid_ensemble_core::registry::{Handler, HandlerResult};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const ANALYZE: &str = "analyze";
pub const GET_STATUS: &str = "get_status";

/// An agent reachable through the dispatcher
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    fn descriptor(&self) -> AgentDescriptor;

    fn memory(&self) -> &AgentMemory;

    async fn analyze(&self, data: Value) -> Result<Value>;

    async fn status(&self) -> Value {
        let descriptor = self.descriptor();
        json!({
            "agent_id": descriptor.id,
            "agent_name": descriptor.name,
            "agent_type": descriptor.agent_type.to_string(),
            "capabilities": descriptor.capabilities,
            "memory_size": self.memory().len().await,
            "status": "active",
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    /// Agent-specific methods, registered after the standard ones
    fn handlers(self: Arc<Self>) -> Vec<(&'static str, Handler)>;
}

/// Register `agent` and all of its handlers with the dispatcher
pub async fn attach<A: Agent>(agent: Arc<A>, dispatcher: &Dispatcher) {
    let descriptor = agent.descriptor();
    let agent_id = descriptor.id.clone();
    let registry = dispatcher.registry();

    registry.register_agent(descriptor.clone()).await;

    let mut handlers = vec![
        (ANALYZE, async_method(&agent, |agent, params| async move {
            Ok(agent.analyze(params).await?)
        })),
        (GET_STATUS, async_method(&agent, |agent, _params| async move {
            Ok(agent.status().await)
        })),
    ];
    handlers.extend(Arc::clone(&agent).handlers());

    for (method, handler) in handlers {
        registry.register_handler(agent_id.as_str(), method, handler).await;
    }

    let methods = registry.methods(&agent_id).await;
    for capability in &descriptor.capabilities {
        if !methods.contains(capability) {
            warn!("Agent {} declares {} without a handler", agent_id, capability);
        }
    }
    info!("Attached agent {} with {} methods", agent_id, methods.len());
}

/// Bind an async method of `agent` as a handler
pub fn async_method<A, F, Fut>(agent: &Arc<A>, f: F) -> Handler
where
    A: Send + Sync + 'static,
    F: Fn(Arc<A>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let agent = Arc::clone(agent);
    Handler::from_async(move |params| f(Arc::clone(&agent), params))
}

/// Bind a synchronous method of `agent` as a handler
pub fn sync_method<A>(agent: &Arc<A>, f: fn(&A, Value) -> Result<Value>) -> Handler
where
    A: Send + Sync + 'static,
{
    let agent = Arc::clone(agent);
    Handler::from_sync(move |params| Ok(f(&agent, params)?))
}

/// Decode handler params into a typed request
pub fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| Error::invalid_params(e.to_string()))
}

/// Bounded history of an agent's results; the oldest item is evicted first
#[derive(Debug)]
pub struct AgentMemory {
    items: Mutex<VecDeque<Value>>,
    capacity: usize,
    context_window: usize,
}

impl AgentMemory {
    pub fn new(capacity: usize, context_window: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            context_window: context_window.clamp(1, capacity),
        }
    }

    pub async fn record(&self, item: Value) {
        let mut items = self.items.lock().await;
        if items.len() == self.capacity {
            items.pop_front();
        }
        items.push_back(item);
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    pub async fn latest(&self) -> Option<Value> {
        self.items.lock().await.back().cloned()
    }

    /// The most recent items, one JSON document per line
    pub async fn context(&self) -> String {
        let items = self.items.lock().await;
        let skip = items.len().saturating_sub(self.context_window);
        items
            .iter()
            .skip(skip)
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Client used by an agent to call methods on other agents
///
/// The client does not own the dispatcher: the agent holding it is itself
/// owned by the registry, and a strong handle would keep both alive forever.
#[derive(Debug, Clone)]
pub struct PeerClient {
    dispatcher: WeakDispatcher,
}

impl PeerClient {
    pub fn new(dispatcher: &Dispatcher) -> Self {
        Self {
            dispatcher: dispatcher.downgrade(),
        }
    }

    /// Call `agent_id.method`; error envelopes become [`Error::Peer`]
    pub async fn call(&self, agent_id: &str, method: &str, params: Value) -> Result<Value> {
        debug!("Peer call {}.{}", agent_id, method);
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            warn!("Peer call {}.{} after dispatcher shutdown", agent_id, method);
            return Err(Error::Detached {
                agent_id: agent_id.to_string(),
                method: method.to_string(),
            });
        };
        dispatcher
            .send_request(agent_id, method, params)
            .await
            .into_result()
            .map_err(|e| Error::peer(agent_id, method, e))
    }

    /// Call and decode the result into `T`
    pub async fn call_as<T: DeserializeOwned>(
        &self,
        agent_id: &str,
        method: &str,
        params: Value,
    ) -> Result<T> {
        let value = self.call(agent_id, method, params).await?;
        Ok(serde_json::from_value(value)?)
    }
}
