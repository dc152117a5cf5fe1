//! Request dispatch and broadcast over the agent registry
//!
//! [`Dispatcher::handle`] resolves `(agent_id, method)` to a handler and
//! runs it under a deadline. Every failure mode is reported inside the
//! returned [`McpResponse`]; dispatch itself never errors:
//!
//! | Condition                         | Error code         |
//! |-----------------------------------|--------------------|
//! | agent id not registered           | `AGENT_NOT_FOUND`  |
//! | no handler for the method         | `METHOD_NOT_FOUND` |
//! | handler returned an error/panicked| `EXECUTION_ERROR`  |
//! | deadline elapsed                  | `TIMEOUT`          |
//!
//! The registry lock is released before the handler runs, so handlers can
//! dispatch to other agents.

use crate::envelope::{normalize_params, McpRequest, McpResponse, Outcome, ResponseError};
use crate::registry::{AgentRegistry, Handler, WeakRegistry};
use crate::settings::DispatchSettings;
use futures::future::join_all;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Dispatches requests to registered handlers
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: AgentRegistry,
    settings: DispatchSettings,
}

enum InvokeError {
    Failed(String),
    Panicked(String),
    TimedOut(Duration),
}

impl Dispatcher {
    /// Create a dispatcher over a fresh registry with default settings
    pub fn new() -> Self {
        Self::with_registry(AgentRegistry::new(), DispatchSettings::default())
    }

    pub fn with_registry(registry: AgentRegistry, settings: DispatchSettings) -> Self {
        Self { registry, settings }
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// A handle for agents that dispatch to their peers
    ///
    /// Handlers live inside the registry, so a handler holding a full
    /// [`Dispatcher`] would keep its own registry alive forever.
    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher {
            registry: self.registry.downgrade(),
            settings: self.settings.clone(),
        }
    }

    /// Send a request using the configured default deadline
    pub async fn send_request(&self, agent_id: &str, method: &str, params: Value) -> McpResponse {
        self.handle(McpRequest::new(agent_id, method, params)).await
    }

    /// Send a request with an explicit deadline; `Duration::ZERO` disables it
    pub async fn send_request_with_timeout(
        &self,
        agent_id: &str,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> McpResponse {
        let deadline = (!timeout.is_zero()).then_some(timeout);
        self.dispatch(McpRequest::new(agent_id, method, params), deadline)
            .await
    }

    /// Dispatch a prepared request using the configured default deadline
    pub async fn handle(&self, request: McpRequest) -> McpResponse {
        let deadline = self.settings.default_timeout();
        self.dispatch(request, deadline).await
    }

    async fn dispatch(&self, mut request: McpRequest, deadline: Option<Duration>) -> McpResponse {
        debug!(
            "Dispatching {}.{} (request {})",
            request.agent_id, request.method, request.id
        );

        if !self.registry.is_registered(&request.agent_id).await {
            warn!("Agent not found: {}", request.agent_id);
            let error = ResponseError::agent_not_found(&request.agent_id);
            return McpResponse::failure(&request, error);
        }

        let Some(handler) = self
            .registry
            .get_handler(&request.agent_id, &request.method)
            .await
        else {
            warn!(
                "Method not found: {}.{}",
                request.agent_id, request.method
            );
            let error = ResponseError::method_not_found(&request.agent_id, &request.method);
            return McpResponse::failure(&request, error);
        };

        let params = normalize_params(std::mem::take(&mut request.params));
        match invoke(&handler, params, deadline).await {
            Ok(result) => McpResponse::success(&request, result),
            Err(failure) => {
                let error = describe_failure(&request.agent_id, &request.method, failure);
                McpResponse::failure(&request, error)
            }
        }
    }

    /// Invoke `method` on every registered agent that implements it
    ///
    /// Agents without the method are skipped rather than reported. The
    /// handlers run concurrently on the calling task, each under the
    /// broadcast deadline.
    pub async fn broadcast(&self, method: &str, params: Value) -> BroadcastReport {
        let params = normalize_params(params);
        let deadline = self.settings.broadcast_timeout();
        let targets = self.registry.handlers_for(method).await;

        let calls = targets.into_iter().map(|(agent_id, handler)| {
            let params = params.clone();
            async move {
                let outcome = match invoke(&handler, params, deadline).await {
                    Ok(result) => Outcome::Result(result),
                    Err(failure) => Outcome::Error(describe_failure(&agent_id, method, failure)),
                };
                (agent_id, outcome)
            }
        });

        let outcomes: BTreeMap<String, Outcome> = join_all(calls).await.into_iter().collect();
        debug!("Broadcast {} reached {} agents", method, outcomes.len());

        BroadcastReport {
            method: method.to_string(),
            outcomes,
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning counterpart of [`Dispatcher`]
#[derive(Debug, Clone)]
pub struct WeakDispatcher {
    registry: WeakRegistry,
    settings: DispatchSettings,
}

impl WeakDispatcher {
    /// `None` once every owning [`Dispatcher`] and registry is gone
    pub fn upgrade(&self) -> Option<Dispatcher> {
        let registry = self.registry.upgrade()?;
        Some(Dispatcher::with_registry(registry, self.settings.clone()))
    }
}

async fn invoke(
    handler: &Handler,
    params: Value,
    deadline: Option<Duration>,
) -> std::result::Result<Value, InvokeError> {
    let handler = handler.clone();
    let call = AssertUnwindSafe(async move { handler.call(params).await }).catch_unwind();

    let outcome = match deadline {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(InvokeError::TimedOut(limit)),
        },
        None => call.await,
    };

    match outcome {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(InvokeError::Failed(err.to_string())),
        Err(panic) => Err(InvokeError::Panicked(panic_message(panic))),
    }
}

fn describe_failure(agent_id: &str, method: &str, failure: InvokeError) -> ResponseError {
    match failure {
        InvokeError::Failed(message) => {
            error!("Error executing handler {}.{}: {}", agent_id, method, message);
            ResponseError::execution(message)
        }
        InvokeError::Panicked(message) => {
            error!("Handler {}.{} panicked: {}", agent_id, method, message);
            ResponseError::execution(format!("handler panicked: {}", message))
        }
        InvokeError::TimedOut(limit) => {
            let timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX);
            warn!("Handler {}.{} timed out after {}ms", agent_id, method, timeout_ms);
            ResponseError::timeout(agent_id, method, timeout_ms)
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Per-agent outcomes of a broadcast
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BroadcastReport {
    pub method: String,
    pub outcomes: BTreeMap<String, Outcome>,
}

impl BroadcastReport {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, agent_id: &str) -> Option<&Outcome> {
        self.outcomes.get(agent_id)
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes.values().filter(|o| !o.is_ok()).count()
    }

    /// Outcomes keyed by agent id, as a JSON object
    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.outcomes)
    }
}
