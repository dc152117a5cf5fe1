//! Core registry and dispatch layer for Grid Ensemble
//!
//! Agents publish an [`agent::AgentDescriptor`] and a set of named
//! [`registry::Handler`]s. Other components reach them only through the
//! [`dispatch::Dispatcher`], addressing `(agent_id, method)` by name and
//! receiving a structured [`envelope::McpResponse`] in return.
//!
//! ```rust
//! use grid_ensemble_core::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() {
//! let dispatcher = Dispatcher::new();
//! let descriptor = AgentDescriptor::builder()
//!     .id("meter-agent")
//!     .agent_type(AgentType::Custom("meter".to_string()))
//!     .capability("read")
//!     .build()
//!     .unwrap();
//!
//! dispatcher.registry().register_agent(descriptor).await;
//! dispatcher
//!     .registry()
//!     .register_handler("meter-agent", "read", Handler::from_sync(|_| Ok(json!(42.5))))
//!     .await;
//!
//! let response = dispatcher.send_request("meter-agent", "read", json!({})).await;
//! assert_eq!(response.result(), Some(&json!(42.5)));
//! # }
//! ```

pub mod agent;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod settings;

pub use error::{Error, Result};

/// Commonly used types
pub mod prelude {
    pub use crate::agent::{AgentDescriptor, AgentType};
    pub use crate::dispatch::{BroadcastReport, Dispatcher, WeakDispatcher};
    pub use crate::envelope::{
        ErrorCode, McpMessage, McpRequest, McpResponse, MessageType, Outcome, ResponseError,
    };
    pub use crate::registry::{AgentRegistry, Handler, HandlerResult, WeakRegistry};
    pub use crate::settings::DispatchSettings;
}
