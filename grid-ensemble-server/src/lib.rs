//! Runtime for Grid Ensemble
//!
//! Loads layered configuration, attaches the enabled agents to a dispatcher
//! and exposes it from the command line or over a line-delimited JSON stdio
//! transport.

pub mod config;
pub mod error;
pub mod runtime;


pub use error::{Error, Result};
pub use runtime::Runtime;

/// Re-export the library crates for convenience
pub use grid_ensemble_agents as agents;
pub use grid_ensemble_core as core;
