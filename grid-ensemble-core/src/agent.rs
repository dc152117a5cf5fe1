//! Agent descriptors
//!
//! An [`AgentDescriptor`] is the metadata an agent publishes when it joins
//! the registry: a unique id, a display name, a type tag and the list of
//! capabilities it declares. The registry stamps `registered_at` each time
//! the descriptor is (re-)registered.
//!
//! # Examples
//!
//! ```rust
//! use grid_ensemble_core::agent::*;
//!
//! let descriptor = AgentDescriptor::builder()
//!     .id("data-quality-agent")
//!     .name("Data Quality Agent")
//!     .agent_type(AgentType::DataQuality)
//!     .capability("validate_data")
//!     .capability("detect_anomalies")
//!     .build()
//!     .unwrap();
//!
//! assert!(descriptor.has_capability("validate_data"));
//! ```

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata describing a registered agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

/// Type tag of an agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    DataQuality,
    DemandSector,
    SupplySector,
    Custom(String),
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::DataQuality => write!(f, "data_quality"),
            AgentType::DemandSector => write!(f, "demand_sector"),
            AgentType::SupplySector => write!(f, "supply_sector"),
            AgentType::Custom(tag) => write!(f, "{}", tag),
        }
    }
}

impl AgentDescriptor {
    /// Create a new descriptor with validation
    pub fn new(
        id: String,
        name: String,
        agent_type: AgentType,
        capabilities: Vec<String>,
    ) -> Result<Self> {
        Self::validate_id(&id)?;
        Self::validate_name(&name)?;
        Self::validate_capabilities(&capabilities)?;

        Ok(Self {
            id,
            name,
            agent_type,
            capabilities,
            extra: serde_json::Map::new(),
            registered_at: None,
        })
    }

    /// Create a builder for constructing a descriptor
    pub fn builder() -> AgentDescriptorBuilder {
        AgentDescriptorBuilder::new()
    }

    fn validate_id(id: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::validation("Agent id cannot be empty"));
        }
        if id.len() > 100 {
            return Err(Error::validation("Agent id cannot exceed 100 characters"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(Error::validation(
                "Agent id can only contain alphanumeric characters, dots, hyphens, and underscores",
            ));
        }
        Ok(())
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(Error::validation("Agent name cannot be empty"));
        }
        Ok(())
    }

    fn validate_capabilities(capabilities: &[String]) -> Result<()> {
        for capability in capabilities {
            if capability.trim().is_empty() {
                return Err(Error::validation("Capability cannot be empty"));
            }
            if capability.len() > 64 {
                return Err(Error::validation(
                    "Capability name cannot exceed 64 characters",
                ));
            }
        }
        Ok(())
    }

    /// Check if the agent declares a specific capability
    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }

    pub fn capability_count(&self) -> usize {
        self.capabilities.len()
    }

    /// Copy of this descriptor stamped with a registration time
    pub(crate) fn stamped(mut self, at: DateTime<Utc>) -> Self {
        self.registered_at = Some(at);
        self
    }
}

/// Builder for constructing [`AgentDescriptor`] instances with validation
#[derive(Debug, Clone, Default)]
pub struct AgentDescriptorBuilder {
    id: Option<String>,
    name: Option<String>,
    agent_type: Option<AgentType>,
    capabilities: Vec<String>,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl AgentDescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id<S: Into<String>>(mut self, id: S) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn agent_type(mut self, agent_type: AgentType) -> Self {
        self.agent_type = Some(agent_type);
        self
    }

    /// Add a capability; duplicates are ignored
    pub fn capability<S: Into<String>>(mut self, capability: S) -> Self {
        let capability = capability.into();
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
        self
    }

    /// Add multiple capabilities
    pub fn capabilities<I, S>(self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        capabilities
            .into_iter()
            .fold(self, |builder, capability| builder.capability(capability))
    }

    /// Attach a free-form metadata entry
    pub fn extra<K: Into<String>>(mut self, key: K, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Build the descriptor. The name defaults to the id.
    pub fn build(self) -> Result<AgentDescriptor> {
        let id = self
            .id
            .ok_or_else(|| Error::validation("Agent id is required"))?;
        let name = self.name.unwrap_or_else(|| id.clone());
        let agent_type = self
            .agent_type
            .ok_or_else(|| Error::validation("Agent type is required"))?;

        let mut descriptor = AgentDescriptor::new(id, name, agent_type, self.capabilities)?;
        descriptor.extra = self.extra;
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_descriptor_creation_with_builder() {
        let descriptor = AgentDescriptor::builder()
            .id("demand-sector-agent")
            .name("Demand Sector Agent")
            .agent_type(AgentType::DemandSector)
            .capabilities(["preprocess_data", "predict_time_series"])
            .capability("preprocess_data")
            .extra("region", serde_json::json!("kanto"))
            .build()
            .unwrap();

        assert_eq!(descriptor.id, "demand-sector-agent");
        assert_eq!(descriptor.capability_count(), 2);
        assert!(descriptor.has_capability("predict_time_series"));
        assert!(!descriptor.has_capability("validate_data"));
        assert_eq!(descriptor.extra["region"], "kanto");
        assert!(descriptor.registered_at.is_none());
    }

    #[test]
    fn test_descriptor_id_validation() {
        let result = AgentDescriptor::builder()
            .id("")
            .agent_type(AgentType::SupplySector)
            .build();
        assert!(result.is_err());

        let result = AgentDescriptor::builder()
            .id("bad id!")
            .agent_type(AgentType::SupplySector)
            .build();
        assert_matches!(result, Err(Error::Validation { .. }));

        let result = AgentDescriptor::builder()
            .id("a".repeat(101))
            .agent_type(AgentType::SupplySector)
            .build();
        assert!(result.is_err());

        let result = AgentDescriptor::builder()
            .id("supply-sector-agent.v2")
            .agent_type(AgentType::SupplySector)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_builder_requires_type_and_defaults_name() {
        let result = AgentDescriptor::builder().id("agent1").build();
        assert!(result.is_err());

        let descriptor = AgentDescriptor::builder()
            .id("agent1")
            .agent_type(AgentType::Custom("relay".to_string()))
            .build()
            .unwrap();
        assert_eq!(descriptor.name, "agent1");
        assert_eq!(descriptor.agent_type.to_string(), "relay");
    }

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = AgentDescriptor::builder()
            .id("data-quality-agent")
            .agent_type(AgentType::DataQuality)
            .capability("validate_data")
            .build()
            .unwrap();

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["agent_type"], "data_quality");
        assert!(json.get("extra").is_none());
        assert!(json.get("registered_at").is_none());

        let back: AgentDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, descriptor);
    }
}
