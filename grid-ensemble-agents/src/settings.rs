//! Tunables shared by the agents

use grid_ensemble_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Longest forecast horizon accepted, in hours (30 days)
pub const MAX_HORIZON_HOURS: u32 = 720;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    /// Items kept in each agent's memory before the oldest is evicted
    pub memory_capacity: usize,
    /// Items rendered by `AgentMemory::context`
    pub context_window: usize,
    /// Default z-score above which a reading is flagged
    pub anomaly_z_threshold: f64,
    /// Forecast horizon used when a request does not name one
    pub default_horizon_hours: u32,
    pub enable_data_quality: bool,
    pub enable_demand_sector: bool,
    pub enable_supply_sector: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            memory_capacity: 50,
            context_window: 10,
            anomaly_z_threshold: 3.0,
            default_horizon_hours: 24,
            enable_data_quality: true,
            enable_demand_sector: true,
            enable_supply_sector: true,
        }
    }
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        if self.memory_capacity == 0 {
            return Err(Error::configuration("memory_capacity must be at least 1"));
        }
        if self.context_window == 0 || self.context_window > self.memory_capacity {
            return Err(Error::configuration(
                "context_window must be between 1 and memory_capacity",
            ));
        }
        if !self.anomaly_z_threshold.is_finite() || self.anomaly_z_threshold <= 0.0 {
            return Err(Error::configuration(
                "anomaly_z_threshold must be a positive number",
            ));
        }
        if self.default_horizon_hours == 0 || self.default_horizon_hours > MAX_HORIZON_HOURS {
            return Err(Error::configuration(format!(
                "default_horizon_hours must be between 1 and {}",
                MAX_HORIZON_HOURS
            )));
        }
        if self.enable_demand_sector && !self.enable_data_quality {
            return Err(Error::configuration(
                "the demand sector agent requires the data quality agent",
            ));
        }
        if self.enable_supply_sector && !self.enable_data_quality {
            return Err(Error::configuration(
                "the supply sector agent requires the data quality agent",
            ));
        }
        Ok(())
    }
}
