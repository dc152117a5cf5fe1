//! Energy grid agents for Grid Ensemble
//!
//! Three agents ship with the crate:
//!
//! - [`data_quality::DataQualityAgent`] validates readings, scores series
//!   quality, describes series and flags outliers.
//! - [`demand_sector::DemandSectorAgent`] cleans demand readings, picks a
//!   forecasting engine and produces hourly forecasts.
//! - [`supply_sector::SupplySectorAgent`] does the same for generation and
//!   storage assets, with solar and battery specific forecasts.
//!
//! Both sector agents rely on the data quality agent, which they reach only
//! through the dispatcher.

pub mod base;
pub mod data_quality;
pub mod demand_sector;
pub mod error;
pub mod series;
pub mod settings;
pub mod supply_sector;

pub use error::{Error, Result};

use base::{attach, PeerClient};
use data_quality::DataQualityAgent;
use demand_sector::DemandSectorAgent;
use grid_ensemble_core::dispatch::Dispatcher;
use settings::AgentSettings;
use supply_sector::SupplySectorAgent;
use std::sync::Arc;

/// Attach every agent enabled in `settings`, returning their ids
pub async fn attach_enabled(settings: &AgentSettings, dispatcher: &Dispatcher) -> Result<Vec<String>> {
    settings.validate()?;

    let mut attached = Vec::new();
    if settings.enable_data_quality {
        attach(Arc::new(DataQualityAgent::new(settings)), dispatcher).await;
        attached.push(data_quality::AGENT_ID.to_string());
    }
    if settings.enable_demand_sector {
        let peers = PeerClient::new(dispatcher);
        attach(Arc::new(DemandSectorAgent::new(settings, peers)), dispatcher).await;
        attached.push(demand_sector::AGENT_ID.to_string());
    }
    if settings.enable_supply_sector {
        let peers = PeerClient::new(dispatcher);
        attach(Arc::new(SupplySectorAgent::new(settings, peers)), dispatcher).await;
        attached.push(supply_sector::AGENT_ID.to_string());
    }
    Ok(attached)
}
