//! Dispatch settings
//!
//! ```rust
//! use grid_ensemble_core::settings::DispatchSettings;
//!
//! let settings = DispatchSettings::builder()
//!     .default_timeout_ms(5_000)
//!     .broadcast_timeout_ms(2_000)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(settings.default_timeout().unwrap().as_millis(), 5_000);
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for any configured deadline (one hour)
pub const MAX_TIMEOUT_MS: u64 = 3_600_000;

/// Deadlines applied by the dispatcher
///
/// A value of zero disables the deadline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DispatchSettings {
    pub default_timeout_ms: u64,
    pub broadcast_timeout_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            broadcast_timeout_ms: 30_000,
        }
    }
}

impl DispatchSettings {
    pub fn builder() -> DispatchSettingsBuilder {
        DispatchSettingsBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::configuration(format!(
                "default_timeout_ms cannot exceed {}",
                MAX_TIMEOUT_MS
            )));
        }
        if self.broadcast_timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::configuration(format!(
                "broadcast_timeout_ms cannot exceed {}",
                MAX_TIMEOUT_MS
            )));
        }
        Ok(())
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        to_deadline(self.default_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Option<Duration> {
        to_deadline(self.broadcast_timeout_ms)
    }
}

fn to_deadline(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

/// Builder for [`DispatchSettings`]
#[derive(Debug, Clone, Default)]
pub struct DispatchSettingsBuilder {
    default_timeout_ms: Option<u64>,
    broadcast_timeout_ms: Option<u64>,
}

impl DispatchSettingsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = Some(ms);
        self
    }

    pub fn broadcast_timeout_ms(mut self, ms: u64) -> Self {
        self.broadcast_timeout_ms = Some(ms);
        self
    }

    /// Disable both deadlines
    pub fn no_timeouts(self) -> Self {
        self.default_timeout_ms(0).broadcast_timeout_ms(0)
    }

    pub fn build(self) -> Result<DispatchSettings> {
        let defaults = DispatchSettings::default();
        let settings = DispatchSettings {
            default_timeout_ms: self
                .default_timeout_ms
                .unwrap_or(defaults.default_timeout_ms),
            broadcast_timeout_ms: self
                .broadcast_timeout_ms
                .unwrap_or(defaults.broadcast_timeout_ms),
        };
        settings.validate()?;
        Ok(settings)
    }
}
