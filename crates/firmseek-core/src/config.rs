//! Configuration: device targets and search tuning.
//!
//! Loaded from a YAML file. Only `devices` is required; everything else
//! falls back to the defaults the live service is known to tolerate.

use crate::error::{Error, Result};
use crate::version::VersionBuild;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Firmware search endpoint of the vendor partner portal
pub const DEFAULT_ENDPOINT: &str =
    "https://partners.hikvision.com/support/psp-api/document/firmware/search";

/// Number of build dates probed per version triple
pub const DEFAULT_DATE_HORIZON_DAYS: u32 = 365 * 2;

/// Pause after every non-throttled exchange
pub const DEFAULT_COURTESY_DELAY_MS: u64 = 500;

/// Pause before re-issuing a throttled request
pub const DEFAULT_THROTTLE_COOLDOWN_MS: u64 = 60_000;

/// One device whose firmware history is being searched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceTarget {
    /// Human-readable label used in logs and for `--device` selection
    pub name: String,
    /// Opaque device model identifier
    pub device_id: String,
    /// Serial number of the physical unit
    pub serial_no: String,
    /// Last version known to be accepted by the service
    pub initial_version: VersionBuild,
}

/// What to do when the service answers with a non-200 HTTP status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorPolicy {
    /// Log, count the candidate as inconclusive, move on
    #[default]
    Skip,
    /// Re-issue the same candidate after the courtesy delay
    Retry,
    /// Fail the device's run
    Abort,
}

/// Tuning for a single device search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Build dates probed per version triple, counting back from the anchor
    pub date_horizon_days: u32,
    /// Delay after each non-throttled exchange, in milliseconds
    pub courtesy_delay_ms: u64,
    /// Delay before retrying a throttled request, in milliseconds
    pub throttle_cooldown_ms: u64,
    /// Maximum throttle retries per candidate (`None` = unbounded)
    pub max_throttle_retries: Option<u32>,
    /// Handling of non-200 transport statuses
    pub transport_error_policy: TransportErrorPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            date_horizon_days: DEFAULT_DATE_HORIZON_DAYS,
            courtesy_delay_ms: DEFAULT_COURTESY_DELAY_MS,
            throttle_cooldown_ms: DEFAULT_THROTTLE_COOLDOWN_MS,
            max_throttle_retries: None,
            transport_error_policy: TransportErrorPolicy::Skip,
        }
    }
}

impl SearchConfig {
    /// Creates a search config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-triple date horizon
    pub fn date_horizon_days(mut self, days: u32) -> Self {
        self.date_horizon_days = days;
        self
    }

    /// Sets the courtesy delay
    pub fn courtesy_delay(mut self, delay: Duration) -> Self {
        self.courtesy_delay_ms = millis(delay);
        self
    }

    /// Sets the throttle cooldown
    pub fn throttle_cooldown(mut self, cooldown: Duration) -> Self {
        self.throttle_cooldown_ms = millis(cooldown);
        self
    }

    /// Caps throttle retries per candidate
    pub fn max_throttle_retries(mut self, max: Option<u32>) -> Self {
        self.max_throttle_retries = max;
        self
    }

    /// Sets the transport error policy
    pub fn transport_error_policy(mut self, policy: TransportErrorPolicy) -> Self {
        self.transport_error_policy = policy;
        self
    }

    /// Courtesy delay as a [`Duration`]
    pub fn courtesy_delay_duration(&self) -> Duration {
        Duration::from_millis(self.courtesy_delay_ms)
    }

    /// Throttle cooldown as a [`Duration`]
    pub fn throttle_cooldown_duration(&self) -> Duration {
        Duration::from_millis(self.throttle_cooldown_ms)
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

/// Top-level configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Firmware search endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Search tuning shared by every device
    #[serde(default)]
    pub search: SearchConfig,
    /// Devices to search, in launch order
    pub devices: Vec<DeviceTarget>,
}

impl Config {
    /// Reads and validates a YAML config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::config_read(path, e))?;
        let config: Config =
            serde_yaml::from_str(&raw).map_err(|e| Error::config_parse(path, e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.devices.is_empty() {
            return Err(Error::invalid_config("no devices configured"));
        }
        if self.search.date_horizon_days == 0 {
            return Err(Error::invalid_config("date_horizon_days must be at least 1"));
        }
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.name.as_str()) {
                return Err(Error::invalid_config(format!(
                    "duplicate device name '{}'",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// Returns the devices named in `names`, or all of them if `names` is empty
    pub fn select_devices(&self, names: &[String]) -> Result<Vec<DeviceTarget>> {
        if names.is_empty() {
            return Ok(self.devices.clone());
        }
        names
            .iter()
            .map(|name| {
                self.devices
                    .iter()
                    .find(|d| &d.name == name)
                    .cloned()
                    .ok_or_else(|| Error::invalid_config(format!("unknown device '{}'", name)))
            })
            .collect()
    }
}
