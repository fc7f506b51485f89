//! Driver configuration and the user-facing settings it is resolved from.
//!
//! Settings speak in physical quantities ("average 4 readings"); the
//! [`Configuration`] handed to the driver holds the matching device mode ids.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, RangeLookupError};
use crate::range::{CURRENT_RANGES, FILTER_MODES, INTEGRATION_TIMES, ModeId};
use crate::units::{Amperes, Micros, Millis, Readings, Volts};

/// Resolved, immutable driver configuration. Use [`ConfigurationBuilder`] to create one.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    address: String,
    go_local_on_close: bool,
    filter: ModeId,
    integration_time: ModeId,
    max_compliance: Amperes,
    strict_warnings: bool,
}

impl Configuration {
    pub fn builder(address: impl Into<String>) -> ConfigurationBuilder {
        ConfigurationBuilder::new(address)
    }

    /// Resolve file settings against the range tables.
    pub fn from_settings(settings: &DeviceSettings) -> Result<Self, RangeLookupError> {
        ConfigurationBuilder::new(settings.address.clone())
            .go_local_on_close(settings.go_local_on_close)
            .average_readings(settings.readings_to_average)
            .integration_time(Micros::from_ticks(settings.integration_time_us))
            .max_compliance(settings.max_compliance)
            .strict_warnings(settings.strict_warnings)
            .build()
    }

    /// Device address or path, informational for the driver.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn go_local_on_close(&self) -> bool {
        self.go_local_on_close
    }

    pub fn filter_mode(&self) -> ModeId {
        self.filter
    }

    pub fn integration_time_mode(&self) -> ModeId {
        self.integration_time
    }

    /// Largest compliance `Set` accepts.
    pub fn max_compliance(&self) -> Amperes {
        self.max_compliance
    }

    /// Whether advisory warnings abort a transaction like any other warning.
    pub fn strict_warnings(&self) -> bool {
        self.strict_warnings
    }
}

/// Collects user-facing values, then resolves them in [`ConfigurationBuilder::build`].
#[derive(Debug, Clone)]
pub struct ConfigurationBuilder {
    address: String,
    go_local_on_close: bool,
    readings: Readings,
    integration_time: Micros,
    max_compliance: Amperes,
    strict_warnings: bool,
}

impl ConfigurationBuilder {
    pub fn new(address: impl Into<String>) -> Self {
        ConfigurationBuilder {
            address: address.into(),
            go_local_on_close: true,
            readings: FILTER_MODES.first_value(),
            integration_time: INTEGRATION_TIMES.first_value(),
            max_compliance: CURRENT_RANGES.last_value(),
            strict_warnings: true,
        }
    }

    pub fn go_local_on_close(mut self, enabled: bool) -> Self {
        self.go_local_on_close = enabled;
        self
    }

    /// Number of readings the instrument averages per measurement.
    pub fn average_readings(mut self, count: u32) -> Self {
        self.readings = Readings(count);
        self
    }

    pub fn integration_time(mut self, time: Micros) -> Self {
        self.integration_time = time;
        self
    }

    pub fn max_compliance(mut self, limit: Amperes) -> Self {
        self.max_compliance = limit;
        self
    }

    pub fn strict_warnings(mut self, strict: bool) -> Self {
        self.strict_warnings = strict;
        self
    }

    pub fn build(self) -> Result<Configuration, RangeLookupError> {
        Ok(Configuration {
            filter: FILTER_MODES.find_mode(self.readings)?,
            integration_time: INTEGRATION_TIMES.find_mode(self.integration_time)?,
            address: self.address,
            go_local_on_close: self.go_local_on_close,
            max_compliance: self.max_compliance,
            strict_warnings: self.strict_warnings,
        })
    }
}

/// `[device]` section of the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub address: String,
    pub go_local_on_close: bool,
    pub readings_to_average: u32,
    pub integration_time_us: u32,
    pub max_compliance: Amperes,
    pub strict_warnings: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        DeviceSettings {
            address: String::new(),
            go_local_on_close: true,
            readings_to_average: 1,
            integration_time_us: 416,
            max_compliance: Amperes::from_milli(100.0),
            strict_warnings: true,
        }
    }
}

/// `[bias]` section: the operating point the controller ramps to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiasSettings {
    pub voltage: Volts,
    pub compliance: Amperes,
    #[serde(default = "BiasSettings::default_ramp_step")]
    pub ramp_step: Volts,
    #[serde(default = "BiasSettings::default_ramp_delay_ms")]
    pub ramp_delay_ms: u32,
    #[serde(default = "BiasSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u32,
    #[serde(default = "BiasSettings::default_check_compliance")]
    pub check_compliance: bool,
}

impl BiasSettings {
    pub fn new(voltage: Volts, compliance: Amperes) -> Self {
        BiasSettings {
            voltage,
            compliance,
            ramp_step: Self::default_ramp_step(),
            ramp_delay_ms: Self::default_ramp_delay_ms(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            check_compliance: Self::default_check_compliance(),
        }
    }

    pub fn ramp_delay(&self) -> Millis {
        Millis::from_ticks(self.ramp_delay_ms)
    }

    pub fn poll_interval(&self) -> Millis {
        Millis::from_ticks(self.poll_interval_ms)
    }

    fn default_ramp_step() -> Volts {
        Volts(5.0)
    }

    fn default_ramp_delay_ms() -> u32 {
        1_000
    }

    fn default_poll_interval_ms() -> u32 {
        1_000
    }

    fn default_check_compliance() -> bool {
        true
    }
}

/// Complete settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub device: DeviceSettings,
    pub bias: BiasSettings,
}

impl Settings {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn configuration(&self) -> Result<Configuration, ConfigError> {
        Ok(Configuration::from_settings(&self.device)?)
    }
}
