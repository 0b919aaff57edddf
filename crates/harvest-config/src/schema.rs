// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration schema.
//!
//! ```yaml
//! collector:
//!   period: 1s
//!
//! opcua:
//!   endpoint: opc.tcp://plc.local:4840
//!   mode: polling
//!   max_concurrent_cycles: 10
//!   nodes:
//!     - { ns: 2, id: Temp, label: boiler.temp }
//!     - { ns: 2, id: 1001 }
//!
//! logging:
//!   level: info
//!   format: json
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use harvest_opcua::OpcUaConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// HarvestConfig
// =============================================================================

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Trigger loop settings.
    #[serde(default)]
    pub collector: CollectorSettings,

    /// Engine settings.
    #[serde(default)]
    pub opcua: OpcUaConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl HarvestConfig {
    /// Validates every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.collector.validate()?;
        self.opcua.validate()?;
        Ok(())
    }
}

// =============================================================================
// CollectorSettings
// =============================================================================

/// Trigger loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Time between two triggers.
    #[serde(default = "default_period", with = "duration_serde")]
    pub period: Duration,
}

fn default_period() -> Duration {
    Duration::from_secs(1)
}

impl CollectorSettings {
    /// Validates the collector settings.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.period.is_zero() {
            return Err(ConfigError::invalid(
                "collector.period",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            period: default_period(),
        }
    }
}

// =============================================================================
// LoggingSettings
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the filter directive for this level.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human friendly.
    #[default]
    Pretty,
    /// Single line per event.
    Compact,
    /// JSON objects, one per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        })
    }
}

mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_opcua::{CollectionMode, NodeConfig};

    fn valid() -> HarvestConfig {
        let mut config = HarvestConfig::default();
        config.opcua.nodes.push(NodeConfig::string(2, "Temp"));
        config
    }

    #[test]
    fn test_defaults() {
        let config = HarvestConfig::default();
        assert_eq!(config.collector.period, Duration::from_secs(1));
        assert_eq!(config.opcua.endpoint, "opc.tcp://localhost:4840");
        assert_eq!(config.opcua.mode, CollectionMode::Streaming);
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.collector.period = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { .. })
        ));

        // no nodes and browsing disabled
        assert!(matches!(
            HarvestConfig::default().validate(),
            Err(ConfigError::OpcUa(_))
        ));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
    }

    #[test]
    fn test_period_humantime() {
        let settings: CollectorSettings = serde_json::from_str(r#"{"period":"250ms"}"#).unwrap();
        assert_eq!(settings.period, Duration::from_millis(250));
        assert_eq!(
            serde_json::to_string(&settings).unwrap(),
            r#"{"period":"250ms"}"#
        );
    }
}
