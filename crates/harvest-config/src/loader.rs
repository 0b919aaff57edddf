// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading.
//!
//! # Loading Pipeline
//!
//! 1. Read the file
//! 2. Substitute `${VAR}` / `${VAR:default}` placeholders
//! 3. Parse YAML, TOML or JSON (by extension)
//! 4. Apply `HARVEST_*` environment overrides
//! 5. Resolve relative certificate paths against the file's directory
//! 6. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! HARVEST_OPCUA_ENDPOINT=opc.tcp://10.0.0.5:4840
//! HARVEST_OPCUA_USERNAME=collector
//! HARVEST_OPCUA_PASSWORD=secret
//! HARVEST_OPCUA_MODE=polling
//! HARVEST_COLLECTOR_PERIOD=500ms
//! HARVEST_LOG_LEVEL=debug
//! HARVEST_LOG_FORMAT=json
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::HarvestConfig;

// =============================================================================
// ConfigLoader
// =============================================================================

/// Loads [`HarvestConfig`] from files or strings.
///
/// ```no_run
/// use harvest_config::ConfigLoader;
///
/// let config = ConfigLoader::new().load("harvest.yaml").unwrap();
/// println!("{}", config.opcua.endpoint);
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Base directory for resolving relative paths.
    base_path: Option<PathBuf>,

    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to substitute placeholders and apply overrides.
    resolve_env_vars: bool,

    /// Whether to resolve relative paths.
    resolve_paths: bool,
}

impl ConfigLoader {
    /// Creates a loader with the `HARVEST` prefix.
    pub fn new() -> Self {
        Self {
            base_path: None,
            env_prefix: "HARVEST".to_string(),
            resolve_env_vars: true,
            resolve_paths: true,
        }
    }

    /// Sets the base path for resolving relative paths.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable handling.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Enables or disables relative path resolution.
    pub fn with_path_resolution(mut self, enabled: bool) -> Self {
        self.resolve_paths = enabled;
        self
    }

    /// Loads and validates a configuration file.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<HarvestConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let base_path = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        });

        let format = ConfigFormat::from_path(path)?;
        let content = self.read_file(path)?;
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(&content)
        } else {
            content
        };

        let origin = path.display().to_string();
        let mut config: HarvestConfig = parse_str(&content, format, &origin)?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        if self.resolve_paths {
            resolve_relative_paths(&mut config, &base_path);
        }

        config.validate()?;

        info!(
            endpoint = %config.opcua.endpoint,
            mode = %config.opcua.mode,
            nodes = config.opcua.nodes.len(),
            browse = config.opcua.browse.enabled,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parses and validates configuration content.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<HarvestConfig> {
        let content = if self.resolve_env_vars {
            self.resolve_env_placeholders(content)
        } else {
            content.to_string()
        };
        let mut config: HarvestConfig = parse_str(&content, format, "<inline>")?;

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        if self.resolve_paths {
            if let Some(base_path) = &self.base_path {
                resolve_relative_paths(&mut config, base_path);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn read_file(&self, path: &Path) -> ConfigResult<String> {
        if !path.exists() {
            return Err(ConfigError::not_found(path));
        }
        fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))
    }

    /// Substitutes `${VAR}` and `${VAR:default}`.
    ///
    /// An unset variable without default is left as written.
    fn resolve_env_placeholders(&self, content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        while let Some(start) = rest.find("${") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find('}') else {
                result.push_str(&rest[start..]);
                return result;
            };

            let body = &after[..end];
            let (name, default) = match body.split_once(':') {
                Some((name, default)) => (name, Some(default)),
                None => (body, None),
            };

            match (env::var(name), default) {
                (Ok(value), _) => result.push_str(&value),
                (Err(_), Some(default)) => result.push_str(default),
                (Err(_), None) => {
                    warn!(variable = name, "Environment variable not set");
                    result.push_str(&rest[start..start + 2 + end + 1]);
                }
            }
            rest = &after[end + 1..];
        }

        result.push_str(rest);
        result
    }

    fn var(&self, key: &str) -> Option<(String, String)> {
        let name = format!("{}_{}", self.env_prefix, key);
        env::var(&name).ok().map(|value| (name, value))
    }

    /// Applies `<PREFIX>_*` overrides.
    fn apply_env_overrides(&self, config: &mut HarvestConfig) -> ConfigResult<()> {
        if let Some((_, value)) = self.var("OPCUA_ENDPOINT") {
            config.opcua.endpoint = value;
        }
        if let Some((_, value)) = self.var("OPCUA_USERNAME") {
            config.opcua.username = Some(value);
        }
        if let Some((_, value)) = self.var("OPCUA_PASSWORD") {
            config.opcua.password = Some(value);
        }
        if let Some((name, value)) = self.var("OPCUA_MODE") {
            config.opcua.mode = value
                .parse()
                .map_err(|_| ConfigError::env_override(name, "expected polling or streaming"))?;
        }
        if let Some((name, value)) = self.var("COLLECTOR_PERIOD") {
            config.collector.period = humantime::parse_duration(&value)
                .map_err(|e| ConfigError::env_override(name, e.to_string()))?;
        }
        if let Some((name, value)) = self.var("LOG_LEVEL") {
            config.logging.level = value
                .parse()
                .map_err(|e: String| ConfigError::env_override(name, e))?;
        }
        if let Some((name, value)) = self.var("LOG_FORMAT") {
            config.logging.format = value
                .parse()
                .map_err(|e: String| ConfigError::env_override(name, e))?;
        }
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_relative_paths(config: &mut HarvestConfig, base_path: &Path) {
    let opcua = &mut config.opcua;
    for path in [&mut opcua.client_cert, &mut opcua.client_key]
        .into_iter()
        .flatten()
    {
        resolve(path, base_path);
    }
    resolve(&mut opcua.pki_dir, base_path);
}

fn resolve(path: &mut String, base_path: &Path) {
    if Path::new(path.as_str()).is_relative() {
        let resolved = base_path.join(path.as_str()).to_string_lossy().into_owned();
        debug!(from = %path, to = %resolved, "Resolved relative path");
        *path = resolved;
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Display name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "YAML",
            ConfigFormat::Toml => "TOML",
            ConfigFormat::Json => "JSON",
        }
    }

    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase);

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::unknown_extension(path)),
        }
    }
}

fn parse_str<T: DeserializeOwned>(
    content: &str,
    format: ConfigFormat,
    origin: &str,
) -> ConfigResult<T> {
    let parsed = match format {
        ConfigFormat::Yaml => parse_yaml(content),
        ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
    };
    parsed.map_err(|message| ConfigError::syntax(origin, format, message))
}

/// YAML goes through the `config` crate's YAML source.
fn parse_yaml<T: DeserializeOwned>(content: &str) -> Result<T, String> {
    config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| e.to_string())
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads a configuration file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<HarvestConfig> {
    ConfigLoader::new().load(path)
}

/// Parses configuration content with default settings.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<HarvestConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    use harvest_opcua::{CollectionMode, ConfiguredId};
    use tempfile::NamedTempFile;

    use crate::schema::{LogFormat, LogLevel};

    const YAML: &str = r#"
collector:
  period: 500ms

opcua:
  endpoint: opc.tcp://plc.local:4840
  mode: polling
  max_concurrent_cycles: 10
  client_cert: certs/client.der
  client_key: /etc/harvest/client.pem
  nodes:
    - ns: 2
      id: Temp
      label: boiler.temp
    - ns: 2
      id: 1001

logging:
  level: debug
  format: json
"#;

    fn write(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(suffix).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn isolated(prefix: &str) -> ConfigLoader {
        ConfigLoader::new().with_env_prefix(prefix)
    }

    #[test]
    fn test_load_yaml() {
        let file = write(YAML, ".yaml");
        let config = isolated("HARVEST_TEST_YAML").load(file.path()).unwrap();

        assert_eq!(config.collector.period, Duration::from_millis(500));
        assert_eq!(config.opcua.endpoint, "opc.tcp://plc.local:4840");
        assert_eq!(config.opcua.mode, CollectionMode::Polling);
        assert_eq!(config.opcua.max_concurrent_cycles, 10);
        assert_eq!(config.opcua.nodes.len(), 2);
        assert_eq!(config.opcua.nodes[0].label.as_deref(), Some("boiler.temp"));
        assert_eq!(config.opcua.nodes[1].id, ConfiguredId::Numeric(1001));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
        // untouched defaults
        assert_eq!(config.opcua.retry_on_error, 5);
        assert_eq!(config.opcua.stall_budget, 5);
    }

    #[test]
    fn test_load_toml() {
        let toml = r#"
[collector]
period = "2s"

[opcua]
endpoint = "opc.tcp://plc.local:4840"

[opcua.browse]
enabled = true
max_level = 3
"#;
        let file = write(toml, ".toml");
        let config = isolated("HARVEST_TEST_TOML").load(file.path()).unwrap();

        assert_eq!(config.collector.period, Duration::from_secs(2));
        assert!(config.opcua.browse.enabled);
        assert_eq!(config.opcua.browse.max_level, 3);
        assert_eq!(config.opcua.mode, CollectionMode::Streaming);
    }

    #[test]
    fn test_load_json() {
        let json = r#"{"opcua": {"nodes": [{"ns": 3, "id": "Speed"}]}}"#;
        let file = write(json, ".json");
        let config = isolated("HARVEST_TEST_JSON").load(file.path()).unwrap();
        assert_eq!(config.opcua.nodes[0].ns, 3);
    }

    #[test]
    fn test_relative_cert_paths() {
        let file = write(YAML, ".yaml");
        let config = isolated("HARVEST_TEST_PATHS").load(file.path()).unwrap();
        let base = file.path().parent().unwrap();

        assert_eq!(
            config.opcua.client_cert.as_deref(),
            Some(&*base.join("certs/client.der").to_string_lossy())
        );
        assert_eq!(config.opcua.client_key.as_deref(), Some("/etc/harvest/client.pem"));
        assert_eq!(config.opcua.pki_dir, base.join("pki").to_string_lossy());
    }

    #[test]
    fn test_env_overrides() {
        env::set_var("HARVEST_TEST_ENV_OPCUA_ENDPOINT", "opc.tcp://override:4840");
        env::set_var("HARVEST_TEST_ENV_OPCUA_MODE", "streaming");
        env::set_var("HARVEST_TEST_ENV_COLLECTOR_PERIOD", "3s");
        env::set_var("HARVEST_TEST_ENV_LOG_LEVEL", "warn");

        let config = isolated("HARVEST_TEST_ENV")
            .load_from_str(YAML, ConfigFormat::Yaml)
            .unwrap();

        assert_eq!(config.opcua.endpoint, "opc.tcp://override:4840");
        assert_eq!(config.opcua.mode, CollectionMode::Streaming);
        assert_eq!(config.collector.period, Duration::from_secs(3));
        assert_eq!(config.logging.level, LogLevel::Warn);
    }

    #[test]
    fn test_invalid_env_override() {
        env::set_var("HARVEST_TEST_BAD_OPCUA_MODE", "sometimes");
        let result = isolated("HARVEST_TEST_BAD").load_from_str(YAML, ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::EnvOverride { .. })));
    }

    #[test]
    fn test_env_placeholder_with_default() {
        let loader = ConfigLoader::new();
        assert_eq!(
            loader.resolve_env_placeholders("endpoint: ${HARVEST_TEST_UNSET_VAR:opc.tcp://a:1}"),
            "endpoint: opc.tcp://a:1"
        );
        assert_eq!(
            loader.resolve_env_placeholders("x: ${HARVEST_TEST_UNSET_VAR} y"),
            "x: ${HARVEST_TEST_UNSET_VAR} y"
        );
        assert_eq!(loader.resolve_env_placeholders("x: ${open"), "x: ${open");
    }

    #[test]
    fn test_env_placeholder_set() {
        env::set_var("HARVEST_TEST_PLACEHOLDER", "secret");
        let loader = ConfigLoader::new();
        assert_eq!(
            loader.resolve_env_placeholders("password: ${HARVEST_TEST_PLACEHOLDER:none}"),
            "password: secret"
        );
    }

    #[test]
    fn test_validation_failure() {
        let yaml = "opcua:\n  endpoint: http://plc:80\n  nodes:\n    - { ns: 2, id: Temp }\n";
        let result = isolated("HARVEST_TEST_VALID").load_from_str(yaml, ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::OpcUa(_))));

        let yaml = "collector:\n  period: 0s\nopcua:\n  nodes:\n    - { ns: 2, id: Temp }\n";
        let result = isolated("HARVEST_TEST_VALID").load_from_str(yaml, ConfigFormat::Yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_parse_error_names_file() {
        let file = write("opcua: [unclosed", ".yaml");
        let result = isolated("HARVEST_TEST_PARSE").load(file.path());
        match result {
            Err(ConfigError::Syntax { origin, format, .. }) => {
                assert_eq!(origin, file.path().display().to_string());
                assert_eq!(format, "YAML");
            }
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn test_config_format_from_path() {
        assert_eq!(
            ConfigFormat::from_path(Path::new("harvest.yml")).unwrap(),
            ConfigFormat::Yaml
        );
        assert_eq!(
            ConfigFormat::from_path(Path::new("harvest.TOML")).unwrap(),
            ConfigFormat::Toml
        );
        assert!(ConfigFormat::from_path(Path::new("harvest.ini")).is_err());
        assert!(ConfigFormat::from_path(Path::new("harvest")).is_err());
    }

    #[test]
    fn test_file_not_found() {
        let result = ConfigLoader::new().load("/nonexistent/harvest.yaml");
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }
}
