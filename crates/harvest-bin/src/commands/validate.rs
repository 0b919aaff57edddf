// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use harvest_config::HarvestConfig;
use harvest_opcua::SecurityMode;

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{CliError, CliResult};

/// Executes the `validate` command to validate configuration.
pub fn validate(cli: &Cli, args: ValidateArgs) -> CliResult<()> {
    let config_path = &cli.config;

    if !config_path.exists() {
        return Err(CliError::config(format!(
            "Configuration file not found: {}",
            config_path.display()
        )));
    }

    let config = harvest_config::load_config(config_path)
        .map_err(|e| CliError::config(format!("Configuration validation failed: {}", e)))?;
    let warnings = validation_warnings(&config);
    let opcua = &config.opcua;

    match args.format {
        OutputFormat::Text => {
            println!("✓ Configuration is valid: {}", config_path.display());
            println!();
            println!("Summary:");
            println!("  Endpoint: {}", opcua.endpoint);
            println!("  Security: {} / {}", opcua.security_policy, opcua.security_mode);
            println!("  Mode: {}", opcua.mode);
            println!("  Period: {:?}", config.collector.period);
            println!("  Nodes: {}", opcua.nodes.len());
            println!(
                "  Browse: {}",
                if opcua.browse.enabled { "enabled" } else { "disabled" }
            );

            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in &warnings {
                    println!("  ⚠ {}", warning);
                }
            }

            if args.show_config {
                println!();
                println!("Parsed configuration:");
                println!(
                    "{}",
                    serde_json::to_string_pretty(&redacted(&config))
                        .unwrap_or_else(|_| "(serialization error)".to_string())
                );
            }
        }
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "config_path": config_path.display().to_string(),
                "summary": {
                    "endpoint": opcua.endpoint,
                    "security_policy": opcua.security_policy.to_string(),
                    "security_mode": opcua.security_mode.to_string(),
                    "mode": opcua.mode.to_string(),
                    "period_ms": config.collector.period.as_millis() as u64,
                    "node_count": opcua.nodes.len(),
                    "browse_enabled": opcua.browse.enabled,
                },
                "warnings": warnings,
                "config": if args.show_config { Some(redacted(&config)) } else { None },
            });
            let text = serde_json::to_string_pretty(&output)
                .map_err(|e| CliError::runtime(format!("Failed to render output: {e}")))?;
            println!("{}", text);
        }
    }

    if args.strict && !warnings.is_empty() {
        return Err(CliError::config(format!(
            "Strict mode: {} warning(s) found",
            warnings.len()
        )));
    }

    Ok(())
}

/// Returns the non-fatal problems of a valid configuration.
pub fn validation_warnings(config: &HarvestConfig) -> Vec<String> {
    let opcua = &config.opcua;
    let mut warnings = Vec::new();

    if opcua.username.is_some() && opcua.security_mode == SecurityMode::None {
        warnings.push("Credentials are sent over an unencrypted channel".to_string());
    }
    if opcua.trust_server_certs {
        warnings.push("Server certificates are trusted without verification".to_string());
    }
    if opcua.browse.enabled {
        if opcua.browse.max_level == 0 && opcua.browse.max_nodes_per_parent == 0 {
            warnings.push("Browsing has no depth or fan-out limit".to_string());
        }
        if opcua.nodes.is_empty() {
            warnings.push("Browsing starts from the Objects and Views folders".to_string());
        }
    }
    if opcua.client_cert.is_some() && opcua.security_mode == SecurityMode::None {
        warnings.push("A client certificate is configured but security mode is None".to_string());
    }

    warnings
}

fn redacted(config: &HarvestConfig) -> HarvestConfig {
    let mut config = config.clone();
    if config.opcua.password.is_some() {
        config.opcua.password = Some("********".to_string());
    }
    config
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_opcua::NodeConfig;

    fn config() -> HarvestConfig {
        let mut config = HarvestConfig::default();
        config.opcua.nodes.push(NodeConfig::string(2, "Temp"));
        config
    }

    #[test]
    fn test_clean_config_has_no_warnings() {
        assert!(validation_warnings(&config()).is_empty());
    }

    #[test]
    fn test_insecure_credentials_warn() {
        let mut config = config();
        config.opcua.username = Some("operator".into());
        config.opcua.password = Some("secret".into());
        config.opcua.trust_server_certs = true;

        let warnings = validation_warnings(&config);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("unencrypted"));
    }

    #[test]
    fn test_unbounded_browse_warns() {
        let mut config = config();
        config.opcua.nodes.clear();
        config.opcua.browse.enabled = true;

        let warnings = validation_warnings(&config);
        assert_eq!(warnings.len(), 2);

        config.opcua.browse.max_level = 3;
        assert_eq!(validation_warnings(&config).len(), 1);
    }

    #[test]
    fn test_redacted_hides_password() {
        let mut config = config();
        config.opcua.username = Some("operator".into());
        config.opcua.password = Some("secret".into());

        let json = serde_json::to_string(&redacted(&config)).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("operator"));
    }
}
