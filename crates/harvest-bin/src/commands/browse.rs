// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `browse` command.

use std::fmt::Write as _;
use std::sync::Arc;

use harvest_opcua::{
    AddressSpaceBrowser, ConnectionManager, NodeCatalog, OpcUaConfig, OpcUaTransport,
};
use tracing::info;

use crate::cli::{BrowseArgs, Cli, OutputFormat};
use crate::error::{CliError, CliResult};
use crate::logging::init_logging;
use crate::runtime::default_transport;

/// Executes the `browse` command: connect, walk the address space, print.
pub async fn browse(cli: &Cli, args: BrowseArgs) -> CliResult<()> {
    let config = harvest_config::load_config(&cli.config)?;
    init_logging(
        &cli.effective_log_level(&config.logging),
        cli.effective_log_format(&config.logging),
    );

    let format = args.format;
    let catalog = discover(config.opcua, &args, default_transport()?).await?;
    print!("{}", render_catalog(&catalog, format)?);
    Ok(())
}

/// Connects with `config`, browses with the argument overrides and closes.
pub async fn discover(
    mut config: OpcUaConfig,
    args: &BrowseArgs,
    transport: Arc<dyn OpcUaTransport>,
) -> CliResult<NodeCatalog> {
    config.browse.enabled = true;
    if let Some(max_level) = args.max_level {
        config.browse.max_level = max_level;
    }
    if let Some(max_per_parent) = args.max_per_parent {
        config.browse.max_nodes_per_parent = max_per_parent;
    }
    config.validate()?;

    let config = Arc::new(config);
    let connection = Arc::new(ConnectionManager::new(Arc::clone(&config), transport));
    connection
        .establish_connection(config.startup_attempts)
        .await?;

    let browser = AddressSpaceBrowser::new(Arc::clone(&connection));
    let result = browser.browse().await;
    connection.close().await;

    let catalog = result?;
    info!(nodes = catalog.len(), "Browse finished");
    Ok(catalog)
}

/// Renders a catalog as an aligned table or a JSON array.
pub fn render_catalog(catalog: &NodeCatalog, format: OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Json => {
            let nodes: Vec<_> = catalog.iter().map(|node| &**node).collect();
            let mut text = serde_json::to_string_pretty(&nodes)
                .map_err(|e| CliError::runtime(format!("Failed to render catalog: {e}")))?;
            text.push('\n');
            Ok(text)
        }
        OutputFormat::Text => {
            let width = catalog.iter().map(|node| node.id.len()).max().unwrap_or(0);
            let mut text = String::new();
            for node in catalog.iter() {
                let _ = writeln!(
                    text,
                    "{:<width$}  {:<10}  {}",
                    node.id,
                    node.value_type.to_string(),
                    node.path,
                );
            }
            let _ = writeln!(text, "{} node(s)", catalog.len());
            Ok(text)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use harvest_opcua::mock::MockTransport;
    use harvest_opcua::{NodeId, ValueType};

    fn plant() -> Arc<MockTransport> {
        let mock = Arc::new(MockTransport::new());
        let objects = NodeId::OBJECTS_FOLDER;
        let boiler = NodeId::string(2, "Boiler");
        let temp = NodeId::string(2, "Boiler.Temp");
        let valve = NodeId::string(2, "Boiler.Valve");
        let inner = NodeId::string(2, "Boiler.Valve.Position");

        mock.add_folder(objects.clone(), "Objects");
        mock.add_folder(NodeId::VIEWS_FOLDER, "Views");
        mock.add_folder(boiler.clone(), "Boiler");
        mock.add_variable(temp.clone(), "Temp", ValueType::Float64, 72.5);
        mock.add_folder(valve.clone(), "Valve");
        mock.add_variable(inner.clone(), "Position", ValueType::Int32, 40);
        mock.add_reference(objects, boiler.clone());
        mock.add_reference(boiler.clone(), temp);
        mock.add_reference(boiler, valve.clone());
        mock.add_reference(valve, inner);
        mock
    }

    #[tokio::test]
    async fn test_discover_walks_and_closes() {
        let mock = plant();
        let catalog = discover(
            OpcUaConfig::default(),
            &BrowseArgs::default(),
            Arc::clone(&mock) as Arc<dyn OpcUaTransport>,
        )
        .await
        .unwrap();

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains(&NodeId::string(2, "Boiler.Temp")));
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn test_discover_respects_max_level() {
        let mock = plant();
        let args = BrowseArgs {
            max_level: Some(2),
            ..BrowseArgs::default()
        };
        let catalog = discover(
            OpcUaConfig::default(),
            &args,
            Arc::clone(&mock) as Arc<dyn OpcUaTransport>,
        )
        .await
        .unwrap();

        assert_eq!(catalog.len(), 1);
        assert!(!catalog.contains(&NodeId::string(2, "Boiler.Valve.Position")));
    }

    #[tokio::test]
    async fn test_discover_unreachable() {
        let mock = plant();
        mock.fail_next_connects(10);
        let err = discover(
            OpcUaConfig::default(),
            &BrowseArgs::default(),
            Arc::clone(&mock) as Arc<dyn OpcUaTransport>,
        )
        .await
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_render_catalog() {
        let mock = plant();
        let catalog = discover(
            OpcUaConfig::default(),
            &BrowseArgs::default(),
            Arc::clone(&mock) as Arc<dyn OpcUaTransport>,
        )
        .await
        .unwrap();

        let text = render_catalog(&catalog, OutputFormat::Text).unwrap();
        assert!(text.contains("Objects.Boiler.Temp"));
        assert!(text.ends_with("2 node(s)\n"));

        let json: serde_json::Value =
            serde_json::from_str(&render_catalog(&catalog, OutputFormat::Json).unwrap()).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert!(json[0].get("id").is_some());
    }
}
