// MCP Harness - Command Line Entry Point
//
// Thin CLI over the library for poking at an MCP server by hand:
// - schema / resources / call / stream against a running server
// - --spawn to start the configured server first and stop it afterwards
// - check: start, wait for readiness, validate the schema, stop
//
// Results are printed to stdout as pretty JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use mcp_harness::config::HarnessConfig;
use mcp_harness::logging;
use mcp_harness::mcp::McpTestClient;
use mcp_harness::server::McpServerManager;
use mcp_harness::testing::{collect_stream_responses, validate_schema, CollectOptions};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// MCP Harness: drive and check MCP servers
#[derive(Parser, Debug)]
#[command(name = "mcp-harness")]
#[command(version)]
#[command(about = "Test harness for MCP servers", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: $MCP_HARNESS_CONFIG or the XDG config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the client endpoint
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Debug, Clone, Copy)]
struct SpawnArgs {
    /// Start the configured server before running the command
    #[arg(long)]
    spawn: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the tool and resource schema
    Schema {
        #[command(flatten)]
        spawn: SpawnArgs,
    },
    /// List resources, or show one by id
    Resources {
        /// Resource id
        id: Option<String>,

        #[command(flatten)]
        spawn: SpawnArgs,
    },
    /// Call a tool and print the normalized response
    Call {
        /// Tool name
        tool: String,

        /// Tool parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        #[command(flatten)]
        spawn: SpawnArgs,
    },
    /// Call a tool with streaming and print the collected events
    Stream {
        /// Tool name
        tool: String,

        /// Tool parameters as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,

        /// Stop after this many events
        #[arg(long)]
        max_items: Option<usize>,

        /// Give up collecting after this long
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        #[command(flatten)]
        spawn: SpawnArgs,
    },
    /// Start the configured server, validate its schema and stop it
    Check,
}

impl Commands {
    fn spawns_server(&self) -> bool {
        match self {
            Commands::Schema { spawn }
            | Commands::Resources { spawn, .. }
            | Commands::Call { spawn, .. }
            | Commands::Stream { spawn, .. } => spawn.spawn,
            Commands::Check => true,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => HarnessConfig::load_from_path(path)?,
        None => HarnessConfig::load()?,
    };
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(url) = &args.url {
        config.client.base_url = url.clone();
    }

    logging::init(&config.logging)?;

    let mut server = if args.command.spawns_server() {
        Some(start_server(&config).await?)
    } else {
        None
    };

    let client = McpTestClient::from_config(&config.client);
    let result = run(&client, args.command).await;
    client.close();

    if let Some(server) = server.as_mut() {
        server.stop().await;
    }

    result
}

async fn start_server(config: &HarnessConfig) -> Result<McpServerManager> {
    let manager_config = config.server_manager_config()?;
    info!(
        command = %manager_config.command,
        args = ?manager_config.args,
        "Starting MCP server"
    );

    let mut server = McpServerManager::new(manager_config);
    server.on_error(|e| {
        error!(code = %e.code(), "Server error: {}", e);
        Ok(())
    });
    server
        .start()
        .await
        .context("Failed to start the configured MCP server")?;

    info!(pid = ?server.pid(), "MCP server ready");
    Ok(server)
}

async fn run(client: &McpTestClient, command: Commands) -> Result<()> {
    match command {
        Commands::Schema { .. } => {
            let schema = client.get_schema().await?;
            print_json(&schema)
        }
        Commands::Resources { id: Some(id), .. } => {
            let resource = client.get_resource(&id).await?;
            print_json(&resource)
        }
        Commands::Resources { id: None, .. } => {
            let resources = client.get_resources().await?;
            print_json(&resources)
        }
        Commands::Call { tool, params, .. } => {
            let params = parse_params(&params)?;
            let response = client.call_tool::<Value>(&tool, params).await?;
            print_json(&response)
        }
        Commands::Stream {
            tool,
            params,
            max_items,
            timeout_ms,
            ..
        } => {
            let params = parse_params(&params)?;
            let events = client.call_tool_with_stream(&tool, params).await?;

            let mut options = CollectOptions::default()
                .timeout(Duration::from_millis(timeout_ms))
                .throw_on_timeout(false);
            if let Some(max_items) = max_items {
                options = options.max_items(max_items);
            }

            let items = collect_stream_responses(events, options).await?;
            print_json(&items)
        }
        Commands::Check => {
            let schema = client.get_schema().await?;
            let result = validate_schema(&serde_json::to_value(&schema)?);
            print_json(&serde_json::json!({
                "valid": result.valid,
                "errors": result.errors,
                "tools": schema.tools.len(),
                "resourceTypes": schema.resources.len(),
            }))?;

            if !result.valid {
                anyhow::bail!("Schema validation failed with {} error(s)", result.errors.len());
            }
            Ok(())
        }
    }
}

fn parse_params(raw: &str) -> Result<Value> {
    let params: Value =
        serde_json::from_str(raw).with_context(|| format!("Invalid --params JSON: {}", raw))?;
    if !params.is_object() {
        anyhow::bail!("--params must be a JSON object");
    }
    Ok(params)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
