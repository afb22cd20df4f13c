//! toolbridge CLI: list MCP servers and their tools, or call one tool.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use toolbridge_mcp::McpManager;

#[derive(Parser)]
#[command(name = "toolbridge", version, about = "Discover and call tools on MCP servers")]
struct Cli {
    /// Path to the servers file (overrides TOOLBRIDGE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configured servers and whether they started
    Servers,
    /// List the tools of every running server
    Tools {
        /// Print the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Call a tool by name
    Call {
        /// Tool name
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    // Bad arguments are reported before any server is started
    let arguments = match &cli.command {
        Command::Call { args, .. } => Some(parse_arguments(args)?),
        _ => None,
    };

    let config = toolbridge_config::load(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::debug!(
        "Loaded {} server(s) from {}",
        config.servers.len(),
        config.path.display()
    );

    let mut manager = McpManager::start(&config.servers, &config.client_info()).await;

    let status = match cli.command {
        Command::Servers => {
            print!("{}", output::render_servers(&config, &manager));
            ExitCode::SUCCESS
        }
        Command::Tools { json } => {
            let tools = manager.all_tools().await;
            if json {
                let value = output::tools_json(&tools, &manager);
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).context("Failed to encode tools")?
                );
            } else if tools.is_empty() {
                eprintln!("No tools available");
            } else {
                print!("{}", output::render_tools(&tools, &manager));
            }
            ExitCode::SUCCESS
        }
        Command::Call { tool, .. } => {
            let arguments = arguments.unwrap_or_else(|| serde_json::json!({}));
            let result = manager.call_tool(&tool, arguments).await;
            let rendered = output::render_result(&result);
            if result.is_error {
                eprintln!("{rendered}");
                ExitCode::FAILURE
            } else {
                println!("{rendered}");
                ExitCode::SUCCESS
            }
        }
    };

    manager.close().await;
    Ok(status)
}

/// Parse `--args`, which must be a JSON object.
fn parse_arguments(raw: &str) -> Result<serde_json::Value> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--args is not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("--args must be a JSON object, got {value}");
    }
    Ok(value)
}
