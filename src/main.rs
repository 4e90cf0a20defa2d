//! Tool Console
//!
//! Entry point: loads configuration, connects the configured MCP servers and
//! runs a line-oriented console over the merged tool catalog.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::manual_let_else)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::default_trait_access)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tool_console::AppConfig;
use tool_console::mcp::config::{McpConfig, load_mcp_config};
use tool_console::mcp::{McpHub, ToolRegistry};
use tool_console::plugins::{CONSOLE_PLUGIN, builtin_tools};

const HELP: &str = "\
Commands:
  tools                  list every namespaced tool
  servers                show connection state per server
  sync                   refresh the tool registry now
  call <tool> [json]     invoke a tool, e.g. call console__echo {\"text\":\"hi\"}
  help                   show this help
  quit                   disconnect and exit";

#[derive(Debug, PartialEq)]
enum Command {
    Tools,
    Servers,
    Sync,
    Call {
        tool: String,
        arguments: serde_json::Value,
    },
    Help,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    match head {
        "" => Ok(Command::Empty),
        "tools" => Ok(Command::Tools),
        "servers" => Ok(Command::Servers),
        "sync" => Ok(Command::Sync),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        "call" => {
            let (tool, args) = match rest.split_once(char::is_whitespace) {
                Some((tool, args)) => (tool, args.trim()),
                None => (rest, ""),
            };
            if tool.is_empty() {
                return Err("usage: call <tool> [json-args]".to_string());
            }
            let arguments = if args.is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(args).map_err(|e| format!("invalid JSON arguments: {e}"))?
            };
            Ok(Command::Call {
                tool: tool.to_string(),
                arguments,
            })
        }
        other => Err(format!("unknown command '{other}', type 'help'")),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    // stdout belongs to the console
    if json {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

fn load_servers(path: &str) -> anyhow::Result<McpConfig> {
    if !Path::new(path).exists() {
        warn!(name: "mcp.config.missing", path = %path, "MCP config not found, no servers configured");
        return Ok(McpConfig::default());
    }
    load_mcp_config(path).with_context(|| format!("failed to load MCP config from '{path}'"))
}

async fn run_command(hub: &McpHub, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Empty => {}
        Command::Help => println!("{HELP}"),
        Command::Quit => return Ok(false),
        Command::Tools => {
            let snapshot = hub.registry().snapshot();
            if snapshot.tool_count() == 0 {
                println!("(no tools)");
            }
            for (name, _, tool) in snapshot.tools() {
                println!("{name:<40} {}", tool.description);
            }
        }
        Command::Servers => {
            for status in hub.statuses() {
                let state = format!("{:?}", status.state);
                println!("{:<24} {state:<14} {} tools", status.name, status.tools);
            }
            for (name, reason) in hub.rejected() {
                println!("{name:<24} {:<14} {reason}", "Rejected");
            }
        }
        Command::Sync => {
            let report = hub.sync_now().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Call { tool, arguments } => match hub.call_tool(&tool, arguments).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => println!("error: {e}"),
        },
    }
    Ok(true)
}

async fn console(hub: &McpHub, prompt: &str) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!(name: "console.interrupted", "Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            // EOF
            break;
        };

        match parse_command(&line) {
            Ok(command) => {
                if !run_command(hub, command).await? {
                    break;
                }
            }
            Err(msg) => println!("{msg}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing (M-LOG-STRUCTURED)
    init_tracing(config.logging.json);

    let servers = load_servers(&config.mcp_config)?;
    info!(
        name: "console.config.loaded",
        mcp_config = %config.mcp_config,
        servers = servers.mcp_servers.len(),
        probe_interval_secs = config.connector.probe_interval_secs,
        "Configuration loaded"
    );

    let system_message = config.system_message(&servers);
    if !system_message.is_empty() {
        println!("{system_message}\n");
    }

    let hub = McpHub::from_config(&servers, config.hub_settings(), Arc::new(ToolRegistry::new()));
    hub.register_plugin(CONSOLE_PLUGIN, builtin_tools())?;
    hub.start();

    println!("Type 'help' for commands.");
    let result = console(&hub, &config.console.prompt).await;

    hub.shutdown().await;
    result
}
