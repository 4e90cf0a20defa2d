use crate::mcp::config::McpConfig;
use crate::mcp::connector::ConnectorSettings;
use crate::mcp::hub::HubSettings;
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "config.yaml";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Path of the MCP server list
    #[arg(long, env = "MCP_CONFIG")]
    pub mcp_config: Option<String>,

    /// Seconds between connection attempts and health probes
    #[arg(long, env = "PROBE_INTERVAL_SECS")]
    pub probe_interval_secs: Option<u64>,

    /// Timeout for a single MCP request, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub console: ConsoleConfig,
    pub connector: ConnectorConfig,
    pub logging: LoggingConfig,
    pub mcp_config: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsoleConfig {
    pub prompt: String,
    pub system_message: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConnectorConfig {
    pub probe_interval_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("console.prompt", "-> ")?
            .set_default("console.system_message", "")?
            .set_default("connector.probe_interval_secs", 10)?
            .set_default("connector.request_timeout_secs", 30)?
            .set_default("logging.json", false)?
            .set_default("mcp_config", "mcp.json")?;

        // An explicit file must exist, the cwd fallback is optional.
        match &cli.config {
            Some(path) => builder = builder.add_source(File::from(Path::new(path)).required(true)),
            None => {
                builder = builder
                    .add_source(File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false));
            }
        }

        // E.g. TOOL_CONSOLE__CONNECTOR__PROBE_INTERVAL_SECS=5
        builder = builder.add_source(
            Environment::with_prefix("TOOL_CONSOLE")
                .separator("__")
                .try_parsing(true),
        );

        // Priority: CLI flag > CLI env var > TOOL_CONSOLE__* > config file > defaults.
        if let Some(path) = cli.mcp_config {
            builder = builder.set_override("mcp_config", path)?;
        }
        if let Some(secs) = cli.probe_interval_secs {
            builder = builder.set_override("connector.probe_interval_secs", secs)?;
        }
        if let Some(secs) = cli.request_timeout_secs {
            builder = builder.set_override("connector.request_timeout_secs", secs)?;
        }
        if cli.log_json {
            builder = builder.set_override("logging.json", true)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.connector.probe_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "connector.probe_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.connector.request_timeout_secs == 0 {
            return Err(config::ConfigError::Message(
                "connector.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hub_settings(&self) -> HubSettings {
        HubSettings {
            connector: ConnectorSettings {
                probe_interval: Duration::from_secs(self.connector.probe_interval_secs),
            },
            request_timeout: Duration::from_secs(self.connector.request_timeout_secs),
        }
    }

    /// The console's system message followed by every server's own message.
    pub fn system_message(&self, servers: &McpConfig) -> String {
        std::iter::once(self.console.system_message.trim())
            .chain(servers.system_messages().into_iter().map(str::trim))
            .filter(|msg| !msg.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
