use crate::mcp::error::{McpError, McpResult};
use crate::mcp::registry::sanitize_tool_name;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};
use url::Url;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
}

/// One entry of the `mcpServers` map.
///
/// Exactly one of `url` or `command` must be set. This is checked by
/// [`RemoteServerConfig::connection_mode`] rather than by the deserializer so
/// that one bad entry does not reject the whole file.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
    /// Streamable HTTP endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// Command launching a stdio server.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment for the launched process.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Sent as the `ApiKey` header.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Sent as the `ImpersonatingUser` header, only together with `api_key`.
    #[serde(default)]
    pub impersonating_user: Option<String>,
    /// Appended to the console's system message.
    #[serde(default)]
    pub server_system_message: Option<String>,
}

/// Identity and reachability of one remote server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteServerConfig {
    pub name: String,
    pub entry: McpServerEntry,
}

/// How a session to a server is established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionMode {
    Http {
        endpoint: Url,
        api_key: Option<String>,
        impersonating_user: Option<String>,
    },
    ChildProcess {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
    },
}

impl McpConfig {
    /// Server configs in name order.
    pub fn servers(&self) -> Vec<RemoteServerConfig> {
        self.mcp_servers
            .iter()
            .map(|(name, entry)| RemoteServerConfig {
                name: name.clone(),
                entry: entry.clone(),
            })
            .collect()
    }

    /// System messages contributed by the configured servers.
    pub fn system_messages(&self) -> Vec<&str> {
        self.mcp_servers
            .values()
            .filter_map(|entry| entry.server_system_message.as_deref())
            .filter(|msg| !msg.trim().is_empty())
            .collect()
    }
}

impl RemoteServerConfig {
    pub fn new(name: impl Into<String>, entry: McpServerEntry) -> Self {
        Self {
            name: name.into(),
            entry,
        }
    }

    /// Resolve the single connection mode of this server.
    ///
    /// `${VAR}` placeholders are expanded from the process environment.
    pub fn connection_mode(&self) -> McpResult<ConnectionMode> {
        if self.name.trim().is_empty() {
            return Err(self.invalid("server name is empty"));
        }
        // "__" separates server and tool in namespaced names
        if sanitize_tool_name(&self.name).contains("__") {
            return Err(self.invalid("server name must not contain '__' after sanitizing"));
        }

        let url = non_empty(self.entry.url.as_deref());
        let command = non_empty(self.entry.command.as_deref());

        match (url, command) {
            (Some(_), Some(_)) => Err(self.invalid("both url and command are set")),
            (None, None) => Err(self.invalid("either url or command must be set")),
            (Some(url), None) => {
                let url = expand_env_placeholders(url);
                let endpoint = Url::parse(&url)
                    .map_err(|e| self.invalid(&format!("invalid url '{url}': {e}")))?;
                let api_key = non_empty(self.entry.api_key.as_deref()).map(expand_env_placeholders);
                let impersonating_user = non_empty(self.entry.impersonating_user.as_deref())
                    .map(expand_env_placeholders);
                if impersonating_user.is_some() && api_key.is_none() {
                    return Err(self.invalid("impersonatingUser requires apiKey"));
                }
                Ok(ConnectionMode::Http {
                    endpoint,
                    api_key,
                    impersonating_user,
                })
            }
            (None, Some(command)) => Ok(ConnectionMode::ChildProcess {
                command: expand_env_placeholders(command),
                args: self
                    .entry
                    .args
                    .iter()
                    .map(|arg| expand_env_placeholders(arg))
                    .collect(),
                env: expand_env_map(&self.entry.env),
            }),
        }
    }

    fn invalid(&self, reason: &str) -> McpError {
        McpError::Config {
            server: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

pub fn load_mcp_config(path: impl AsRef<Path>) -> anyhow::Result<McpConfig> {
    let txt = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&txt)?)
}

/// Expand "${VAR}" placeholders from the process environment.
/// Placeholders naming unset variables are left unchanged.
pub fn expand_env_placeholders(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match std::env::var(key) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}
