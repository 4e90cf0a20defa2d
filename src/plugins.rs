//! Built-in local tools, registered as the `console` plugin.

use crate::mcp::registry::NativeTool;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::sync::Arc;

/// Registry name of the built-in plugin.
pub const CONSOLE_PLUGIN: &str = "console";

pub fn builtin_tools() -> Vec<Arc<dyn NativeTool>> {
    vec![Arc::new(CurrentTimeTool), Arc::new(EchoTool)]
}

#[derive(Debug)]
pub struct CurrentTimeTool;

#[async_trait]
impl NativeTool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Return the current UTC date and time."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn call(&self, _args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let now = Utc::now();
        Ok(json!({
            "utc": now.to_rfc3339_opts(SecondsFormat::Secs, true),
            "unix": now.timestamp()
        }))
    }
}

#[derive(Debug)]
pub struct EchoTool;

#[async_trait]
impl NativeTool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back. Useful to check that tool calls work."
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo."
                }
            },
            "required": ["text"]
        })
    }

    async fn call(&self, args: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let text = args["text"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing text"))?;
        Ok(json!({ "text": text }))
    }
}
