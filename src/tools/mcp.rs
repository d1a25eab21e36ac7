//! MCP tool gating via the `use_mcp_tool` meta-tool.
//!
//! MCP-sourced tools are hidden from the model's builtin tool list unless
//! pinned. Everything else is reachable only through this meta-tool, whose
//! handler re-checks policy, validates the arguments against the target
//! tool's JSON schema, and forwards the call to the managing MCP client.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::policy::EffectivePolicy;
use super::registry::ToolRegistry;
use super::schema;
use super::traits::{FnHandler, ToolDefinition, ToolEntry, ToolSource};

/// Transport to the MCP servers managing remote tools.
#[async_trait]
pub trait McpClient: Send + Sync {
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        args: Value,
    ) -> std::result::Result<Value, String>;
}

/// Build the `use_mcp_tool` entry for one dispatch. The effective policy
/// is captured at assembly time so the re-check matches what the agent
/// was granted.
pub fn use_mcp_tool(
    registry: Arc<ToolRegistry>,
    policy: EffectivePolicy,
    client: Arc<dyn McpClient>,
) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "use_mcp_tool",
            "Invoke a tool provided by a connected MCP server.",
            json!({
                "type": "object",
                "properties": {
                    "tool_name": {"type": "string"},
                    "arguments": {"type": "object"}
                },
                "required": ["tool_name", "arguments"]
            }),
        ),
        FnHandler::new(move |args| {
            let registry = Arc::clone(&registry);
            let policy = policy.clone();
            let client = Arc::clone(&client);
            async move {
                let tool_name = args["tool_name"]
                    .as_str()
                    .ok_or("'tool_name' must be a string")?
                    .to_string();
                let arguments = args["arguments"].clone();

                let entry = registry
                    .get(&tool_name)
                    .filter(|e| e.source == ToolSource::Mcp)
                    .ok_or_else(|| format!("unknown MCP tool: {tool_name}"))?;

                if !policy.is_allowed(&tool_name) {
                    return Err(format!("blocked by policy: {tool_name}"));
                }

                schema::validate(&entry.definition.input_schema, &arguments)
                    .map_err(|e| e.to_string())?;

                let server = entry
                    .mcp_server
                    .clone()
                    .ok_or_else(|| format!("tool {tool_name} has no managing MCP server"))?;
                client.call_tool(&server, &tool_name, arguments).await
            }
        }),
    )
}
