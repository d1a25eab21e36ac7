//! Tool definitions, annotations, and the handler seam.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Risk & annotations ───────────────────────────────────────────────────────

/// Risk tier of a tool or shell command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Green,
    Yellow,
    Red,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    pub risk_level: RiskLevel,
    pub read_only: bool,
    pub destructive: bool,
    pub idempotent: bool,
}

impl Default for ToolAnnotations {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Yellow,
            read_only: false,
            destructive: false,
            idempotent: false,
        }
    }
}

impl ToolAnnotations {
    pub fn read_only() -> Self {
        Self {
            risk_level: RiskLevel::Green,
            read_only: true,
            destructive: false,
            idempotent: true,
        }
    }
}

// ─── Definition ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Stable machine identifier (snake_case), globally unique.
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub annotations: ToolAnnotations,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            annotations: ToolAnnotations::default(),
        }
    }

    pub fn with_annotations(mut self, annotations: ToolAnnotations) -> Self {
        self.annotations = annotations;
        self
    }

    /// The subset a provider needs in its `tools` array.
    pub fn to_spec(&self) -> crate::llm::ToolSpec {
        crate::llm::ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }
}

// ─── Handler ──────────────────────────────────────────────────────────────────

/// A capability the agent loop can invoke. Handler errors are plain
/// strings; the executor captures them into structured tool results.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> std::result::Result<Value, String>;
}

/// Closure-backed handler, for tools that don't warrant a named type.
pub struct FnHandler {
    f: Arc<dyn Fn(Value) -> BoxFuture<'static, std::result::Result<Value, String>> + Send + Sync>,
}

impl FnHandler {
    pub fn new<F, Fut>(f: F) -> Arc<Self>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<Value, String>> + Send + 'static,
    {
        Arc::new(Self {
            f: Arc::new(move |args| Box::pin(f(args))),
        })
    }
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, args: Value) -> std::result::Result<Value, String> {
        (self.f)(args).await
    }
}

// ─── Registry entry ───────────────────────────────────────────────────────────

/// Where a tool came from. MCP tools are policy-gated behind the
/// `use_mcp_tool` meta-tool unless explicitly pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSource {
    Builtin,
    Mcp,
    Plugin,
    Memory,
    Orchestration,
}

pub struct ToolEntry {
    pub definition: ToolDefinition,
    pub handler: Arc<dyn ToolHandler>,
    pub source: ToolSource,
    /// Name of the managing MCP server, for `source == Mcp`.
    pub mcp_server: Option<String>,
}

impl ToolEntry {
    pub fn builtin(definition: ToolDefinition, handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            definition,
            handler,
            source: ToolSource::Builtin,
            mcp_server: None,
        }
    }

    pub fn with_source(mut self, source: ToolSource) -> Self {
        self.source = source;
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn risk_levels_are_ordered() {
        assert!(RiskLevel::Green < RiskLevel::Yellow);
        assert!(RiskLevel::Yellow < RiskLevel::Red);
        assert!(RiskLevel::Red < RiskLevel::Critical);
    }

    #[tokio::test]
    async fn fn_handler_invokes_closure() {
        let handler = FnHandler::new(|args| async move {
            Ok(json!({"echo": args["message"]}))
        });
        let out = handler.call(json!({"message": "ping"})).await.unwrap();
        assert_eq!(out["echo"], "ping");
    }

    #[test]
    fn definition_to_spec() {
        let def = ToolDefinition::new("read_file", "Read a file", json!({"type": "object"}));
        let spec = def.to_spec();
        assert_eq!(spec.name, "read_file");
        assert_eq!(spec.parameters, json!({"type": "object"}));
    }
}
