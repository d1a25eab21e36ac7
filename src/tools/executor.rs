//! Tool dispatch: argument parsing, handler invocation, error capture,
//! and duration measurement.
//!
//! Execution never fails the caller — every failure mode (unknown tool,
//! bad JSON, handler error) is captured into the returned record so the
//! agent loop can feed it back to the model as a tool result.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::registry::ToolRegistry;
use super::sandbox::SandboxRouter;
use crate::llm::ToolCall;

/// One completed tool execution.
#[derive(Debug, Clone)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    pub output: Value,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ToolExecution {
    /// The string that goes into the tool-role conversation message.
    pub fn result_text(&self) -> String {
        match &self.error {
            Some(error) => error.clone(),
            None => match &self.output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}

pub struct ToolExecutor {
    sandbox: Option<Arc<SandboxRouter>>,
}

impl ToolExecutor {
    pub fn new() -> Self {
        Self { sandbox: None }
    }

    pub fn with_sandbox(mut self, sandbox: Arc<SandboxRouter>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    #[tracing::instrument(name = "tool.execute", skip_all, fields(tool = %call.name, call_id = %call.id))]
    pub async fn execute(&self, call: &ToolCall, registry: &ToolRegistry) -> ToolExecution {
        let started = Instant::now();
        let record = |success: bool, output: Value, error: Option<String>| ToolExecution {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success,
            output,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        let Some(entry) = registry.get(&call.name) else {
            return record(false, Value::Null, Some(format!("Unknown tool: {}", call.name)));
        };

        let args: Value = match serde_json::from_str(&call.arguments) {
            Ok(args) => args,
            Err(_) => {
                return record(
                    false,
                    Value::Null,
                    Some(format!("Invalid JSON arguments: {}", call.arguments)),
                );
            }
        };

        let result = match &self.sandbox {
            Some(router) if router.should_sandbox(&entry) => router.run(&entry, args).await,
            _ => entry.handler.call(args).await,
        };

        match result {
            Ok(output) => record(true, output, None),
            Err(message) => record(false, Value::Null, Some(message)),
        }
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}
