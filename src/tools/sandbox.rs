//! Sandbox routing for tool execution.
//!
//! The mode decides which tools run inside the sandbox; the executor
//! behind [`SandboxExecutor`] is an external collaborator (a container
//! driver in production). [`PassthroughSandbox`] runs the tool's own
//! handler and exists so the routing seam is exercised without a runtime.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::traits::{RiskLevel, ToolEntry};

/// Which tools get routed into the sandbox.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    /// Never sandbox.
    #[default]
    Off,
    /// Sandbox shell and other non-green tools.
    Risky,
    /// Sandbox every tool.
    All,
}

/// Executes a tool inside an isolation boundary.
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute(&self, entry: &ToolEntry, args: Value) -> std::result::Result<Value, String>;
}

/// No isolation: delegates straight to the tool handler.
pub struct PassthroughSandbox;

#[async_trait]
impl SandboxExecutor for PassthroughSandbox {
    async fn execute(&self, entry: &ToolEntry, args: Value) -> std::result::Result<Value, String> {
        entry.handler.call(args).await
    }
}

pub struct SandboxRouter {
    mode: SandboxMode,
    executor: Arc<dyn SandboxExecutor>,
}

impl SandboxRouter {
    pub fn new(mode: SandboxMode, executor: Arc<dyn SandboxExecutor>) -> Self {
        Self { mode, executor }
    }

    pub fn passthrough(mode: SandboxMode) -> Self {
        Self::new(mode, Arc::new(PassthroughSandbox))
    }

    pub fn should_sandbox(&self, entry: &ToolEntry) -> bool {
        match self.mode {
            SandboxMode::Off => false,
            SandboxMode::All => true,
            SandboxMode::Risky => entry.definition.annotations.risk_level > RiskLevel::Green,
        }
    }

    pub async fn run(&self, entry: &ToolEntry, args: Value) -> std::result::Result<Value, String> {
        self.executor
            .execute(entry, args)
            .await
            .map_err(|e| format!("sandbox: {e}"))
    }
}
