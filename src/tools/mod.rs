//! The tool layer: registry, layered policy, risk classification,
//! schema validation, execution, sandbox routing, and the builtin set.

pub mod builtin;
pub mod executor;
pub mod mcp;
pub mod policy;
pub mod registry;
pub mod risk;
pub mod sandbox;
pub mod schema;
pub mod traits;

pub use builtin::{builtin_groups, register_builtins};
pub use executor::{ToolExecution, ToolExecutor};
pub use mcp::{McpClient, use_mcp_tool};
pub use policy::{AuditEntry, EffectivePolicy, PolicyEngine, PolicyLayer};
pub use registry::ToolRegistry;
pub use risk::{CommandAssessment, assess_command};
pub use sandbox::{PassthroughSandbox, SandboxExecutor, SandboxMode, SandboxRouter};
pub use traits::{
    FnHandler, RiskLevel, ToolAnnotations, ToolDefinition, ToolEntry, ToolHandler, ToolSource,
};
