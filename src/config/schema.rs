//! The configuration document.
//!
//! One structured TOML file with required sections `gateway, agents,
//! bindings, models, auth, session, tools, sandbox, plugins` and optional
//! `memory, skills, channels`. Unknown top-level keys are rejected at
//! parse time.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::channels::Binding;
use crate::error::{Error, Result};
use crate::tools::{PolicyLayer, SandboxMode};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub agents: Vec<AgentConfig>,
    pub bindings: Vec<Binding>,
    pub models: ModelsConfig,
    pub auth: AuthConfig,
    pub session: SessionConfig,
    pub tools: ToolsConfig,
    pub sandbox: SandboxConfig,
    pub plugins: PluginsConfig,
    #[serde(default)]
    pub memory: Option<MemoryConfig>,
    #[serde(default)]
    pub skills: Option<SkillsConfig>,
    #[serde(default)]
    pub channels: Option<ChannelsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_watermark")]
    pub lane_watermark: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8800
}
fn default_watermark() -> usize {
    1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub system_prompt: String,
    /// Model profile name (see `models.profiles`).
    pub model: String,
    /// Agent-level tool policy layer.
    #[serde(default)]
    pub tools: Option<PolicyLayer>,
    /// MCP tools surfaced directly instead of via `use_mcp_tool`.
    #[serde(default)]
    pub mcp_pinned: Vec<String>,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default)]
    pub priority: i32,
}

fn default_max_turns() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub profiles: HashMap<String, ProfileConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Only `openai_compatible` ships in-crate.
    #[serde(default = "default_provider_kind")]
    pub kind: String,
    pub base_url: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_provider_kind() -> String {
    "openai_compatible".to_string()
}
fn default_context_window() -> usize {
    128_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub context_window: usize,
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

fn default_reserve_tokens() -> usize {
    2_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// token → user identity.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    #[serde(default)]
    pub allow_anonymous: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_workspace")]
    pub workspace: PathBuf,
    /// Admits red-risk shell commands.
    #[serde(default)]
    pub yolo_mode: bool,
    /// Global policy layer.
    #[serde(default = "PolicyLayer::allow_all")]
    pub global: PolicyLayer,
    /// Extra group aliases beyond the builtin ones.
    #[serde(default)]
    pub groups: HashMap<String, Vec<String>>,
}

fn default_workspace() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Database file; in-memory when omitted.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_true() -> bool {
    true
}
fn default_dimension() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_buffer")]
    pub buffer: usize,
}

fn default_buffer() -> usize {
    256
}

impl AppConfig {
    /// Cross-section consistency checks.
    pub fn validate(&self) -> Result<()> {
        for agent in &self.agents {
            if !self.models.profiles.contains_key(&agent.model) {
                return Err(Error::Config(format!(
                    "agent '{}' names unknown model profile '{}'",
                    agent.id, agent.model
                )));
            }
        }
        for profile in self.models.profiles.values() {
            if !self.models.providers.contains_key(&profile.provider) {
                return Err(Error::Config(format!(
                    "model profile '{}' names unknown provider '{}'",
                    profile.model, profile.provider
                )));
            }
        }
        let agent_ids: std::collections::HashSet<&str> =
            self.agents.iter().map(|a| a.id.as_str()).collect();
        for binding in &self.bindings {
            if !agent_ids.contains(binding.agent_id.as_str()) {
                return Err(Error::Config(format!(
                    "binding targets unknown agent '{}'",
                    binding.agent_id
                )));
            }
        }
        Ok(())
    }
}
