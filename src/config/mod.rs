//! Configuration schema, loading, and the environment overlay.

pub mod loader;
pub mod schema;

pub use loader::{ENV_PREFIX, apply_env_overlay, default_config_path, load_config, parse_with_env, save_config};
pub use schema::{
    AgentConfig, AppConfig, AuthConfig, ChannelsConfig, GatewayConfig, MemoryConfig, ModelsConfig,
    PluginsConfig, ProfileConfig, ProviderConfig, SandboxConfig, SessionConfig, SkillsConfig,
    ToolsConfig,
};
