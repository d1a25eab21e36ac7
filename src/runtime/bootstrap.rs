//! Process wiring: one bus, one KV client, one gateway, one registry,
//! one policy engine, one channel manager — owned here and shut down in
//! reverse construction order.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::agent::{AgentDefinition, AgentManager};
use crate::bus::{KvStore, MessageBus, in_process};
use crate::channels::{BindingRegistry, ChannelManager};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::gateway::{
    Authenticator, Gateway, GatewayState, ResponseRouter, SessionTable, router,
};
use crate::hooks::HookRegistry;
use crate::llm::{LlmService, ModelProfile, OpenAiProvider};
use crate::memory::{FlushConfig, HashingEmbedder, MemoryStore, memory_tools, register_memory_flush};
use crate::orchestrator::{LocalAgentEntry, OrchestratorRegistry, coordination_tools};
use crate::session::SessionStore;
use crate::tools::{
    PolicyEngine, SandboxRouter, ToolExecutor, ToolRegistry, builtin_groups,
    register_builtins,
};

/// Build the LLM service from the `models` config section.
pub fn build_llm_service(config: &AppConfig) -> Result<LlmService> {
    let mut service = LlmService::new();
    for (name, provider) in &config.models.providers {
        match provider.kind.as_str() {
            "openai_compatible" => {
                let api_key = provider
                    .api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok());
                service.register_provider(
                    name,
                    Arc::new(OpenAiProvider::new(
                        &provider.base_url,
                        api_key,
                        provider.context_window,
                    )),
                );
            }
            other => {
                return Err(Error::Config(format!(
                    "provider '{name}' has unsupported kind '{other}'"
                )));
            }
        }
    }
    for (name, profile) in &config.models.profiles {
        service.add_profile(
            name,
            ModelProfile {
                provider: profile.provider.clone(),
                model: profile.model.clone(),
                context_window: profile.context_window,
                reserve_tokens: profile.reserve_tokens,
                temperature: profile.temperature,
                max_tokens: profile.max_tokens,
            },
        );
    }
    Ok(service)
}

pub struct Runtime {
    pub bus: Arc<dyn MessageBus>,
    pub kv: Arc<dyn KvStore>,
    pub gateway: Arc<Gateway>,
    pub ws_sessions: Arc<SessionTable>,
    pub hooks: Arc<HookRegistry>,
    pub tool_registry: Arc<ToolRegistry>,
    pub policy_engine: Arc<PolicyEngine>,
    pub manager: Arc<AgentManager>,
    pub channel_manager: Arc<ChannelManager>,
    pub orchestrator: Arc<OrchestratorRegistry>,
    pub memory: Option<Arc<MemoryStore>>,
    local_addr: std::net::SocketAddr,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Boot the full stack from config.
    pub async fn start(config: AppConfig) -> Result<Arc<Self>> {
        let llm = build_llm_service(&config)?;
        Self::start_with_llm(config, llm).await
    }

    /// Boot with an externally built LLM service (tests inject scripted
    /// providers here).
    pub async fn start_with_llm(config: AppConfig, llm: LlmService) -> Result<Arc<Self>> {
        config.validate()?;
        let llm = Arc::new(llm);

        let (bus, kv) = in_process();
        let ws_sessions = Arc::new(SessionTable::new());
        let response_router = Arc::new(ResponseRouter::new(Arc::clone(&ws_sessions)));
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&bus),
            Arc::clone(&kv),
            response_router,
            config.gateway.lane_watermark,
        ));
        let pump = gateway.start().await?;

        let hooks = Arc::new(HookRegistry::new());

        let tool_registry = Arc::new(ToolRegistry::new());
        register_builtins(&tool_registry, &config.tools.workspace, config.tools.yolo_mode)?;
        let mut groups = builtin_groups();
        groups.extend(config.tools.groups.clone());
        let policy_engine = Arc::new(PolicyEngine::new(config.tools.global.clone(), groups));

        let memory = match &config.memory {
            Some(memory_config) if memory_config.enabled => {
                let store = match &memory_config.path {
                    Some(path) => {
                        let path = path.to_string_lossy().to_string();
                        Arc::new(MemoryStore::open(&path, memory_config.dimension)?)
                    }
                    None => Arc::new(MemoryStore::in_memory(memory_config.dimension)?),
                };
                let embedder = Arc::new(HashingEmbedder::new(memory_config.dimension));
                register_memory_flush(
                    &hooks,
                    Arc::clone(&store),
                    Some(embedder.clone()),
                    FlushConfig::default(),
                );
                for tool in memory_tools(Arc::clone(&store), Some(embedder)) {
                    tool_registry.register(tool)?;
                }
                Some(store)
            }
            _ => None,
        };

        let orchestrator = Arc::new(OrchestratorRegistry::new(Arc::clone(&bus)));
        for tool in coordination_tools(Arc::clone(&orchestrator), "orchestrator") {
            tool_registry.register(tool)?;
        }

        let sessions = Arc::new(SessionStore::new(&config.session.dir));
        let bindings = Arc::new(BindingRegistry::new(config.bindings.clone()));
        let executor = Arc::new(
            ToolExecutor::new()
                .with_sandbox(Arc::new(SandboxRouter::passthrough(config.sandbox.mode))),
        );

        let manager = Arc::new(AgentManager::new(
            Arc::clone(&llm),
            Arc::clone(&tool_registry),
            Arc::clone(&hooks),
            Arc::clone(&policy_engine),
            executor,
            sessions,
            Arc::clone(&gateway),
            Arc::clone(&bindings),
        ));
        for agent in &config.agents {
            manager.register(AgentDefinition {
                agent_id: agent.id.clone(),
                system_prompt: agent.system_prompt.clone(),
                model_profile: agent.model.clone(),
                policy: agent.tools.clone().unwrap_or_default(),
                mcp_pinned: agent.mcp_pinned.clone(),
                max_turns: agent.max_turns,
                priority: agent.priority,
            })?;
            orchestrator.register_local(Arc::new(LocalAgentEntry::new(
                &agent.id,
                Arc::clone(&manager),
                Arc::clone(&bus),
            )));
        }
        manager.start().await?;

        let channel_manager = Arc::new(ChannelManager::new(bindings, Arc::clone(&gateway)));

        let auth = Arc::new(Authenticator::new(
            config.auth.tokens.clone(),
            config.auth.allow_anonymous,
        ));
        let state = GatewayState {
            gateway: Arc::clone(&gateway),
            sessions: Arc::clone(&ws_sessions),
            auth,
        };
        let listener = TcpListener::bind((config.gateway.host.as_str(), config.gateway.port))
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "cannot bind {}:{}: {e}",
                    config.gateway.host, config.gateway.port
                ))
            })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "gateway listening");

        let app = router(state);
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!("gateway server stopped: {err}");
            }
        });

        Ok(Arc::new(Self {
            bus,
            kv,
            gateway,
            ws_sessions,
            hooks,
            tool_registry,
            policy_engine,
            manager,
            channel_manager,
            orchestrator,
            memory,
            local_addr,
            tasks: parking_lot::Mutex::new(vec![pump, server]),
        }))
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.local_addr)
    }

    /// Tear down in reverse construction order: agents first, then the
    /// WebSocket sessions (close code 1001), then the background tasks.
    pub async fn shutdown(&self) {
        self.manager.shutdown();
        self.ws_sessions.close_all(1001);
        // Give socket tasks a beat to flush close frames.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!("runtime stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_with_env;

    fn test_config(session_dir: &std::path::Path) -> AppConfig {
        let doc = format!(
            r#"
[gateway]
host = "127.0.0.1"
port = 0

[[agents]]
id = "helper"
system_prompt = "You are helpful."
model = "default"

[[bindings]]
agentId = "helper"
channel = "default"

[models.providers.local]
base_url = "http://localhost:9/v1"

[models.profiles.default]
provider = "local"
model = "test-model"

[auth]
allow_anonymous = true

[session]
dir = "{}"

[tools]

[sandbox]

[plugins]

[memory]
dimension = 32
"#,
            session_dir.display()
        );
        parse_with_env(&doc, Vec::<(String, String)>::new()).unwrap()
    }

    #[tokio::test]
    async fn boot_reaches_ready_and_shuts_down_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = Runtime::start(test_config(dir.path())).await.unwrap();

        assert_eq!(
            runtime.manager.status("helper").unwrap(),
            crate::agent::AgentStatus::Ready
        );
        assert!(runtime.memory.is_some());
        assert!(runtime.tool_registry.get("memory_search").is_some());
        assert!(runtime.tool_registry.get("agent_spawn").is_some());
        assert!(runtime.local_addr().port() != 0);

        runtime.shutdown().await;
        assert_eq!(
            runtime.manager.status("helper").unwrap(),
            crate::agent::AgentStatus::Terminated
        );
    }

    #[tokio::test]
    async fn unsupported_provider_kind_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config
            .models
            .providers
            .get_mut("local")
            .unwrap()
            .kind = "soothsayer".to_string();
        assert!(matches!(build_llm_service(&config), Err(Error::Config(_))));
    }
}
