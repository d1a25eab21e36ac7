//! Coordination tools exposed to agents: spawn, send, broadcast,
//! pipeline, and supervisor delegation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::{Value, json};

use super::registry::OrchestratorRegistry;
use crate::protocol::{MessageEnvelope, kind};
use crate::tools::{FnHandler, ToolDefinition, ToolEntry, ToolSource};

const SPAWN_TIMEOUT: Duration = Duration::from_secs(30);
const SEND_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatch a task to `target` and return the last assistant text.
async fn run_task(
    registry: &OrchestratorRegistry,
    caller: &str,
    target: &str,
    text: String,
    timeout: Duration,
) -> std::result::Result<String, String> {
    let entry = registry.lookup(target);
    let envelope = MessageEnvelope::new(
        kind::TASK_REQUEST,
        format!("agent://{caller}"),
        format!("agent://{target}"),
        json!({ "text": text }),
    );
    let queue = entry
        .dispatch(envelope)
        .await
        .map_err(|e| format!("dispatch to '{target}' failed: {e}"))?;

    let drain = async {
        let mut last_text = String::new();
        while let Some(event) = queue.next().await {
            let envelope = event.map_err(|e| e.to_string())?;
            match envelope.kind.as_str() {
                kind::TASK_RESPONSE => {
                    if let Some(text) = envelope.data.get("text").and_then(|v| v.as_str())
                        && !text.is_empty()
                    {
                        last_text = text.to_string();
                    }
                }
                kind::TASK_ERROR => {
                    let error = envelope
                        .data
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("task failed");
                    return Err(format!("agent '{target}' failed: {error}"));
                }
                _ => {}
            }
        }
        Ok(last_text)
    };

    match tokio::time::timeout(timeout, drain).await {
        Ok(result) => result,
        Err(_) => {
            queue.cancel();
            Err(format!("agent '{target}' timed out after {timeout:?}"))
        }
    }
}

fn delegated_text(caller: &str, task: &str, context: Option<&str>) -> String {
    let mut text = format!("[Delegated from {caller}]\nTask: {task}");
    if let Some(context) = context {
        text.push_str(&format!("\nContext: {context}"));
    }
    text
}

// ─── Tool constructors ────────────────────────────────────────────────────────

pub fn agent_spawn_tool(registry: Arc<OrchestratorRegistry>, caller: String) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "agent_spawn",
            "Delegate a task to another agent and wait for its final answer.",
            json!({
                "type": "object",
                "properties": {
                    "target_agent": {"type": "string"},
                    "task": {"type": "string"},
                    "context": {"type": "string"}
                },
                "required": ["target_agent", "task"]
            }),
        ),
        FnHandler::new(move |args| {
            let registry = Arc::clone(&registry);
            let caller = caller.clone();
            async move {
                let target = args["target_agent"].as_str().ok_or("'target_agent' must be a string")?;
                let task = args["task"].as_str().ok_or("'task' must be a string")?;
                let context = args["context"].as_str();
                let text = delegated_text(&caller, task, context);
                run_task(&registry, &caller, target, text, SPAWN_TIMEOUT)
                    .await
                    .map(Value::String)
            }
        }),
    )
    .with_source(ToolSource::Orchestration)
}

pub fn agent_send_tool(registry: Arc<OrchestratorRegistry>, caller: String) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "agent_send",
            "Send a message to another agent; optionally wait for its reply.",
            json!({
                "type": "object",
                "properties": {
                    "target_agent": {"type": "string"},
                    "message": {"type": "string"},
                    "wait_for_reply": {"type": "boolean"},
                    "max_exchanges": {"type": "integer", "minimum": 1}
                },
                "required": ["target_agent", "message"]
            }),
        ),
        FnHandler::new(move |args| {
            let registry = Arc::clone(&registry);
            let caller = caller.clone();
            async move {
                let target = args["target_agent"]
                    .as_str()
                    .ok_or("'target_agent' must be a string")?
                    .to_string();
                let message = args["message"]
                    .as_str()
                    .ok_or("'message' must be a string")?
                    .to_string();
                let wait = args["wait_for_reply"].as_bool().unwrap_or(false);

                if wait {
                    run_task(&registry, &caller, &target, message, SEND_WAIT_TIMEOUT)
                        .await
                        .map(Value::String)
                } else {
                    // Fire and forget: the dispatch runs out of band.
                    let caller = caller.clone();
                    tokio::spawn(async move {
                        if let Err(err) =
                            run_task(&registry, &caller, &target, message, SEND_WAIT_TIMEOUT).await
                        {
                            tracing::warn!(target = %target, "agent_send failed: {err}");
                        }
                    });
                    Ok(json!({ "status": "sent" }))
                }
            }
        }),
    )
    .with_source(ToolSource::Orchestration)
}

pub fn broadcast_tool(registry: Arc<OrchestratorRegistry>, caller: String) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "broadcast",
            "Send the same message to several agents concurrently and collect per-agent results.",
            json!({
                "type": "object",
                "properties": {
                    "agents": {"type": "array", "items": {"type": "string"}},
                    "message": {"type": "string"}
                },
                "required": ["agents", "message"]
            }),
        ),
        FnHandler::new(move |args| {
            let registry = Arc::clone(&registry);
            let caller = caller.clone();
            async move {
                let agents: Vec<String> = args["agents"]
                    .as_array()
                    .ok_or("'agents' must be an array")?
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                let message = args["message"].as_str().ok_or("'message' must be a string")?;

                let dispatches = agents.iter().map(|agent| {
                    let registry = Arc::clone(&registry);
                    let caller = caller.clone();
                    let agent = agent.clone();
                    let message = message.to_string();
                    async move {
                        let outcome =
                            run_task(&registry, &caller, &agent, message, SEND_WAIT_TIMEOUT).await;
                        match outcome {
                            Ok(response) => json!({
                                "agent": agent,
                                "status": "fulfilled",
                                "response": response,
                            }),
                            Err(error) => json!({
                                "agent": agent,
                                "status": "rejected",
                                "error": error,
                            }),
                        }
                    }
                });

                Ok(Value::Array(join_all(dispatches).await))
            }
        }),
    )
    .with_source(ToolSource::Orchestration)
}

pub fn pipeline_tool(registry: Arc<OrchestratorRegistry>, caller: String) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "pipeline",
            "Run agents in sequence, piping each stage's output into the next stage's input.",
            json!({
                "type": "object",
                "properties": {
                    "stages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "agent": {"type": "string"},
                                "task": {"type": "string"}
                            },
                            "required": ["agent"]
                        }
                    },
                    "input": {"type": "string"}
                },
                "required": ["stages"]
            }),
        ),
        FnHandler::new(move |args| {
            let registry = Arc::clone(&registry);
            let caller = caller.clone();
            async move {
                let stages = args["stages"].as_array().ok_or("'stages' must be an array")?.clone();
                let mut current = args["input"].as_str().unwrap_or_default().to_string();

                for (i, stage) in stages.iter().enumerate() {
                    let agent = stage["agent"].as_str().ok_or("each stage needs an 'agent'")?;
                    let text = match stage["task"].as_str() {
                        Some(task) if current.is_empty() => task.to_string(),
                        Some(task) => format!("{task}\n\nInput:\n{current}"),
                        None => current.clone(),
                    };
                    current = run_task(&registry, &caller, agent, text, SEND_WAIT_TIMEOUT)
                        .await
                        .map_err(|e| format!("stage {i} ({agent}): {e}"))?;
                }
                Ok(Value::String(current))
            }
        }),
    )
    .with_source(ToolSource::Orchestration)
}

pub fn supervisor_tool(registry: Arc<OrchestratorRegistry>, caller: String) -> ToolEntry {
    ToolEntry::builtin(
        ToolDefinition::new(
            "supervisor",
            "Hand a task to a supervisor agent that delegates among the named workers.",
            json!({
                "type": "object",
                "properties": {
                    "supervisor_agent": {"type": "string"},
                    "task": {"type": "string"},
                    "workers": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["supervisor_agent", "task"]
            }),
        ),
        FnHandler::new(move |args| {
            let registry = Arc::clone(&registry);
            let caller = caller.clone();
            async move {
                let supervisor = args["supervisor_agent"]
                    .as_str()
                    .ok_or("'supervisor_agent' must be a string")?;
                let task = args["task"].as_str().ok_or("'task' must be a string")?;
                let workers: Vec<&str> = args["workers"]
                    .as_array()
                    .map(|ws| ws.iter().filter_map(|v| v.as_str()).collect())
                    .unwrap_or_default();

                let mut text = delegated_text(&caller, task, None);
                if !workers.is_empty() {
                    text.push_str(&format!(
                        "\nYou may delegate to these workers via agent_spawn: {}",
                        workers.join(", ")
                    ));
                }
                run_task(&registry, &caller, supervisor, text, SPAWN_TIMEOUT)
                    .await
                    .map(Value::String)
            }
        }),
    )
    .with_source(ToolSource::Orchestration)
}

/// The full coordination set, ready for registration.
pub fn coordination_tools(
    registry: Arc<OrchestratorRegistry>,
    caller: impl Into<String>,
) -> Vec<ToolEntry> {
    let caller = caller.into();
    vec![
        agent_spawn_tool(Arc::clone(&registry), caller.clone()),
        agent_send_tool(Arc::clone(&registry), caller.clone()),
        broadcast_tool(Arc::clone(&registry), caller.clone()),
        pipeline_tool(Arc::clone(&registry), caller.clone()),
        supervisor_tool(registry, caller),
    ]
}
