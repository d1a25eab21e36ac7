//! OpenAI-compatible chat-completions provider.
//!
//! Speaks the streaming SSE protocol of any OpenAI-compatible server
//! (hosted or local). Wire deltas are translated into the unified chunk
//! model; tool-call deltas arrive keyed by array index with the ID only on
//! the first fragment, so a per-request index→ID table resolves every
//! fragment to a stable call ID before it leaves this module.

use std::collections::HashMap;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;

use super::provider::{ChunkStream, LlmProvider};
use super::types::{ChatMessage, CompletionRequest, FinishReason, Role, StreamChunk, Usage};
use crate::error::{Error, Result};

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    context_window: usize,
    name: String,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, context_window: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            context_window,
            name: "openai-compatible".to_string(),
        }
    }
}

// ─── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionDef,
}

#[derive(Serialize)]
struct WireFunctionDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            },
            content: m.content.clone(),
            tool_call_id: m.tool_call_id.clone(),
            tool_calls: (!m.tool_calls.is_empty()).then(|| {
                m.tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: "function",
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect()
            }),
        })
        .collect()
}

// ─── Delta translation ────────────────────────────────────────────────────────

/// Translates wire chunks to unified chunks, resolving tool-call indexes
/// to stable IDs and remembering the finish reason until `[DONE]`.
struct DeltaTranslator {
    id_by_index: HashMap<u32, String>,
    finish_reason: Option<FinishReason>,
}

impl DeltaTranslator {
    fn new() -> Self {
        Self {
            id_by_index: HashMap::new(),
            finish_reason: None,
        }
    }

    fn translate(&mut self, chunk: WireChunk) -> Vec<StreamChunk> {
        let mut out = Vec::new();
        if let Some(usage) = chunk.usage {
            out.push(StreamChunk::Usage(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            }));
        }
        for choice in chunk.choices {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                out.push(StreamChunk::TextDelta(text));
            }
            for delta in choice.delta.tool_calls.unwrap_or_default() {
                let id = match delta.id {
                    Some(id) => {
                        self.id_by_index.insert(delta.index, id.clone());
                        id
                    }
                    None => match self.id_by_index.get(&delta.index) {
                        Some(id) => id.clone(),
                        // Server never sent an ID for this index; fall
                        // back to a synthetic one so accumulation still
                        // groups correctly.
                        None => {
                            let id = format!("call_{}", delta.index);
                            self.id_by_index.insert(delta.index, id.clone());
                            id
                        }
                    },
                };
                let (name, arguments) = delta
                    .function
                    .map(|f| (f.name, f.arguments.unwrap_or_default()))
                    .unwrap_or((None, String::new()));
                out.push(StreamChunk::ToolCallDelta { id, name, arguments });
            }
            if let Some(reason) = choice.finish_reason {
                self.finish_reason = Some(FinishReason::from_wire(&reason));
            }
        }
        out
    }

    fn done(&self) -> StreamChunk {
        StreamChunk::Done {
            finish_reason: self.finish_reason.clone().unwrap_or(FinishReason::Stop),
        }
    }
}

// ─── Provider impl ────────────────────────────────────────────────────────────

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn stream(&self, request: CompletionRequest) -> Result<ChunkStream> {
        let body = WireRequest {
            model: request.model.clone(),
            messages: wire_messages(&request.messages),
            stream: true,
            stream_options: StreamOptions { include_usage: true },
            tools: (!request.tools.is_empty()).then(|| {
                request
                    .tools
                    .iter()
                    .map(|t| WireTool {
                        kind: "function",
                        function: WireFunctionDef {
                            name: t.name.clone(),
                            description: t.description.clone(),
                            parameters: t.parameters.clone(),
                        },
                    })
                    .collect()
            }),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }
        let response = http
            .send()
            .await
            .map_err(|e| Error::LlmProvider(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::LlmProvider(format!("{url} returned {status}: {detail}")));
        }

        let (tx, rx) = tokio::sync::mpsc::channel::<Result<StreamChunk>>(64);
        tokio::spawn(async move {
            let mut events = response.bytes_stream().eventsource();
            let mut translator = DeltaTranslator::new();
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.data == "[DONE]" => {
                        let _ = tx.send(Ok(translator.done())).await;
                        return;
                    }
                    Ok(event) => match serde_json::from_str::<WireChunk>(&event.data) {
                        Ok(chunk) => {
                            for unified in translator.translate(chunk) {
                                if tx.send(Ok(unified)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            let _ = tx
                                .send(Err(Error::LlmProvider(format!("bad stream chunk: {err}"))))
                                .await;
                            return;
                        }
                    },
                    Err(err) => {
                        let _ = tx
                            .send(Err(Error::LlmProvider(format!("stream error: {err}"))))
                            .await;
                        return;
                    }
                }
            }
            // Stream ended without [DONE]; close out with what we know.
            let _ = tx.send(Ok(translator.done())).await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn name(&self) -> &str {
        &self.name
    }
}
