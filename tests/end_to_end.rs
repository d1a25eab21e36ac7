//! Full-stack scenarios: WebSocket ingress → gateway → agent loop →
//! correlated replies, with a scripted LLM provider.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use agentos::agent::AgentStatus;
use agentos::config::{AppConfig, parse_with_env};
use agentos::error::Result;
use agentos::llm::provider::{ChunkStream, LlmProvider};
use agentos::llm::{CompletionRequest, FinishReason, LlmService, ModelProfile, StreamChunk};
use agentos::protocol::MessageEnvelope;
use agentos::runtime::Runtime;

// ─── Scripted provider ────────────────────────────────────────────────────────

struct Scripted {
    turns: Vec<Vec<StreamChunk>>,
    index: AtomicUsize,
}

impl Scripted {
    fn new(turns: Vec<Vec<StreamChunk>>) -> Arc<Self> {
        Arc::new(Self {
            turns,
            index: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.index.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for Scripted {
    async fn stream(&self, _request: CompletionRequest) -> Result<ChunkStream> {
        let i = self.index.fetch_add(1, Ordering::SeqCst);
        let chunks: Vec<Result<StreamChunk>> = self
            .turns
            .get(i)
            .cloned()
            .unwrap_or_else(|| vec![StreamChunk::Done { finish_reason: FinishReason::Stop }])
            .into_iter()
            .map(Ok)
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
    fn context_window(&self) -> usize {
        100_000
    }
    fn name(&self) -> &str {
        "scripted"
    }
}

fn text_turn(text: &str) -> Vec<StreamChunk> {
    vec![
        StreamChunk::TextDelta(text.into()),
        StreamChunk::Done { finish_reason: FinishReason::Stop },
    ]
}

fn tool_turn(name: &str, arguments: &str) -> Vec<StreamChunk> {
    vec![
        StreamChunk::ToolCallDelta {
            id: "call-1".into(),
            name: Some(name.into()),
            arguments: arguments.into(),
        },
        StreamChunk::Done { finish_reason: FinishReason::ToolCalls },
    ]
}

// ─── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    runtime: Arc<Runtime>,
    provider: Arc<Scripted>,
    _workspace: tempfile::TempDir,
    _sessions: tempfile::TempDir,
}

fn config(workspace: &std::path::Path, sessions: &std::path::Path, deny: &str) -> AppConfig {
    let doc = format!(
        r#"
[gateway]
host = "127.0.0.1"
port = 0

[[agents]]
id = "a"
system_prompt = "You are a test agent."
model = "default"
tools = {{ allow = ["*"], deny = [{deny}] }}

[[bindings]]
agentId = "a"
channel = "default"

[models.providers.scripted]
base_url = "http://localhost:9/v1"

[models.profiles.default]
provider = "scripted"
model = "scripted-model"

[auth]
allow_anonymous = true

[session]
dir = "{sessions}"

[tools]
workspace = "{workspace}"

[sandbox]

[plugins]
"#,
        deny = deny,
        sessions = sessions.display(),
        workspace = workspace.display(),
    );
    parse_with_env(&doc, Vec::<(String, String)>::new()).unwrap()
}

async fn harness(turns: Vec<Vec<StreamChunk>>, deny: &str) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let sessions = tempfile::tempdir().unwrap();
    let provider = Scripted::new(turns);

    let config = config(workspace.path(), sessions.path(), deny);
    let mut llm = LlmService::new();
    llm.register_provider("scripted", Arc::clone(&provider) as Arc<dyn LlmProvider>);
    llm.add_profile(
        "default",
        ModelProfile {
            provider: "scripted".into(),
            model: "scripted-model".into(),
            context_window: 0,
            reserve_tokens: 200,
            temperature: None,
            max_tokens: None,
        },
    );

    let runtime = Runtime::start_with_llm(config, llm).await.unwrap();
    Harness {
        runtime,
        provider,
        _workspace: workspace,
        _sessions: sessions,
    }
}

type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn connect(runtime: &Runtime) -> WsClient {
    let (client, _) = tokio_tungstenite::connect_async(runtime.ws_url())
        .await
        .expect("ws connect");
    client
}

/// Receive envelopes until (and including) a terminal one.
async fn receive_until_terminal(client: &mut WsClient) -> Vec<MessageEnvelope> {
    let mut envelopes = Vec::new();
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(10), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended early")
            .expect("ws error");
        if let Message::Text(text) = frame {
            let envelope: MessageEnvelope = serde_json::from_str(&text).expect("envelope frame");
            let terminal = envelope.is_terminal();
            envelopes.push(envelope);
            if terminal {
                return envelopes;
            }
        }
    }
}

fn responses(envelopes: &[MessageEnvelope]) -> Vec<&MessageEnvelope> {
    envelopes
        .iter()
        .filter(|e| e.kind == "task.response")
        .collect()
}

// ─── S1: simple round trip ────────────────────────────────────────────────────

#[tokio::test]
async fn simple_round_trip() {
    let h = harness(vec![text_turn("Hi")], "").await;
    let mut client = connect(&h.runtime).await;

    client
        .send(Message::Text(
            r#"{"type":"task.request","target":"agent://a","data":{"text":"Hello!"},"correlationId":"c1"}"#
                .to_string(),
        ))
        .await
        .unwrap();

    let envelopes = receive_until_terminal(&mut client).await;
    let replies = responses(&envelopes);
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].correlation_id.as_deref(), Some("c1"));
    assert_eq!(replies[0].data["text"], "Hi");
    assert_eq!(envelopes.last().unwrap().kind, "task.done");

    h.runtime.shutdown().await;
}

// ─── S2: tool call ────────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_call_round_trip() {
    let h = harness(
        vec![
            tool_turn("read_file", r#"{"path":"hello.txt"}"#),
            text_turn("The file contains: test file content"),
        ],
        "",
    )
    .await;
    std::fs::write(h._workspace.path().join("hello.txt"), "test file content").unwrap();

    let mut client = connect(&h.runtime).await;
    client
        .send(Message::Text(
            r#"{"type":"task.request","target":"agent://a","data":{"text":"What is in hello.txt?"},"correlationId":"c2"}"#
                .to_string(),
        ))
        .await
        .unwrap();

    let envelopes = receive_until_terminal(&mut client).await;
    let replies = responses(&envelopes);
    assert_eq!(replies.len(), 2, "tool-calling turn, then the final text");
    assert!(replies[0].data["toolCalls"].is_array());
    assert_eq!(replies[1].data["text"], "The file contains: test file content");
    assert_eq!(envelopes.last().unwrap().kind, "task.done");
    assert_eq!(h.provider.calls(), 2, "the model was invoked twice");

    // The tool result itself streamed as a richer event.
    let tool_results: Vec<_> = envelopes.iter().filter(|e| e.kind == "tool.result").collect();
    assert_eq!(tool_results.len(), 1);
    assert_eq!(tool_results[0].data["result"], "test file content");

    h.runtime.shutdown().await;
}

// ─── S3: policy denial ────────────────────────────────────────────────────────

#[tokio::test]
async fn policy_denied_tool_never_executes() {
    let marker = "must-not-exist.txt";
    let h = harness(
        vec![
            tool_turn("bash", &format!(r#"{{"command":"touch {marker}"}}"#)),
            text_turn("I'm sorry, I can't run shell commands here."),
        ],
        r#""bash""#,
    )
    .await;

    let mut client = connect(&h.runtime).await;
    client
        .send(Message::Text(
            r#"{"type":"task.request","target":"agent://a","data":{"text":"touch a file"},"correlationId":"c3"}"#
                .to_string(),
        ))
        .await
        .unwrap();

    let envelopes = receive_until_terminal(&mut client).await;
    let tool_results: Vec<_> = envelopes.iter().filter(|e| e.kind == "tool.result").collect();
    assert_eq!(tool_results.len(), 1);
    assert_eq!(tool_results[0].data["success"], false);
    assert!(
        tool_results[0].data["result"].as_str().unwrap().contains("blocked"),
        "denial reads as blocked"
    );

    let replies = responses(&envelopes);
    assert_eq!(
        replies.last().unwrap().data["text"],
        "I'm sorry, I can't run shell commands here."
    );
    assert_eq!(envelopes.last().unwrap().kind, "task.done");
    assert!(
        !h._workspace.path().join(marker).exists(),
        "no shell execution happened"
    );

    h.runtime.shutdown().await;
}

// ─── S5: graceful shutdown ────────────────────────────────────────────────────

#[tokio::test]
async fn graceful_shutdown_terminates_agents_and_closes_sessions() {
    let h = harness(vec![text_turn("Hi")], "").await;
    assert_eq!(h.runtime.manager.status("a").unwrap(), AgentStatus::Ready);

    let mut client = connect(&h.runtime).await;
    // Let the server register the session before shutting down.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.runtime.ws_sessions.len(), 1);

    h.runtime.shutdown().await;

    assert_eq!(h.runtime.manager.status("a").unwrap(), AgentStatus::Terminated);
    assert!(h.runtime.ws_sessions.is_empty());

    // The client observes a close frame with code 1001 (going away).
    let mut saw_close = false;
    while let Ok(Some(Ok(frame))) =
        tokio::time::timeout(Duration::from_secs(5), client.next()).await
    {
        if let Message::Close(Some(frame)) = frame {
            assert_eq!(u16::from(frame.code), 1001);
            saw_close = true;
            break;
        }
    }
    assert!(saw_close, "client should see the 1001 close frame");
}

// ─── Duplicate injection (idempotency, property 7) ───────────────────────────

#[tokio::test]
async fn duplicate_envelope_dispatches_once() {
    let h = harness(vec![text_turn("first"), text_turn("second")], "").await;
    let mut client = connect(&h.runtime).await;

    let frame = r#"{"id":"fixed-id","type":"task.request","target":"agent://a","data":{"text":"hi"},"correlationId":"c7"}"#;
    client.send(Message::Text(frame.to_string())).await.unwrap();
    let envelopes = receive_until_terminal(&mut client).await;
    assert_eq!(responses(&envelopes).len(), 1);

    // Same envelope id again: silently accepted, no second dispatch.
    client.send(Message::Text(frame.to_string())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(h.provider.calls(), 1, "exactly one downstream dispatch");

    h.runtime.shutdown().await;
}

// ─── Invalid frame handling ───────────────────────────────────────────────────

#[tokio::test]
async fn invalid_frame_gets_single_error_reply() {
    let h = harness(vec![], "").await;
    let mut client = connect(&h.runtime).await;

    client
        .send(Message::Text("this is not an envelope".to_string()))
        .await
        .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match frame {
        Message::Text(text) => assert_eq!(text, r#"{"error":"Invalid message format"}"#),
        other => panic!("unexpected frame: {other:?}"),
    }

    h.runtime.shutdown().await;
}
