//! GenaiAdapter - one LLM backend served through the genai crate
//!
//! Gemini, Ollama, OpenAI and Anthropic share this adapter; each instance is
//! bound to one backend by a forced adapter kind.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use genai::chat::{ChatOptions as GenaiOptions, ChatRequest, ChatStreamEvent, ToolCall as GenaiToolCall};
use genai::Client;
use parking_lot::RwLock;

use super::error::{ProviderError, ProviderResult};
use super::genai_adapter::{
    adapter_kind_for, build_request, create_client, from_genai_tool_call, to_genai_options,
    to_genai_tool_response,
};
use super::schema::SchemaDialect;
use super::traits::{GenerationOptions, ProviderAdapter, ProviderStream, ToolInvoker};
use crate::logging::Logger;
use crate::types::{CancellationToken, ChatMessage, ProviderKind, ToolDescriptor};

/// Construction data for one model; never holds conversation state
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub model: String,
    pub options: GenaiOptions,
}

/// Provider adapter backed by a genai `Client`
pub struct GenaiAdapter {
    kind: ProviderKind,
    client: Client,
    options: GenerationOptions,
    base_url: Option<String>,
    handles: RwLock<HashMap<String, Arc<ModelHandle>>>,
    logger: Arc<dyn Logger>,
}

impl GenaiAdapter {
    /// Create an adapter for `kind`
    ///
    /// Keyed backends require `api_key`; `base_url` overrides the default endpoint.
    pub fn new(
        kind: ProviderKind,
        api_key: Option<String>,
        base_url: Option<String>,
        options: GenerationOptions,
        logger: Arc<dyn Logger>,
    ) -> ProviderResult<Self> {
        let adapter_kind =
            adapter_kind_for(kind).ok_or_else(|| ProviderError::UnsupportedProvider(kind.to_string()))?;

        if kind.requires_api_key() && api_key.as_deref().map_or(true, str::is_empty) {
            return Err(ProviderError::missing_api_key(kind.as_str()));
        }

        Ok(Self {
            kind,
            client: create_client(adapter_kind, api_key, base_url.clone()),
            options,
            base_url,
            handles: RwLock::new(HashMap::new()),
            logger,
        })
    }

    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    /// Cached handle for `model`, created on first use
    pub fn model_handle(&self, model: &str) -> Arc<ModelHandle> {
        if let Some(handle) = self.handles.read().get(model) {
            return handle.clone();
        }

        let mut handles = self.handles.write();
        handles
            .entry(model.to_string())
            .or_insert_with(|| {
                self.logger.debug(&format!(
                    "[GenaiAdapter] Creating {} model handle: {}",
                    self.kind, model
                ));
                Arc::new(ModelHandle {
                    model: model.to_string(),
                    options: to_genai_options(&self.options),
                })
            })
            .clone()
    }

    /// Number of cached model handles
    pub fn cached_models(&self) -> usize {
        self.handles.read().len()
    }
}

/// Where the tool loop is
struct ToolLoop {
    provider: ProviderKind,
    client: Client,
    handle: Arc<ModelHandle>,
    request: ChatRequest,
    events: Option<BoxStream<'static, Result<ChatStreamEvent, genai::Error>>>,
    rounds: usize,
    max_rounds: usize,
    invoker: Arc<dyn ToolInvoker>,
    cancel: CancellationToken,
    logger: Arc<dyn Logger>,
    done: bool,
}

impl ToolLoop {
    fn fail(mut self, error: ProviderError) -> Option<(ProviderResult<String>, Self)> {
        self.done = true;
        self.events = None;
        Some((Err(error), self))
    }

    fn backend_error(&self, error: impl std::fmt::Display) -> ProviderError {
        let message = error.to_string();
        self.logger
            .error(&format!("[GenaiAdapter] {} error: {}", self.provider, message));
        ProviderError::from_backend_message(self.provider.as_str(), message)
    }

    /// Run the model's tool calls and extend the request with calls and results
    async fn run_tools(&mut self, calls: Vec<GenaiToolCall>) -> ProviderResult<()> {
        let mut responses = Vec::with_capacity(calls.len());
        for call in &calls {
            let call = from_genai_tool_call(call);
            self.logger
                .info(&format!("[GenaiAdapter] Model requested tool: {}", call.name));

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ProviderError::Cancelled),
                result = self.invoker.execute_tool_call(&call) => result,
            };
            responses.push(to_genai_tool_response(result));
        }

        let mut request = self.request.clone().append_message(calls);
        for response in responses {
            request = request.append_message(response);
        }
        self.request = request;
        Ok(())
    }
}

async fn next_text(mut state: ToolLoop) -> Option<(ProviderResult<String>, ToolLoop)> {
    loop {
        if state.done {
            return None;
        }

        if state.events.is_none() {
            let handle = state.handle.clone();
            let started = tokio::select! {
                _ = state.cancel.cancelled() => return state.fail(ProviderError::Cancelled),
                started = state.client.exec_chat_stream(
                    handle.model.as_str(),
                    state.request.clone(),
                    Some(&handle.options),
                ) => started,
            };

            match started {
                Ok(response) => state.events = Some(response.stream.boxed()),
                Err(e) => {
                    let error = state.backend_error(e);
                    return state.fail(error);
                }
            }
        }

        let event = {
            let Some(events) = state.events.as_mut() else {
                continue;
            };
            tokio::select! {
                _ = state.cancel.cancelled() => None,
                event = events.next() => Some(event),
            }
        };

        let event = match event {
            None => return state.fail(ProviderError::Cancelled),
            Some(None) => {
                // Backend closed the stream without an End event
                state.done = true;
                return None;
            }
            Some(Some(Err(e))) => {
                let error = state.backend_error(e);
                return state.fail(error);
            }
            Some(Some(Ok(event))) => event,
        };

        match event {
            ChatStreamEvent::Chunk(chunk) if !chunk.content.is_empty() => {
                return Some((Ok(chunk.content), state));
            }
            ChatStreamEvent::End(end) => {
                let calls: Vec<GenaiToolCall> = end
                    .captured_tool_calls()
                    .map(|calls| calls.iter().map(|tc| (*tc).clone()).collect())
                    .unwrap_or_default();

                if calls.is_empty() {
                    state.done = true;
                    return None;
                }

                state.rounds += 1;
                if state.rounds > state.max_rounds {
                    state.logger.warn(&format!(
                        "[GenaiAdapter] Tool loop exceeded {} rounds",
                        state.max_rounds
                    ));
                    let max_rounds = state.max_rounds;
                    return state.fail(ProviderError::ToolLoopExceeded { max_rounds });
                }

                state.events = None;
                if let Err(e) = state.run_tools(calls).await {
                    return state.fail(e);
                }
            }
            _ => {}
        }
    }
}

#[async_trait]
impl ProviderAdapter for GenaiAdapter {
    fn id(&self) -> ProviderKind {
        self.kind
    }

    async fn generate_stream(
        &self,
        conversation: Vec<ChatMessage>,
        model: &str,
        tools: Option<Vec<ToolDescriptor>>,
        invoker: Arc<dyn ToolInvoker>,
        cancel: CancellationToken,
    ) -> ProviderResult<ProviderStream> {
        self.logger.info(&format!(
            "[GenaiAdapter] generate_stream: provider={}, model={}, tools={}",
            self.kind,
            model,
            tools.as_ref().map_or(0, Vec::len)
        ));

        let handle = self.model_handle(model);
        let request = build_request(
            conversation,
            tools.as_deref(),
            SchemaDialect::for_provider(self.kind),
        );

        let state = ToolLoop {
            provider: self.kind,
            client: self.client.clone(),
            handle,
            request,
            events: None,
            rounds: 0,
            max_rounds: self.options.max_tool_rounds,
            invoker,
            cancel,
            logger: self.logger.clone(),
            done: false,
        };

        Ok(Box::pin(stream::unfold(state, next_text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NoOpLogger;

    fn logger() -> Arc<dyn Logger> {
        Arc::new(NoOpLogger::new())
    }

    #[test]
    fn test_keyed_backend_requires_key() {
        let err = GenaiAdapter::new(
            ProviderKind::Gemini,
            None,
            None,
            GenerationOptions::default(),
            logger(),
        )
        .err()
        .unwrap();
        assert_eq!(err, ProviderError::missing_api_key("gemini"));

        assert!(GenaiAdapter::new(
            ProviderKind::Anthropic,
            Some(String::new()),
            None,
            GenerationOptions::default(),
            logger(),
        )
        .is_err());
    }

    #[test]
    fn test_mock_is_not_a_genai_backend() {
        let err = GenaiAdapter::new(
            ProviderKind::Mock,
            None,
            None,
            GenerationOptions::default(),
            logger(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, ProviderError::UnsupportedProvider(_)));
    }

    #[test]
    fn test_model_handles_are_cached() {
        let adapter = GenaiAdapter::new(
            ProviderKind::Ollama,
            None,
            Some("http://localhost:11434".to_string()),
            GenerationOptions::default(),
            logger(),
        )
        .unwrap();

        assert_eq!(adapter.id(), ProviderKind::Ollama);
        assert_eq!(adapter.base_url(), Some("http://localhost:11434"));

        let a = adapter.model_handle("llama3.2:3b");
        let b = adapter.model_handle("llama3.2:3b");
        let c = adapter.model_handle("qwen2.5:3b");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(adapter.cached_models(), 2);
        assert_eq!(c.model, "qwen2.5:3b");
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_single_error() {
        // Nothing listens on port 9 (discard) locally
        let adapter = GenaiAdapter::new(
            ProviderKind::Ollama,
            None,
            Some("http://127.0.0.1:9".to_string()),
            GenerationOptions::default(),
            logger(),
        )
        .unwrap();

        let invoker: Arc<dyn ToolInvoker> = Arc::new(crate::tools::ToolRegistry::new(
            Default::default(),
            logger(),
        ));
        let items: Vec<_> = adapter
            .generate_stream(
                vec![ChatMessage::user("hi")],
                "llama3.2",
                None,
                invoker,
                CancellationToken::new(),
            )
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }

    /// Scripted OpenAI-compatible endpoint over plain TCP
    ///
    /// Each request gets the next scripted SSE body; the last one repeats.
    mod fake_openai {
        use std::sync::Arc;

        use parking_lot::Mutex;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        pub struct FakeOpenAi {
            pub base_url: String,
            bodies: Arc<Mutex<Vec<String>>>,
            task: tokio::task::JoinHandle<()>,
        }

        impl FakeOpenAi {
            pub async fn start(script: Vec<String>) -> Self {
                let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
                let port = listener.local_addr().unwrap().port();
                let bodies = Arc::new(Mutex::new(Vec::new()));

                let task = tokio::spawn({
                    let bodies = bodies.clone();
                    async move {
                        loop {
                            let Ok((socket, _)) = listener.accept().await else {
                                return;
                            };
                            let index = {
                                let mut bodies = bodies.lock();
                                bodies.push(String::new());
                                bodies.len() - 1
                            };
                            let reply = script[index.min(script.len() - 1)].clone();
                            tokio::spawn(serve(socket, reply, bodies.clone(), index));
                        }
                    }
                });

                Self {
                    base_url: format!("http://127.0.0.1:{}/v1", port),
                    bodies,
                    task,
                }
            }

            /// Request bodies received so far
            pub fn bodies(&self) -> Vec<String> {
                self.bodies.lock().clone()
            }
        }

        impl Drop for FakeOpenAi {
            fn drop(&mut self) {
                self.task.abort();
            }
        }

        async fn serve(
            mut socket: TcpStream,
            reply: String,
            bodies: Arc<Mutex<Vec<String>>>,
            index: usize,
        ) {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let body = loop {
                let Ok(n) = socket.read(&mut chunk).await else {
                    return;
                };
                if n == 0 {
                    return;
                }
                buf.extend_from_slice(&chunk[..n]);

                let text = String::from_utf8_lossy(&buf).to_string();
                let Some(header_end) = text.find("\r\n\r\n") else {
                    continue;
                };
                let length = text[..header_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let body_start = header_end + 4;
                if buf.len() >= body_start + length {
                    break String::from_utf8_lossy(&buf[body_start..body_start + length]).to_string();
                }
            };
            bodies.lock()[index] = body;

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n{}",
                reply
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }

        /// SSE body from `data:` payloads, terminated by `[DONE]`
        pub fn sse(events: &[&str]) -> String {
            events
                .iter()
                .chain(std::iter::once(&"[DONE]"))
                .map(|event| format!("data: {}\n\n", event))
                .collect()
        }

        pub fn tool_call_reply(id: &str, name: &str, arguments: &str) -> String {
            let call = serde_json::json!({
                "choices": [{
                    "index": 0,
                    "delta": {
                        "tool_calls": [{
                            "index": 0,
                            "id": id,
                            "type": "function",
                            "function": { "name": name, "arguments": arguments }
                        }]
                    }
                }]
            })
            .to_string();
            let finish = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}]}"#;
            sse(&[call.as_str(), finish])
        }

        pub fn text_reply(parts: &[&str]) -> String {
            let mut events: Vec<String> = parts
                .iter()
                .map(|part| {
                    serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": part } }] })
                        .to_string()
                })
                .collect();
            events.push(r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#.to_string());
            let events: Vec<&str> = events.iter().map(String::as_str).collect();
            sse(&events)
        }
    }

    /// Answers every call with a fixed text and records it
    struct RecordingInvoker {
        reply: String,
        calls: parking_lot::Mutex<Vec<crate::types::ToolCall>>,
    }

    impl RecordingInvoker {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ToolInvoker for RecordingInvoker {
        async fn execute_tool_call(&self, call: &crate::types::ToolCall) -> crate::types::ToolResult {
            self.calls.lock().push(call.clone());
            crate::types::ToolResult::success(call.id.clone(), self.reply.clone())
        }
    }

    fn openai_adapter(base_url: &str, max_tool_rounds: usize) -> GenaiAdapter {
        GenaiAdapter::new(
            ProviderKind::OpenAI,
            Some("test-key".to_string()),
            Some(base_url.to_string()),
            GenerationOptions::default().with_max_tool_rounds(max_tool_rounds),
            logger(),
        )
        .unwrap()
    }

    fn list_files_tool() -> Vec<ToolDescriptor> {
        vec![ToolDescriptor::new("list_files", "List files", "files")]
    }

    #[tokio::test]
    async fn test_tool_round_trip_feeds_result_back() {
        let server = fake_openai::FakeOpenAi::start(vec![
            fake_openai::tool_call_reply("call_1", "list_files", r#"{"path":"/data"}"#),
            fake_openai::text_reply(&["Files: ", "a.txt"]),
        ])
        .await;
        let adapter = openai_adapter(&server.base_url, 2);
        let invoker = RecordingInvoker::new("a.txt");

        let items: Vec<_> = adapter
            .generate_stream(
                vec![ChatMessage::user("what is in /data?")],
                "gpt-4o-mini",
                Some(list_files_tool()),
                invoker.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items, vec![Ok("Files: ".to_string()), Ok("a.txt".to_string())]);

        let calls = invoker.calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].name, "list_files");
        assert_eq!(calls[0].input, serde_json::json!({ "path": "/data" }));

        let bodies = server.bodies();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("list_files"));
        assert!(!bodies[0].contains("tool_call_id"));
        // Second request carries the call and its result
        assert!(bodies[1].contains("tool_call_id"));
        assert!(bodies[1].contains("call_1"));
        assert!(bodies[1].contains("a.txt"));
    }

    #[tokio::test]
    async fn test_endless_tool_calls_hit_round_limit() {
        let server = fake_openai::FakeOpenAi::start(vec![fake_openai::tool_call_reply(
            "call_again",
            "list_files",
            "{}",
        )])
        .await;
        let adapter = openai_adapter(&server.base_url, 2);
        let invoker = RecordingInvoker::new("a.txt");

        let items: Vec<_> = adapter
            .generate_stream(
                vec![ChatMessage::user("loop forever")],
                "gpt-4o-mini",
                Some(list_files_tool()),
                invoker.clone(),
                CancellationToken::new(),
            )
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items, vec![Err(ProviderError::ToolLoopExceeded { max_rounds: 2 })]);
        assert_eq!(invoker.calls.lock().len(), 2);
        assert_eq!(server.bodies().len(), 3);
    }
}
