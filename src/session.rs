//! Stream orchestration: the decode/parse loop and the tool-calling rounds around it.

use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpRequest, HttpStreamResponse, retry_after};
use crate::provider::ChatStream;
use crate::stream::{FrameFormat, StreamDecoder, WireFrame, collect_stream_text};
use crate::tools::{RejectedCall, Toolset, ToolCallAssembler, execute_batch};
use crate::types::{ChatEvent, ChatOutcome, Delta, FinalMessage, ToolCall, ToolResult};

/// Rounds allowed when the configuration does not set `max_tool_rounds`.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Vendor-specific half of a streaming session.
///
/// The session owns the loop; a dialect only knows how to address its vendor, read one
/// frame and extend its payload with a finished tool round.
pub trait StreamDialect: Send + Sync + 'static {
    /// Outbound request body; mutated between rounds.
    type Payload: Serialize + Send + 'static;

    fn name(&self) -> &'static str;

    fn frame_format(&self) -> FrameFormat;

    /// Builds the streaming HTTP request for the current payload.
    fn build_request(&self, payload: &Self::Payload) -> Result<HttpRequest, LLMError>;

    /// Converts one frame into a delta. Unparseable frames yield an empty delta.
    fn parse_frame(&self, frame: &str, assembler: &mut ToolCallAssembler) -> Delta;

    /// Appends the assistant tool-call turn and its results to the payload.
    fn append_tool_round(
        &self,
        payload: &mut Self::Payload,
        calls: &[ToolCall],
        results: &[ToolResult],
    );

    /// Maps a non-2xx response to an error.
    fn parse_error(&self, status: u16, body: &str, retry_after: Option<Duration>) -> LLMError;
}

/// Everything a session needs, resolved by the provider before streaming starts.
pub struct SessionPlan<D: StreamDialect> {
    pub dialect: Arc<D>,
    pub transport: DynHttpTransport,
    pub payload: D::Payload,
    /// Deadline for opening the stream of each round.
    pub connect_timeout: Duration,
    pub toolset: Toolset,
    pub max_tool_rounds: usize,
    pub cancel: CancellationToken,
}

/// Per-chat mutable state, owned by the single task driving the stream.
#[derive(Debug)]
pub struct StreamSession {
    reasoning: String,
    content: String,
    assembler: ToolCallAssembler,
    round: usize,
    cancel: CancellationToken,
}

enum Connect {
    Cancelled,
    TimedOut,
    Done(Result<HttpStreamResponse, LLMError>),
}

enum Next {
    Cancelled,
    Frame(Option<Result<WireFrame, LLMError>>),
}

enum RoundEnd {
    Drained,
    Cancelled,
    Failed(LLMError),
}

impl StreamSession {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            reasoning: String::new(),
            content: String::new(),
            assembler: ToolCallAssembler::new(),
            round: 0,
            cancel,
        }
    }

    pub fn reasoning(&self) -> &str {
        &self.reasoning
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn begin_round(&mut self) {
        self.round += 1;
        self.assembler.reset(self.round);
    }

    fn absorb(&mut self, delta: &Delta) {
        if let Some(reasoning) = &delta.reasoning {
            self.reasoning.push_str(reasoning);
        }
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }
    }

    fn finish(&self) -> FinalMessage {
        FinalMessage {
            content: self.content.clone(),
            reasoning: self.reasoning.clone(),
            rounds: self.round,
        }
    }

    /// Drives a whole chat: every round, tool execution in between, one terminal event.
    ///
    /// Cancellation is observed while connecting, while waiting for each chunk and while
    /// tools run. Once it fires nothing but `Finished(Cancelled)` is yielded and the
    /// response body is dropped, which releases the connection.
    pub fn drive<D: StreamDialect>(plan: SessionPlan<D>) -> ChatStream {
        let SessionPlan {
            dialect,
            transport,
            mut payload,
            connect_timeout,
            toolset,
            max_tool_rounds,
            cancel,
        } = plan;
        let provider = dialect.name();

        Box::pin(stream! {
            let mut session = StreamSession::new(cancel.clone());

            let outcome = loop {
                session.begin_round();
                let round = session.round;

                let request = match dialect.build_request(&payload) {
                    Ok(request) => request,
                    Err(err) => break ChatOutcome::Errored(err),
                };
                debug!(provider, round, url = %request.url, "opening stream");

                let connect = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Connect::Cancelled,
                    result = tokio::time::timeout(connect_timeout, transport.send_stream(request)) => {
                        match result {
                            Ok(response) => Connect::Done(response),
                            Err(_) => Connect::TimedOut,
                        }
                    }
                };
                let response = match connect {
                    Connect::Cancelled => break ChatOutcome::Cancelled,
                    Connect::TimedOut => {
                        break ChatOutcome::Errored(LLMError::Timeout { after: connect_timeout });
                    }
                    Connect::Done(Err(err)) => break ChatOutcome::Errored(err),
                    Connect::Done(Ok(response)) => response,
                };

                if !response.is_success() {
                    let status = response.status;
                    let retry_after = retry_after(&response.headers);
                    let body = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        body = collect_stream_text(response.body, provider) => Some(body),
                    };
                    break match body {
                        None => ChatOutcome::Cancelled,
                        Some(Err(err)) => ChatOutcome::Errored(err),
                        Some(Ok(body)) => {
                            ChatOutcome::Errored(dialect.parse_error(status, &body, retry_after))
                        }
                    };
                }

                let mut decoder =
                    StreamDecoder::new(response.body, dialect.frame_format(), provider);
                let round_end = loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Next::Cancelled,
                        frame = decoder.next() => Next::Frame(frame),
                    };
                    match next {
                        Next::Cancelled => break RoundEnd::Cancelled,
                        Next::Frame(None) | Next::Frame(Some(Ok(WireFrame::Done))) => {
                            break RoundEnd::Drained;
                        }
                        Next::Frame(Some(Err(err))) => break RoundEnd::Failed(err),
                        Next::Frame(Some(Ok(WireFrame::Data(frame)))) => {
                            let delta = dialect.parse_frame(&frame, &mut session.assembler).normalized();
                            if delta.is_empty() {
                                continue;
                            }
                            session.absorb(&delta);
                            if session.is_cancelled() {
                                break RoundEnd::Cancelled;
                            }
                            yield ChatEvent::Delta(delta);
                        }
                    }
                };
                drop(decoder);

                match round_end {
                    RoundEnd::Drained => {}
                    RoundEnd::Cancelled => break ChatOutcome::Cancelled,
                    RoundEnd::Failed(err) => break ChatOutcome::Errored(err),
                }

                let batch = session.assembler.close();
                if batch.is_empty() {
                    break ChatOutcome::Completed(session.finish());
                }
                let requested = batch.calls.len() + batch.rejected.len();
                let Some(executor) = toolset.executor.clone() else {
                    warn!(provider, round, calls = requested, "model requested tools but no executor is configured");
                    break ChatOutcome::Completed(session.finish());
                };
                if round >= max_tool_rounds {
                    warn!(provider, round, max_tool_rounds, "tool round limit reached");
                    break ChatOutcome::Completed(session.finish());
                }

                // Rejected calls are answered with their assembly error instead of running.
                let runnable = batch.calls;
                let (failed_calls, failed_results): (Vec<ToolCall>, Vec<ToolResult>) = batch
                    .rejected
                    .into_iter()
                    .map(RejectedCall::into_failed_call)
                    .unzip();
                let mut calls = runnable.clone();
                calls.extend(failed_calls);
                if session.is_cancelled() {
                    break ChatOutcome::Cancelled;
                }
                yield ChatEvent::ToolCalls { round, calls: calls.clone() };

                let results = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    results = execute_batch(executor.as_ref(), &runnable) => Some(results),
                };
                let Some(mut results) = results else {
                    break ChatOutcome::Cancelled;
                };
                results.extend(failed_results);
                if session.is_cancelled() {
                    break ChatOutcome::Cancelled;
                }
                yield ChatEvent::ToolResults { round, results: results.clone() };

                dialect.append_tool_round(&mut payload, &calls, &results);
            };

            match &outcome {
                ChatOutcome::Completed(message) => info!(
                    provider,
                    rounds = message.rounds,
                    content_len = message.content.len(),
                    reasoning_len = message.reasoning.len(),
                    "chat session completed"
                ),
                ChatOutcome::Errored(err) => warn!(provider, error = %err, "chat session failed"),
                ChatOutcome::Cancelled => info!(provider, round = session.round, "chat session cancelled"),
            }
            yield ChatEvent::Finished(outcome);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures_util::stream;
    use serde_json::{Value, json};

    use super::*;
    use crate::http::{HttpResponse, HttpTransport};
    use crate::tools::ToolExecutor;
    use crate::types::ToolCallFragment;

    /// Dialect reading `{"r": .., "c": .., "tool": {..}}` frames.
    struct TinyDialect;

    impl StreamDialect for TinyDialect {
        type Payload = Value;

        fn name(&self) -> &'static str {
            "tiny"
        }

        fn frame_format(&self) -> FrameFormat {
            FrameFormat::ServerSentEvents
        }

        fn build_request(&self, payload: &Value) -> Result<HttpRequest, LLMError> {
            crate::http::json_request("http://tiny/chat", HashMap::new(), payload)
        }

        fn parse_frame(&self, frame: &str, assembler: &mut ToolCallAssembler) -> Delta {
            let Ok(json) = serde_json::from_str::<Value>(frame) else {
                return Delta::default();
            };
            if let Some(tool) = json.get("tool") {
                let fragment = ToolCallFragment {
                    index: None,
                    id: tool["id"].as_str().map(str::to_string),
                    name: tool["name"].as_str().map(str::to_string),
                    arguments: tool["args"].as_str().map(str::to_string),
                };
                assembler.push(fragment.clone());
            }
            Delta {
                reasoning: json["r"].as_str().map(str::to_string),
                content: json["c"].as_str().map(str::to_string),
                tool_call_fragments: Vec::new(),
            }
        }

        fn append_tool_round(&self, payload: &mut Value, calls: &[ToolCall], results: &[ToolResult]) {
            let Some(messages) = payload["messages"].as_array_mut() else {
                return;
            };
            messages.push(json!({"calls": calls.len()}));
            for result in results {
                messages.push(json!({"result": result.content}));
            }
        }

        fn parse_error(&self, status: u16, body: &str, _retry_after: Option<Duration>) -> LLMError {
            LLMError::provider("tiny", format!("{status}: {body}"))
        }
    }

    struct ScriptedTransport {
        bodies: Mutex<Vec<(u16, Vec<&'static str>)>>,
        requests: Mutex<Vec<Value>>,
    }

    impl ScriptedTransport {
        fn new(bodies: Vec<(u16, Vec<&'static str>)>) -> Arc<Self> {
            Arc::new(Self {
                bodies: Mutex::new(bodies),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            panic!("single-shot send is not used by sessions");
        }

        async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            self.requests
                .lock()
                .unwrap()
                .push(request.json_body().expect("json body"));
            let (status, chunks) = self.bodies.lock().unwrap().remove(0);
            let chunks: Vec<Result<Vec<u8>, LLMError>> = chunks
                .into_iter()
                .map(|chunk| Ok(chunk.as_bytes().to_vec()))
                .collect();
            Ok(HttpStreamResponse {
                status,
                headers: HashMap::new(),
                body: Box::pin(stream::iter(chunks)),
            })
        }
    }

    /// Accepts the request and never answers.
    struct Stalled;

    #[async_trait]
    impl HttpTransport for Stalled {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, LLMError> {
            std::future::pending().await
        }

        async fn send_stream(&self, _request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
            std::future::pending().await
        }
    }

    struct Echo;

    #[async_trait]
    impl ToolExecutor for Echo {
        async fn execute(&self, name: &str, arguments: &str) -> Result<String, LLMError> {
            Ok(format!("{name}:{arguments}"))
        }
    }

    fn plan(transport: DynHttpTransport, toolset: Toolset) -> SessionPlan<TinyDialect> {
        SessionPlan {
            dialect: Arc::new(TinyDialect),
            transport,
            payload: json!({"messages": []}),
            connect_timeout: Duration::from_secs(5),
            toolset,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            cancel: CancellationToken::new(),
        }
    }

    async fn collect(stream: ChatStream) -> Vec<ChatEvent> {
        stream.collect().await
    }

    #[tokio::test]
    async fn single_round_keeps_reasoning_apart_from_answer() {
        let transport = ScriptedTransport::new(vec![(
            200,
            vec![
                "data: {\"r\":\"think \"}\n\n",
                "data: not json\n\n",
                "data: {\"c\":\"Hel\"}\n\ndata: {\"c\":\"lo\"}\n\n",
                "data: [DONE]\n\n",
            ],
        )]);
        let events = collect(StreamSession::drive(plan(transport, Toolset::none()))).await;

        assert_eq!(events.len(), 4);
        match events.last() {
            Some(ChatEvent::Finished(ChatOutcome::Completed(message))) => {
                assert_eq!(message.content, "Hello");
                assert_eq!(message.reasoning, "think ");
                assert_eq!(message.rounds, 1);
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tool_round_reinjects_results_and_issues_second_request() {
        let transport = ScriptedTransport::new(vec![
            (
                200,
                vec![
                    "data: {\"tool\":{\"id\":\"abc\",\"name\":\"calc\",\"args\":\"\"}}\n\n",
                    "data: {\"tool\":{\"args\":\"{\\\"x\\\":\"}}\n\n",
                    "data: {\"tool\":{\"args\":\"1}\"}}\n\n",
                    "data: [DONE]\n\n",
                ],
            ),
            (200, vec!["data: {\"c\":\"done\"}\n\n", "data: [DONE]\n\n"]),
        ]);
        let toolset = Toolset::new(Vec::new(), Arc::new(Echo));
        let events = collect(StreamSession::drive(plan(transport.clone(), toolset))).await;

        let calls = events
            .iter()
            .find_map(|event| match event {
                ChatEvent::ToolCalls { calls, .. } => Some(calls.clone()),
                _ => None,
            })
            .expect("tool calls event");
        assert_eq!(calls[0].arguments, "{\"x\":1}");

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1]["messages"][1]["result"], "calc:{\"x\":1}");

        match events.last() {
            Some(ChatEvent::Finished(ChatOutcome::Completed(message))) => {
                assert_eq!(message.content, "done");
                assert_eq!(message.rounds, 2);
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_success_status_becomes_errored_outcome() {
        let transport = ScriptedTransport::new(vec![(500, vec!["boom"])]);
        let events = collect(StreamSession::drive(plan(transport, Toolset::none()))).await;
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::Finished(ChatOutcome::Errored(LLMError::Provider { message, .. })) => {
                assert_eq!(message, "500: boom");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn round_limit_finishes_with_text_so_far() {
        let frames = vec![
            "data: {\"c\":\"a\",\"tool\":{\"id\":\"t\",\"name\":\"calc\",\"args\":\"{}\"}}\n\n",
            "data: [DONE]\n\n",
        ];
        let transport = ScriptedTransport::new(vec![(200, frames)]);
        let mut plan = plan(transport.clone(), Toolset::new(Vec::new(), Arc::new(Echo)));
        plan.max_tool_rounds = 1;
        let events = collect(StreamSession::drive(plan)).await;

        assert!(
            !events
                .iter()
                .any(|event| matches!(event, ChatEvent::ToolCalls { .. }))
        );
        assert!(matches!(
            events.last(),
            Some(ChatEvent::Finished(ChatOutcome::Completed(message))) if message.content == "a"
        ));
        assert_eq!(transport.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_only_cancelled() {
        let transport = ScriptedTransport::new(vec![(200, vec!["data: {\"c\":\"x\"}\n\n"])]);
        let plan = plan(transport, Toolset::none());
        plan.cancel.cancel();
        let events = collect(StreamSession::drive(plan)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ChatEvent::Finished(ChatOutcome::Cancelled)));
    }

    #[tokio::test]
    async fn malformed_tool_arguments_are_answered_with_an_error() {
        let transport = ScriptedTransport::new(vec![
            (
                200,
                vec![
                    "data: {\"tool\":{\"id\":\"bad\",\"name\":\"calc\",\"args\":\"{\\\"x\\\":\"}}\n\n",
                    "data: [DONE]\n\n",
                ],
            ),
            (200, vec!["data: {\"c\":\"sorry\"}\n\n", "data: [DONE]\n\n"]),
        ]);
        let toolset = Toolset::new(Vec::new(), Arc::new(Echo));
        let events = collect(StreamSession::drive(plan(transport.clone(), toolset))).await;

        let calls = events
            .iter()
            .find_map(|event| match event {
                ChatEvent::ToolCalls { calls, .. } => Some(calls.clone()),
                _ => None,
            })
            .expect("tool calls event");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "bad");
        assert_eq!(calls[0].arguments, "{}");

        let results = events
            .iter()
            .find_map(|event| match event {
                ChatEvent::ToolResults { results, .. } => Some(results.clone()),
                _ => None,
            })
            .expect("tool results event");
        assert!(results[0].is_error);
        assert!(results[0].content.starts_with("Error: tool calc failed: invalid tool arguments"));

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let sent = requests[1]["messages"][1]["result"].as_str().unwrap_or_default();
        assert!(sent.starts_with("Error: "));

        match events.last() {
            Some(ChatEvent::Finished(ChatOutcome::Completed(message))) => {
                assert_eq!(message.content, "sorry");
                assert_eq!(message.rounds, 2);
            }
            other => panic!("unexpected terminal event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_connect_times_out_as_recoverable() {
        let mut plan = plan(Arc::new(Stalled), Toolset::none());
        plan.connect_timeout = Duration::from_secs(3);
        let events = collect(StreamSession::drive(plan)).await;

        assert_eq!(events.len(), 1);
        match &events[0] {
            ChatEvent::Finished(ChatOutcome::Errored(err @ LLMError::Timeout { after })) => {
                assert_eq!(*after, Duration::from_secs(3));
                assert!(err.is_recoverable());
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
