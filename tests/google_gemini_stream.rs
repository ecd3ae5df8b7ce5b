mod support;

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use futures_util::StreamExt;
use serde_json::json;
use thinkstream::provider::google_gemini::GoogleGeminiProvider;
use thinkstream::tools::Toolset;
use thinkstream::{
    ChatEvent, ChatOutcome, ChatRequest, ChatRequestConfig, ContentPart, ImageUrl, LLMError,
    LLMProvider, Message, MessageContent, Role, ToolDefinition, wait_for_outcome,
};
use tokio_util::sync::CancellationToken;

use support::{EchoTools, Reply, ScriptedTransport, sse};

fn provider(transport: Arc<ScriptedTransport>) -> GoogleGeminiProvider {
    GoogleGeminiProvider::new(transport)
        .with_base_url("https://gemini.test")
        .with_api_key("g-key")
}

fn config(model: &str) -> ChatRequestConfig {
    ChatRequestConfig {
        model: model.to_string(),
        ..ChatRequestConfig::default()
    }
}

fn text_chunk(text: &str, thought: bool) -> String {
    json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text, "thought": thought}]}}]
    })
    .to_string()
}

#[tokio::test]
async fn sse_stream_splits_thoughts_from_answer() {
    let transport = ScriptedTransport::new(vec![Reply::ok([
        sse(&text_chunk("Considering", true)),
        sse(&text_chunk("Hello", false)),
        sse(&text_chunk(" there", false)),
    ])]);
    let provider = provider(transport.clone());
    let mut chat_config = config("gemini-2.5-flash");
    chat_config.include_thoughts = true;
    chat_config.gemini_thinking_budget = Some(100_000);

    let outcome = wait_for_outcome(
        provider
            .stream_chat(
                ChatRequest {
                    messages: vec![Message::user("hi")],
                    config: chat_config,
                },
                Toolset::none(),
                CancellationToken::new(),
            )
            .await
            .expect("stream opens"),
    )
    .await;

    match outcome {
        ChatOutcome::Completed(message) => {
            assert_eq!(message.reasoning, "Considering");
            assert_eq!(message.content, "Hello there");
        }
        other => panic!("expected completion, got {other:?}"),
    }

    let requests = transport.requests();
    assert_eq!(
        requests[0].url,
        "https://gemini.test/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
    );
    assert_eq!(
        requests[0].headers.get("x-goog-api-key").map(String::as_str),
        Some("g-key")
    );
    let body = requests[0].json_body().expect("json body");
    let thinking = &body["generationConfig"]["thinkingConfig"];
    assert_eq!(thinking["includeThoughts"], true);
    assert!(thinking["thinkingBudget"].as_i64().expect("budget") < 100_000);
    assert_eq!(body["safetySettings"].as_array().map(Vec::len), Some(4));
}

#[tokio::test]
async fn json_lines_mode_reads_the_streamed_array() {
    let body = format!(
        "[{},\r\n{}\r\n]",
        text_chunk("Bon", false),
        text_chunk("jour", false)
    );
    let (head, tail) = body.split_at(body.len() / 2);
    let transport = ScriptedTransport::new(vec![Reply::ok([head.to_string(), tail.to_string()])]);
    let provider = provider(transport.clone()).with_sse(false);

    let outcome = wait_for_outcome(
        provider
            .stream_chat(
                ChatRequest {
                    messages: vec![Message::user("hello in french")],
                    config: config("gemini-2.0-flash"),
                },
                Toolset::none(),
                CancellationToken::new(),
            )
            .await
            .expect("stream opens"),
    )
    .await;

    assert!(matches!(
        outcome,
        ChatOutcome::Completed(message) if message.content == "Bonjour"
    ));
    assert!(!transport.requests()[0].url.contains("alt=sse"));
}

#[tokio::test]
async fn json_lines_mode_skips_only_the_broken_line() {
    let body = format!(
        "{}\n{{\"candidates\": [\n{}\n",
        text_chunk("Ciao", false),
        text_chunk(" mondo", false)
    );
    let transport = ScriptedTransport::new(vec![Reply::ok([body])]);
    let provider = provider(transport).with_sse(false);

    let outcome = wait_for_outcome(
        provider
            .stream_chat(
                ChatRequest {
                    messages: vec![Message::user("hello in italian")],
                    config: config("gemini-2.0-flash"),
                },
                Toolset::none(),
                CancellationToken::new(),
            )
            .await
            .expect("stream opens"),
    )
    .await;

    assert!(matches!(
        outcome,
        ChatOutcome::Completed(message) if message.content == "Ciao mondo"
    ));
}

#[tokio::test]
async fn function_calls_round_trip_through_function_responses() {
    let call_chunk = json!({
        "candidates": [{"content": {"role": "model", "parts": [
            {"functionCall": {"name": "weather", "args": {"city": "Rome"}}}
        ]}}]
    })
    .to_string();
    let transport = ScriptedTransport::new(vec![
        Reply::ok([sse(&call_chunk)]),
        Reply::ok([sse(&text_chunk("Warm in Rome.", false))]),
    ]);
    let provider = provider(transport.clone());
    let toolset = Toolset::new(
        vec![ToolDefinition {
            name: "weather".to_string(),
            description: Some("Current weather".to_string()),
            parameters: Some(json!({"type": "object", "properties": {"city": {"type": "string"}}})),
        }],
        Arc::new(EchoTools),
    );

    let events: Vec<ChatEvent> = provider
        .stream_chat(
            ChatRequest {
                messages: vec![Message::user("weather in Rome?")],
                config: config("gemini-2.5-pro"),
            },
            toolset,
            CancellationToken::new(),
        )
        .await
        .expect("stream opens")
        .collect()
        .await;

    let calls = events
        .iter()
        .find_map(|event| match event {
            ChatEvent::ToolCalls { calls, .. } => Some(calls.clone()),
            _ => None,
        })
        .expect("tool calls event");
    assert_eq!(calls[0].id, "call_1_1");
    assert_eq!(calls[0].name, "weather");
    assert_eq!(calls[0].arguments, r#"{"city":"Rome"}"#);

    let bodies = transport.bodies();
    assert_eq!(
        bodies[0]["tools"][0]["functionDeclarations"][0]["name"],
        "weather"
    );
    let contents = bodies[1]["contents"].as_array().expect("contents");
    assert_eq!(contents.len(), 3);
    assert_eq!(contents[1]["role"], "model");
    assert_eq!(contents[1]["parts"][0]["functionCall"]["args"]["city"], "Rome");
    assert_eq!(contents[2]["role"], "function");
    assert_eq!(
        contents[2]["parts"][0]["functionResponse"]["response"]["content"],
        r#"weather({"city":"Rome"})"#
    );

    match events.last() {
        Some(ChatEvent::Finished(ChatOutcome::Completed(message))) => {
            assert_eq!(message.content, "Warm in Rome.");
            assert_eq!(message.rounds, 2);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn history_merges_roles_and_inlines_data_url_images() {
    let transport = ScriptedTransport::new(vec![Reply::ok([sse(&text_chunk("A cat.", false))])]);
    let provider = provider(transport.clone());
    let pixels = general_purpose::STANDARD.encode([0x89, b'P', b'N', b'G']);
    let image = Message {
        role: Role::User,
        content: MessageContent::Parts(vec![
            ContentPart::Text {
                text: "What is this?".to_string(),
            },
            ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{pixels}"),
                    detail: None,
                },
            },
        ]),
        tool_calls: Vec::new(),
        tool_call_id: None,
        name: None,
    };

    let outcome = wait_for_outcome(
        provider
            .stream_chat(
                ChatRequest {
                    messages: vec![
                        Message::system("describe images"),
                        Message::user("hello"),
                        Message::assistant("hi"),
                        Message::assistant("how can I help?"),
                        image,
                    ],
                    config: config("gemini-2.0-flash"),
                },
                Toolset::none(),
                CancellationToken::new(),
            )
            .await
            .expect("stream opens"),
    )
    .await;
    assert!(matches!(outcome, ChatOutcome::Completed(_)));

    let body = &transport.bodies()[0];
    let contents = body["contents"].as_array().expect("contents");
    let roles: Vec<&str> = contents
        .iter()
        .map(|content| content["role"].as_str().unwrap_or_default())
        .collect();
    assert_eq!(roles, vec!["user", "model", "user"]);
    assert_eq!(contents[0]["parts"].as_array().map(Vec::len), Some(2));
    assert_eq!(contents[1]["parts"][1]["text"], "how can I help?");
    assert_eq!(contents[2]["parts"][1]["inline_data"]["mime_type"], "image/png");
    assert_eq!(contents[2]["parts"][1]["inline_data"]["data"], pixels);
}

#[tokio::test]
async fn prompt_block_mid_stream_is_rendered_inline() {
    let transport = ScriptedTransport::new(vec![Reply::ok([sse(
        &json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string(),
    )])]);
    let outcome = wait_for_outcome(
        provider(transport)
            .stream_chat(
                ChatRequest {
                    messages: vec![Message::user("something unsafe")],
                    config: config("gemini-2.0-flash"),
                },
                Toolset::none(),
                CancellationToken::new(),
            )
            .await
            .expect("stream opens"),
    )
    .await;

    match outcome {
        ChatOutcome::Completed(message) => assert_eq!(
            message.content,
            "\n\n> [!ERROR]\n> Message is being blocked for reason: SAFETY"
        ),
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn quota_errors_become_rate_limits() {
    let body = json!({
        "error": {"code": 429, "message": "Quota exceeded", "status": "RESOURCE_EXHAUSTED"}
    })
    .to_string();
    let transport = ScriptedTransport::new(vec![Reply::status(429, body)]);
    let outcome = wait_for_outcome(
        provider(transport)
            .stream_chat(
                ChatRequest {
                    messages: vec![Message::user("hi")],
                    config: config("gemini-2.0-flash"),
                },
                Toolset::none(),
                CancellationToken::new(),
            )
            .await
            .expect("stream opens"),
    )
    .await;

    match outcome {
        ChatOutcome::Errored(LLMError::RateLimit { message, .. }) => {
            assert!(message.contains("Quota exceeded"));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn single_shot_chat_joins_chunks_and_keeps_thoughts() {
    let body = json!([
        {"candidates": [{"content": {"parts": [{"text": "plan", "thought": true}, {"text": "Part one"}]}}]},
        {"candidates": [{"content": {"parts": [{"text": " and two"}]}}], "modelVersion": "gemini-2.5-flash"}
    ])
    .to_string();
    let transport = ScriptedTransport::new(vec![Reply::ok([body])]);
    let response = provider(transport.clone())
        .chat(
            ChatRequest {
                messages: vec![Message::user("hi")],
                config: ChatRequestConfig {
                    stream: false,
                    ..config("gemini-2.5-flash")
                },
            },
            &CancellationToken::new(),
        )
        .await
        .expect("single-shot response");

    assert_eq!(response.content, "Part one and two");
    assert_eq!(response.reasoning.as_deref(), Some("plan"));
    assert_eq!(response.model.as_deref(), Some("gemini-2.5-flash"));
    assert!(!transport.requests()[0].url.contains("alt=sse"));
}
