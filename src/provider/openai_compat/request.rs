use serde_json::{Map, Value, json};

use crate::capabilities::{MaxTokensRule, ModelProfile};
use crate::types::{
    ChatRequestConfig, ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition,
    ToolResult, strip_reasoning,
};

use super::types::{
    CompatPayload, ImageConfig, ThinkingSwitch, VendorQuirks, WireFunction, WireFunctionCall,
    WireMessage, WireTool, WireToolCall,
};

/// Shapes the chat-completions body for one vendor.
pub(crate) fn build_compat_payload(
    quirks: &VendorQuirks,
    messages: &[Message],
    config: &ChatRequestConfig,
    model: &str,
    tools: &[ToolDefinition],
    stream: bool,
) -> CompatPayload {
    let profile = ModelProfile::lookup(model);

    let mut payload = CompatPayload {
        model: model.to_string(),
        messages: messages
            .iter()
            .map(|message| convert_message(message, quirks, profile.vision))
            .collect(),
        stream,
        temperature: config.temperature,
        top_p: config.top_p,
        presence_penalty: config.presence_penalty,
        frequency_penalty: config.frequency_penalty,
        max_tokens: None,
        reasoning_effort: None,
        thinking: None,
        enable_thinking: None,
        thinking_budget: None,
        n_trajectories: None,
        modalities: None,
        image_config: None,
        tools: tools.iter().map(convert_tool).collect(),
        extra: config.extra.clone().into_iter().collect::<Map<String, Value>>(),
    };

    if quirks.hosted_model_rules {
        apply_hosted_model_rules(&mut payload, &profile, config);
    }

    if quirks.sends_max_tokens {
        payload.max_tokens = Some(resolve_max_tokens(quirks, &profile, config));
    }

    if let (Some(default_budget), Some(headroom)) =
        (profile.thinking_budget_default, quirks.thinking_headroom)
    {
        let budget = config
            .thinking_budget
            .filter(|budget| *budget > 0)
            .unwrap_or(default_budget);
        payload.enable_thinking = Some(true);
        payload.thinking_budget = Some(budget);
        payload.n_trajectories = quirks.default_trajectories.map(|default| {
            config
                .n_trajectories
                .filter(|count| *count > 0)
                .unwrap_or(default)
        });
        if let Some(max_tokens) = payload.max_tokens {
            if max_tokens <= budget {
                let raised = budget.saturating_add(headroom);
                payload.max_tokens = Some(match output_ceiling(quirks, &profile) {
                    Some(ceiling) => raised.min(ceiling),
                    None => raised,
                });
            }
        }
    }

    if quirks.image_modalities && profile.image_output {
        payload.modalities = Some(vec!["image", "text"]);
        payload.image_config = config
            .aspect_ratio
            .clone()
            .filter(|ratio| !ratio.is_empty())
            .map(|aspect_ratio| ImageConfig { aspect_ratio });
    }

    payload
}

fn apply_hosted_model_rules(
    payload: &mut CompatPayload,
    profile: &ModelProfile,
    config: &ChatRequestConfig,
) {
    let enable_thinking = config.enable_thinking.unwrap_or(true);
    if let Some(sampling) = profile.sampling {
        payload.temperature = if enable_thinking {
            sampling.temperature_thinking
        } else {
            sampling.temperature
        };
        payload.top_p = sampling.top_p;
        payload.presence_penalty = 0.0;
        payload.frequency_penalty = 0.0;
    }
    if profile.thinking_type_field {
        payload.thinking = Some(ThinkingSwitch {
            kind: if enable_thinking { "enabled" } else { "disabled" },
        });
    }
    if profile.reasoning_effort {
        payload.reasoning_effort = config
            .reasoning_effort
            .clone()
            .filter(|effort| !effort.is_empty());
    }
}

fn resolve_max_tokens(quirks: &VendorQuirks, profile: &ModelProfile, config: &ChatRequestConfig) -> u32 {
    let model_rule = if quirks.hosted_model_rules {
        profile.max_tokens
    } else {
        None
    };
    let max_tokens = match model_rule {
        Some(MaxTokensRule::Fixed(tokens)) => tokens,
        Some(MaxTokensRule::AtLeast(floor)) => config.max_tokens.max(floor),
        None => quirks
            .min_max_tokens
            .map_or(config.max_tokens, |floor| config.max_tokens.max(floor)),
    };
    match output_ceiling(quirks, profile) {
        Some(ceiling) => max_tokens.min(ceiling),
        None => max_tokens,
    }
}

fn output_ceiling(quirks: &VendorQuirks, profile: &ModelProfile) -> Option<u32> {
    quirks
        .output_ceiling
        .map(|fallback| profile.output_ceiling.unwrap_or(fallback))
}

fn convert_message(message: &Message, quirks: &VendorQuirks, vision: bool) -> WireMessage {
    if message.role == Role::Tool {
        return WireMessage {
            role: "tool",
            content: Value::String(message.text()),
            tool_calls: Vec::new(),
            tool_call_id: message.tool_call_id.clone(),
            name: message.name.clone(),
        };
    }

    let content = if quirks.text_only_history {
        let text = message.text();
        if message.role == Role::Assistant {
            Value::String(strip_reasoning(&text))
        } else {
            Value::String(text)
        }
    } else {
        convert_content(&message.content, vision)
    };

    WireMessage {
        role: message.role.as_str(),
        content,
        tool_calls: message.tool_calls.iter().map(convert_tool_call).collect(),
        tool_call_id: None,
        name: None,
    }
}

/// Keeps image parts only for vision models; everything else is sent as plain text.
fn convert_content(content: &MessageContent, vision: bool) -> Value {
    match content {
        MessageContent::Parts(parts) if vision && content.has_images() => Value::Array(
            parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => json!({"type": "text", "text": text}),
                    ContentPart::ImageUrl { image_url } => match &image_url.detail {
                        Some(detail) => json!({
                            "type": "image_url",
                            "image_url": {"url": image_url.url, "detail": detail}
                        }),
                        None => json!({"type": "image_url", "image_url": {"url": image_url.url}}),
                    },
                })
                .collect(),
        ),
        other => Value::String(other.text()),
    }
}

fn convert_tool_call(call: &ToolCall) -> WireToolCall {
    WireToolCall {
        id: call.id.clone(),
        kind: "function",
        function: WireFunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.clone(),
        },
    }
}

fn convert_tool(tool: &ToolDefinition) -> WireTool {
    WireTool {
        kind: "function",
        function: WireFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// Appends the assistant tool-call turn followed by one `tool` message per result.
pub(crate) fn append_tool_messages(
    payload: &mut CompatPayload,
    calls: &[ToolCall],
    results: &[ToolResult],
) {
    payload.messages.push(WireMessage {
        role: "assistant",
        content: Value::String(String::new()),
        tool_calls: calls.iter().map(convert_tool_call).collect(),
        tool_call_id: None,
        name: None,
    });
    payload
        .messages
        .extend(results.iter().map(|result| WireMessage {
            role: "tool",
            content: Value::String(result.content.clone()),
            tool_calls: Vec::new(),
            tool_call_id: Some(result.call_id.clone()),
            name: Some(result.name.clone()),
        }));
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::super::types::{LONGCAT, MEITUAN, NVIDIA, OPENROUTER};
    use super::*;
    use crate::types::ImageUrl;

    fn config(model: &str) -> ChatRequestConfig {
        ChatRequestConfig {
            model: model.to_string(),
            temperature: 0.5,
            top_p: 1.0,
            max_tokens: 4000,
            presence_penalty: 0.3,
            frequency_penalty: 0.2,
            stream: true,
            include_thoughts: false,
            gemini_thinking_budget: None,
            thinking_level: None,
            thinking_budget: None,
            enable_thinking: None,
            reasoning_effort: None,
            aspect_ratio: None,
            n_trajectories: None,
            extra: HashMap::new(),
        }
    }

    fn image_message() -> Message {
        Message {
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "what is this".into(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".into(),
                        detail: None,
                    },
                },
            ]),
            ..Message::user("")
        }
    }

    fn body(quirks: &VendorQuirks, messages: &[Message], config: &ChatRequestConfig) -> Value {
        let payload = build_compat_payload(quirks, messages, config, &config.model, &[], true);
        serde_json::to_value(payload).expect("serializable")
    }

    #[test]
    fn nvidia_kimi_uses_fixed_sampling_and_thinking_switch() {
        let mut cfg = config("moonshotai/kimi-k2.5");
        let json = body(&NVIDIA, &[Message::user("hi")], &cfg);
        assert_eq!(json["temperature"], 1.0);
        assert!((json["top_p"].as_f64().unwrap() - 0.95).abs() < 1e-6);
        assert_eq!(json["presence_penalty"], 0.0);
        assert_eq!(json["max_tokens"], 32768);
        assert_eq!(json["thinking"]["type"], "enabled");

        cfg.enable_thinking = Some(false);
        let json = body(&NVIDIA, &[Message::user("hi")], &cfg);
        assert_eq!(json["thinking"]["type"], "disabled");
        assert!((json["temperature"].as_f64().unwrap() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn nvidia_max_tokens_rules() {
        let mut cfg = config("openai/gpt-oss-120b");
        cfg.reasoning_effort = Some("high".into());
        let json = body(&NVIDIA, &[Message::user("hi")], &cfg);
        assert_eq!(json["max_tokens"], 131072);
        assert_eq!(json["reasoning_effort"], "high");
        assert!(json.get("thinking").is_none());

        let mut cfg = config("meta/llama-3.1-8b-instruct");
        cfg.max_tokens = 200;
        let json = body(&NVIDIA, &[Message::user("hi")], &cfg);
        assert_eq!(json["max_tokens"], 1024);
        assert_eq!(json["temperature"], 0.5);
        assert!(json.get("reasoning_effort").is_none());
    }

    #[test]
    fn meituan_thinking_budget_and_ceiling() {
        let mut cfg = config("LongCat-Flash-Thinking");
        cfg.max_tokens = 500_000;
        let json = body(&MEITUAN, &[Message::user("hi")], &cfg);
        assert_eq!(json["max_tokens"], 131072);
        assert_eq!(json["enable_thinking"], true);
        assert_eq!(json["thinking_budget"], 1024);
        assert!(json.get("n_trajectories").is_none());

        cfg.max_tokens = 512;
        cfg.thinking_budget = Some(2000);
        let json = body(&MEITUAN, &[Message::user("hi")], &cfg);
        assert_eq!(json["max_tokens"], 4048);

        let mut cfg = config("LongCat-Flash-Chat-2601");
        cfg.max_tokens = 500_000;
        let json = body(&MEITUAN, &[Message::user("hi")], &cfg);
        assert_eq!(json["max_tokens"], 262144);
        assert!(json.get("enable_thinking").is_none());
    }

    #[test]
    fn longcat_sends_trajectories_and_strips_thinking_history() {
        let mut cfg = config("LongCat-Flash-Thinking");
        cfg.max_tokens = 1000;
        let history = [
            image_message(),
            Message::assistant("<think>\nhmm\n</think>\nIt is a cat"),
        ];
        let json = body(&LONGCAT, &history, &cfg);
        assert_eq!(json["n_trajectories"], 8);
        assert_eq!(json["max_tokens"], 2048);
        assert_eq!(json["messages"][0]["content"], "what is this");
        assert_eq!(json["messages"][1]["content"], "It is a cat");
    }

    #[test]
    fn openrouter_keeps_images_for_vision_models_only() {
        let json = body(&OPENROUTER, &[image_message()], &config("openai/gpt-4o"));
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert!(json.get("max_tokens").is_none());

        let json = body(&OPENROUTER, &[image_message()], &config("mistralai/mistral-7b"));
        assert_eq!(json["messages"][0]["content"], "what is this");
    }

    #[test]
    fn openrouter_image_models_request_image_modality() {
        let mut cfg = config("black-forest-labs/flux.1-schnell");
        cfg.aspect_ratio = Some("16:9".into());
        let json = body(&OPENROUTER, &[Message::user("a fox")], &cfg);
        assert_eq!(json["modalities"], json!(["image", "text"]));
        assert_eq!(json["image_config"]["aspect_ratio"], "16:9");
    }

    #[test]
    fn tool_round_appends_assistant_and_tool_messages() {
        let cfg = config("openai/gpt-4o");
        let mut payload =
            build_compat_payload(&OPENROUTER, &[Message::user("2x?")], &cfg, &cfg.model, &[], true);
        let calls = [ToolCall {
            id: "abc".into(),
            name: "double".into(),
            arguments: "{\"x\":1}".into(),
        }];
        let results = [ToolResult {
            call_id: "abc".into(),
            name: "double".into(),
            content: "2".into(),
            is_error: false,
        }];
        append_tool_messages(&mut payload, &calls, &results);

        let json = serde_json::to_value(&payload).expect("serializable");
        assert_eq!(json["messages"][1]["role"], "assistant");
        assert_eq!(json["messages"][1]["tool_calls"][0]["function"]["arguments"], "{\"x\":1}");
        assert_eq!(json["messages"][2]["role"], "tool");
        assert_eq!(json["messages"][2]["tool_call_id"], "abc");
        assert_eq!(json["messages"][2]["name"], "double");
        assert_eq!(json["messages"][2]["content"], "2");
    }
}
