use serde_json::{Value, json};
use tracing::debug;

use crate::capabilities::{GeminiThinking, ModelProfile};
use crate::types::{ChatRequestConfig, Message, Role, ToolCall, ToolDefinition, ToolResult};

use super::types::{
    FunctionCall, FunctionDeclaration, FunctionResponse, FunctionResponseBody, GeminiContent,
    GeminiPart, GeminiPayload, GeminiToolGroup, GenerationConfig, HARM_CATEGORIES, InlineData,
    SafetySetting, ThinkingConfig,
};

/// 构建 Gemini GenerateContent 请求体
///
/// 模型名称通过 URL 路径传递 不会出现在 body 中。
pub(crate) fn build_gemini_payload(
    messages: &[Message],
    config: &ChatRequestConfig,
    model: &str,
    tools: &[ToolDefinition],
    safety_threshold: &str,
) -> GeminiPayload {
    let profile = ModelProfile::lookup(model);

    let contents = merge_adjacent_roles(
        messages
            .iter()
            .map(|message| convert_message(message, profile.vision))
            .collect(),
    );

    let tools = if tools.is_empty() {
        Vec::new()
    } else {
        vec![GeminiToolGroup {
            function_declarations: tools.iter().map(convert_tool).collect(),
        }]
    };

    GeminiPayload {
        contents,
        generation_config: GenerationConfig {
            temperature: config.temperature,
            max_output_tokens: config.max_tokens,
            top_p: config.top_p,
            thinking_config: profile
                .gemini_thinking
                .and_then(|shape| thinking_config(shape, config)),
        },
        safety_settings: HARM_CATEGORIES
            .iter()
            .map(|category| SafetySetting {
                category: *category,
                threshold: safety_threshold.to_string(),
            })
            .collect(),
        tools,
    }
}

/// `thinkingConfig` is only sent once the caller touched one of the thinking settings.
fn thinking_config(shape: GeminiThinking, config: &ChatRequestConfig) -> Option<ThinkingConfig> {
    let requested = config.include_thoughts
        || config.gemini_thinking_budget.is_some()
        || config.thinking_level.is_some();
    if !requested {
        return None;
    }

    let thinking_level = match shape {
        GeminiThinking::Level => config
            .thinking_level
            .clone()
            .filter(|level| !level.is_empty()),
        GeminiThinking::Budget { .. } => None,
    };

    Some(ThinkingConfig {
        include_thoughts: config.include_thoughts,
        thinking_level,
        thinking_budget: shape.clamp_budget(config.gemini_thinking_budget),
    })
}

fn convert_message(message: &Message, vision: bool) -> GeminiContent {
    match message.role {
        Role::Tool => {
            let name = message.name.clone().unwrap_or_default();
            GeminiContent {
                role: "function",
                parts: vec![function_response(name, message.text())],
            }
        }
        Role::Assistant => {
            let mut parts = vec![GeminiPart::Text {
                text: message.text(),
            }];
            parts.extend(message.tool_calls.iter().map(function_call));
            GeminiContent {
                role: "model",
                parts,
            }
        }
        Role::User | Role::System => {
            let mut parts = vec![GeminiPart::Text {
                text: message.text(),
            }];
            if vision {
                parts.extend(
                    message
                        .images()
                        .into_iter()
                        .filter_map(inline_image)
                        .map(|inline_data| GeminiPart::InlineData { inline_data }),
                );
            }
            GeminiContent {
                role: "user",
                parts,
            }
        }
    }
}

/// Gemini rejects two neighboring contents with the same role.
fn merge_adjacent_roles(contents: Vec<GeminiContent>) -> Vec<GeminiContent> {
    let mut merged: Vec<GeminiContent> = Vec::with_capacity(contents.len());
    for content in contents {
        match merged.last_mut() {
            Some(last) if last.role == content.role => last.parts.extend(content.parts),
            _ => merged.push(content),
        }
    }
    merged
}

/// Splits a `data:<mime>;base64,<data>` URL into inline data.
fn inline_image(url: &str) -> Option<InlineData> {
    let Some((meta, data)) = url.strip_prefix("data:").and_then(|rest| rest.split_once(',')) else {
        debug!(url_len = url.len(), "skipping image that is not a data url");
        return None;
    };
    let mime_type = meta.split(';').next().unwrap_or_default();
    Some(InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

fn convert_tool(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: tool.parameters.clone(),
    }
}

fn function_call(call: &ToolCall) -> GeminiPart {
    let args = serde_json::from_str::<Value>(&call.arguments).unwrap_or_else(|_| json!({}));
    GeminiPart::FunctionCall {
        function_call: FunctionCall {
            name: call.name.clone(),
            args,
        },
    }
}

fn function_response(name: String, content: String) -> GeminiPart {
    GeminiPart::FunctionResponse {
        function_response: FunctionResponse {
            name: name.clone(),
            response: FunctionResponseBody { name, content },
        },
    }
}

/// Appends a `model` content holding the calls, then one `function` content per result.
pub(crate) fn append_tool_contents(
    payload: &mut GeminiPayload,
    calls: &[ToolCall],
    results: &[ToolResult],
) {
    payload.contents.push(GeminiContent {
        role: "model",
        parts: calls.iter().map(function_call).collect(),
    });
    payload
        .contents
        .extend(results.iter().map(|result| GeminiContent {
            role: "function",
            parts: vec![function_response(result.name.clone(), result.content.clone())],
        }));
}
