//! Shared data structures modeling chat requests, streamed deltas and session outcomes.
//!
//! These types normalize vendor-specific payloads so the rest of the crate can stay
//! agnostic of individual API differences.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LLMError;

/// Chat role of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Tool output fed back to the model. Older payloads call this role `function`.
    #[serde(alias = "function")]
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Normalized chat message shared across providers.
///
/// Ordering inside a request is significant. Assistant turns produced by a tool round
/// carry `tool_calls`; the matching tool turns carry `tool_call_id`.
///
/// # Examples
///
/// ```
/// # use thinkstream::types::{ContentPart, ImageUrl, Message, MessageContent, Role};
/// let msg = Message {
///     role: Role::User,
///     content: MessageContent::Parts(vec![
///         ContentPart::Text { text: "Describe this image".into() },
///         ContentPart::ImageUrl {
///             image_url: ImageUrl { url: "data:image/png;base64,AAAA".into(), detail: None },
///         },
///     ]),
///     tool_calls: Vec::new(),
///     tool_call_id: None,
///     name: None,
/// };
/// assert_eq!(msg.text(), "Describe this image");
/// assert_eq!(msg.images(), vec!["data:image/png;base64,AAAA"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
    /// Tool calls requested by an assistant turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Identifier of the call a tool turn answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Function name for tool turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: MessageContent::Text(text.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, text)
    }

    /// Concatenates every text part of the message.
    pub fn text(&self) -> String {
        self.content.text()
    }

    /// Returns the URLs (usually data URLs) of every attached image in order.
    pub fn images(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                    ContentPart::Text { .. } => None,
                })
                .collect(),
        }
    }
}

/// Message body: either plain text or an ordered list of text/image parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let mut buffer = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        buffer.push_str(text);
                    }
                }
                buffer
            }
        }
    }

    pub fn has_images(&self) -> bool {
        matches!(self, MessageContent::Parts(parts)
            if parts.iter().any(|part| matches!(part, ContentPart::ImageUrl { .. })))
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// One part of a multimodal message, already in the OpenAI wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Declarative definition of a function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema describing the arguments object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Fully assembled tool call.
///
/// `arguments` keeps the raw JSON text exactly as the model produced it; the assembler
/// only closes calls whose arguments parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// Incremental piece of a streamed tool call.
///
/// The first fragment of a call carries a non-empty `id`; continuations carry only
/// `arguments` and, depending on the vendor, an `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Output of one executed tool call, injected into the next round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

/// Per-call model configuration after layering global, session and call-site settings.
///
/// Build it with [`crate::config::resolve_request_config`]; providers treat it as
/// immutable. Vendor extensions that a provider does not know are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequestConfig {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub stream: bool,
    /// Gemini: ask for thought parts.
    #[serde(default)]
    pub include_thoughts: bool,
    /// Gemini 2.5 thinking budget; `-1` lets the vendor decide.
    #[serde(default)]
    pub gemini_thinking_budget: Option<i32>,
    /// Gemini 3 thinking level such as `low` or `high`.
    #[serde(default)]
    pub thinking_level: Option<String>,
    /// LongCat/Meituan thinking budget.
    #[serde(default)]
    pub thinking_budget: Option<u32>,
    /// NVIDIA Kimi thinking toggle.
    #[serde(default)]
    pub enable_thinking: Option<bool>,
    #[serde(default)]
    pub reasoning_effort: Option<String>,
    /// Aspect ratio for image-capable models.
    #[serde(default)]
    pub aspect_ratio: Option<String>,
    /// LongCat heavy-thinking trajectories.
    #[serde(default)]
    pub n_trajectories: Option<u32>,
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Global defaults: temperature 0.5, top_p 1, 4000 output tokens, no penalties, streaming.
impl Default for ChatRequestConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.5,
            top_p: 1.0,
            max_tokens: 4000,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
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
}

/// Chat request shared across all providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub config: ChatRequestConfig,
}

/// Incremental output produced from a single decoded frame.
///
/// `reasoning` and `content` are disjoint: a piece of text is attributed to exactly one
/// of them. Tool-call fragments are reported for observers; the session has already
/// applied them to its assembler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub reasoning: Option<String>,
    pub content: Option<String>,
    pub tool_call_fragments: Vec<ToolCallFragment>,
}

impl Delta {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning: Some(text.into()),
            ..Self::default()
        }
    }

    /// Drops empty strings so that "no text" is always represented by `None`.
    pub(crate) fn normalized(mut self) -> Self {
        if self.reasoning.as_deref() == Some("") {
            self.reasoning = None;
        }
        if self.content.as_deref() == Some("") {
            self.content = None;
        }
        self
    }

    pub fn has_text(&self) -> bool {
        self.reasoning.is_some() || self.content.is_some()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_text() && self.tool_call_fragments.is_empty()
    }
}

/// Event yielded by a [`crate::provider::ChatStream`].
///
/// Every stream ends with exactly one [`ChatEvent::Finished`].
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Reasoning and/or answer text, in frame order.
    Delta(Delta),
    /// A closed batch of tool calls about to be executed.
    ToolCalls { round: usize, calls: Vec<ToolCall> },
    /// Results of the batch, in the order of the calls.
    ToolResults {
        round: usize,
        results: Vec<ToolResult>,
    },
    /// Terminal outcome of the session.
    Finished(ChatOutcome),
}

/// Single terminal result of a chat session.
#[derive(Debug, Clone)]
pub enum ChatOutcome {
    Completed(FinalMessage),
    Errored(LLMError),
    Cancelled,
}

/// Assembled text of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalMessage {
    /// Full answer text across every round.
    pub content: String,
    /// Reasoning text, kept apart from the answer.
    pub reasoning: String,
    /// Number of request rounds issued.
    pub rounds: usize,
}

/// Complete single-shot response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub model: Option<String>,
    pub provider: ProviderMetadata,
}

impl ChatResponse {
    /// Answer text with the reasoning inlined under the `<think>` wrapper.
    pub fn rendered(&self) -> String {
        match self.reasoning.as_deref() {
            Some(reasoning) if !reasoning.is_empty() => wrap_reasoning(reasoning, &self.content),
            _ => self.content.clone(),
        }
    }
}

/// Inlines reasoning ahead of the answer for renderers without a separate reasoning slot.
pub fn wrap_reasoning(reasoning: &str, content: &str) -> String {
    format!("<think>\n{reasoning}\n</think>\n{content}")
}

/// Removes `<think>…</think>` blocks that earlier single-shot answers inlined.
pub fn strip_reasoning(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        output.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    output.push_str(rest);
    output.trim().to_string()
}

/// Provider metadata returned with each response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Provider identifier such as `openrouter`.
    pub provider: String,
    /// Endpoint URL that served the request.
    pub endpoint: Option<String>,
}

/// Capability descriptor used to filter providers at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapabilityDescriptor {
    pub supports_stream: bool,
    pub supports_image_input: bool,
    pub supports_tools: bool,
    /// Whether the provider reports reasoning text separately from the answer.
    pub supports_reasoning: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_role_accepts_function_alias() {
        let role: Role = serde_json::from_str("\"function\"").expect("role");
        assert_eq!(role, Role::Tool);
        assert_eq!(serde_json::to_string(&Role::Tool).unwrap(), "\"tool\"");
    }

    #[test]
    fn message_content_deserializes_text_and_parts() {
        let text: MessageContent = serde_json::from_str("\"hi\"").unwrap();
        assert_eq!(text, MessageContent::Text("hi".into()));

        let parts: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"look"},{"type":"image_url","image_url":{"url":"https://x/y.png"}}]"#,
        )
        .unwrap();
        assert!(parts.has_images());
        assert_eq!(parts.text(), "look");
    }

    #[test]
    fn strip_reasoning_removes_think_blocks() {
        let text = "<think>\nplan\n</think>\nAnswer";
        assert_eq!(strip_reasoning(text), "Answer");
        assert_eq!(strip_reasoning("a<think>x</think>b<think>y"), "ab");
        assert_eq!(strip_reasoning("plain"), "plain");
    }

    #[test]
    fn rendered_response_wraps_reasoning() {
        let response = ChatResponse {
            content: "42".into(),
            reasoning: Some("compute".into()),
            model: None,
            provider: ProviderMetadata::default(),
        };
        assert_eq!(response.rendered(), "<think>\ncompute\n</think>\n42");

        let bare = ChatResponse {
            reasoning: None,
            ..response
        };
        assert_eq!(bare.rendered(), "42");
    }

    #[test]
    fn delta_normalization_drops_empty_text() {
        let delta = Delta {
            reasoning: Some(String::new()),
            content: Some("x".into()),
            tool_call_fragments: Vec::new(),
        }
        .normalized();
        assert_eq!(delta.reasoning, None);
        assert!(delta.has_text());
        assert!(Delta::default().is_empty());
    }
}
