use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Vendors speaking the OpenAI chat-completions dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatVendor {
    OpenRouter,
    Nvidia,
    LongCat,
    Meituan,
}

/// Per-vendor differences within the dialect, kept as data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VendorQuirks {
    pub name: &'static str,
    /// Stream fields holding reasoning text, in priority order.
    pub reasoning_fields: &'static [&'static str],
    /// Send plain text only and drop `<think>` blocks from assistant turns.
    pub text_only_history: bool,
    /// Sum text across every choice instead of reading the first one.
    pub sum_choices: bool,
    /// Render streamed `images` as markdown.
    pub stream_images: bool,
    /// Route continuation fragments by wire index rather than the active call.
    pub trust_wire_index: bool,
    /// Whether `max_tokens` is forwarded at all.
    pub sends_max_tokens: bool,
    /// Lower bound applied to `max_tokens` for models without their own rule.
    pub min_max_tokens: Option<u32>,
    /// Ceiling for `max_tokens` when the model table has none; `None` disables clamping.
    pub output_ceiling: Option<u32>,
    /// Tokens added to the thinking budget when `max_tokens` would not exceed it.
    pub thinking_headroom: Option<u32>,
    /// Default `n_trajectories` for thinking models; `None` omits the field.
    pub default_trajectories: Option<u32>,
    /// Honors Kimi/gpt-oss model rules (sampling, thinking switch, reasoning effort).
    pub hosted_model_rules: bool,
    /// Requests the image modality for image-generation models.
    pub image_modalities: bool,
    /// Fixed single-shot timeout overriding the model table.
    pub fixed_timeout: Option<Duration>,
}

pub static OPENROUTER: VendorQuirks = VendorQuirks {
    name: "openrouter",
    reasoning_fields: &["reasoning_content", "reasoning"],
    text_only_history: false,
    sum_choices: false,
    stream_images: true,
    trust_wire_index: true,
    sends_max_tokens: false,
    min_max_tokens: None,
    output_ceiling: None,
    thinking_headroom: None,
    default_trajectories: None,
    hosted_model_rules: false,
    image_modalities: true,
    fixed_timeout: None,
};

pub static NVIDIA: VendorQuirks = VendorQuirks {
    name: "nvidia",
    reasoning_fields: &["reasoning_content"],
    text_only_history: false,
    sum_choices: false,
    stream_images: false,
    trust_wire_index: false,
    sends_max_tokens: true,
    min_max_tokens: Some(1024),
    output_ceiling: None,
    thinking_headroom: None,
    default_trajectories: None,
    hosted_model_rules: true,
    image_modalities: false,
    fixed_timeout: Some(Duration::from_secs(60)),
};

pub static LONGCAT: VendorQuirks = VendorQuirks {
    name: "longcat",
    reasoning_fields: &["reasoning_content"],
    text_only_history: true,
    sum_choices: true,
    stream_images: false,
    trust_wire_index: true,
    sends_max_tokens: true,
    min_max_tokens: None,
    output_ceiling: None,
    thinking_headroom: Some(1024),
    default_trajectories: Some(8),
    hosted_model_rules: false,
    image_modalities: false,
    fixed_timeout: None,
};

pub static MEITUAN: VendorQuirks = VendorQuirks {
    name: "meituan",
    reasoning_fields: &["reasoning_content"],
    text_only_history: true,
    sum_choices: true,
    stream_images: false,
    trust_wire_index: true,
    sends_max_tokens: true,
    min_max_tokens: None,
    output_ceiling: Some(262_144),
    thinking_headroom: Some(2048),
    default_trajectories: None,
    hosted_model_rules: false,
    image_modalities: false,
    fixed_timeout: None,
};

impl CompatVendor {
    pub fn quirks(self) -> &'static VendorQuirks {
        match self {
            Self::OpenRouter => &OPENROUTER,
            Self::Nvidia => &NVIDIA,
            Self::LongCat => &LONGCAT,
            Self::Meituan => &MEITUAN,
        }
    }
}

/// Outbound chat-completions body.
#[derive(Debug, Clone, Serialize)]
pub struct CompatPayload {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub stream: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingSwitch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_trajectories: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<&'static str>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_config: Option<ImageConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<WireTool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ThinkingSwitch {
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImageConfig {
    pub aspect_ratio: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireMessage {
    pub role: &'static str,
    /// Plain string or an array of typed parts.
    pub content: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WireFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireTool {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WireFunction {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatStreamChunk {
    #[serde(default)]
    pub(crate) error: Option<InlineError>,
    #[serde(default)]
    pub(crate) choices: Vec<CompatStreamChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InlineError {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) code: Option<Value>,
}

impl InlineError {
    pub(crate) fn describe(&self) -> String {
        if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
            return message.to_string();
        }
        match &self.code {
            Some(Value::String(code)) if !code.is_empty() => code.clone(),
            Some(Value::Number(code)) => code.to_string(),
            _ => "Unknown Error".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatStreamChoice {
    #[serde(default)]
    pub(crate) delta: Option<CompatStreamDelta>,
}

/// Streamed delta; reasoning field names vary per vendor so they stay in `extra`.
#[derive(Debug, Deserialize)]
pub(crate) struct CompatStreamDelta {
    #[serde(default)]
    pub(crate) content: Option<String>,
    #[serde(default)]
    pub(crate) tool_calls: Option<Vec<CompatToolCallDelta>>,
    #[serde(default)]
    pub(crate) images: Option<Vec<CompatImage>>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatToolCallDelta {
    #[serde(default)]
    pub(crate) index: Option<usize>,
    #[serde(default)]
    pub(crate) id: Option<String>,
    #[serde(default)]
    pub(crate) function: Option<CompatFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatFunctionDelta {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatImage {
    pub(crate) image_url: CompatImageUrl,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatImageUrl {
    pub(crate) url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatResponse {
    #[serde(default)]
    pub(crate) model: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<InlineError>,
    #[serde(default)]
    pub(crate) choices: Vec<CompatResponseChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatResponseChoice {
    #[serde(default)]
    pub(crate) message: Option<CompatResponseMessage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CompatResponseMessage {
    #[serde(default)]
    pub(crate) content: Option<String>,
    #[serde(default)]
    pub(crate) images: Option<Vec<CompatImage>>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

/// First non-empty string among `fields` in a flattened field map.
pub(crate) fn first_text_field(extra: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .filter_map(|field| extra.get(*field).and_then(Value::as_str))
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

/// Markdown for generated images, one per line.
pub(crate) fn images_markdown(images: &[CompatImage]) -> String {
    images
        .iter()
        .map(|image| format!("![image]({})", image.image_url.url))
        .collect::<Vec<_>>()
        .join("\n")
}
