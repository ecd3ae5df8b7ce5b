use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Harm categories covered by `safetySettings`.
pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Threshold used when the configuration sets none.
pub const DEFAULT_SAFETY_THRESHOLD: &str = "BLOCK_ONLY_HIGH";

/// GenerateContent 请求体
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiPayload {
    pub contents: Vec<GeminiContent>,
    pub generation_config: GenerationConfig,
    pub safety_settings: Vec<SafetySetting>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiToolGroup>,
}

/// 一条对话内容 role 只会是 user / model / function
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GeminiContent {
    pub role: &'static str,
    pub parts: Vec<GeminiPart>,
}

/// 请求中的内容单元
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        inline_data: InlineData,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionResponse {
    pub name: String,
    pub response: FunctionResponseBody,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionResponseBody {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    pub include_thoughts: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<i32>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeminiToolGroup {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// GenerateContentResponse 流式 chunk 与非流式响应共用
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GeminiChunk {
    #[serde(default)]
    pub(crate) candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub(crate) prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub(crate) model_version: Option<String>,
    #[serde(default)]
    pub(crate) error: Option<GeminiInlineError>,
}

impl GeminiChunk {
    /// Parts of the first candidate.
    pub(crate) fn parts(&self) -> &[ResponsePart] {
        self.candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| content.parts.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn block_reason(&self) -> Option<&str> {
        self.prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
            .filter(|reason| !reason.is_empty())
    }
}

/// 非流式响应可能是单个对象 也可能是 chunk 数组
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum GeminiBody {
    Many(Vec<GeminiChunk>),
    One(GeminiChunk),
}

impl GeminiBody {
    pub(crate) fn into_chunks(self) -> Vec<GeminiChunk> {
        match self {
            Self::Many(chunks) => chunks,
            Self::One(chunk) => vec![chunk],
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiCandidate {
    #[serde(default)]
    pub(crate) content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub(crate) parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsePart {
    #[serde(default)]
    pub(crate) text: Option<String>,
    /// 思考内容标记
    #[serde(default)]
    pub(crate) thought: bool,
    #[serde(default, rename = "functionCall", alias = "function_call")]
    pub(crate) function_call: Option<ResponseFunctionCall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseFunctionCall {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub(crate) block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GeminiInlineError {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
}

impl GeminiInlineError {
    pub(crate) fn describe(&self) -> String {
        self.message
            .as_deref()
            .filter(|message| !message.is_empty())
            .or(self.status.as_deref().filter(|status| !status.is_empty()))
            .unwrap_or("Unknown Error")
            .to_string()
    }
}

/// Message shown for a safety block.
pub(crate) fn block_message(reason: &str) -> String {
    format!("Message is being blocked for reason: {reason}")
}

/// Arguments of a whole function call serialized back to the JSON text tools expect.
pub(crate) fn arguments_text(args: &Value) -> String {
    match args {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}
