use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capabilities::ModelProfile;
use crate::config::ProviderKind;
use crate::error::LLMError;
use crate::http::{DynHttpTransport, HttpResponse, json_request, retry_after};
use crate::provider::{ChatStream, LLMProvider, send_single_shot};
use crate::session::{DEFAULT_MAX_TOOL_ROUNDS, SessionPlan, StreamSession};
use crate::stream::FrameFormat;
use crate::tools::{DynContentPreprocessor, PassThrough, Toolset, preprocess_messages};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse};

use super::error::parse_gemini_error;
use super::request::build_gemini_payload;
use super::response::map_response;
use super::stream::GeminiDialect;
use super::types::{DEFAULT_SAFETY_THRESHOLD, GeminiPayload};

/// Google Gemini GenerateContent provider implementation.
pub struct GoogleGeminiProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) default_model: Option<String>,
    pub(crate) safety_threshold: String,
    pub(crate) sse: bool,
    pub(crate) preprocessor: DynContentPreprocessor,
    pub(crate) max_tool_rounds: usize,
}

impl GoogleGeminiProvider {
    /// Creates a provider that targets the public Generative Language endpoint.
    pub fn new(transport: DynHttpTransport) -> Self {
        Self {
            transport,
            base_url: ProviderKind::GoogleGemini
                .profile()
                .app_base_url
                .to_string(),
            api_key: None,
            default_model: None,
            safety_threshold: DEFAULT_SAFETY_THRESHOLD.to_string(),
            sse: true,
            preprocessor: Arc::new(PassThrough),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }

    /// Overrides the base URL, making it easier to point at proxies.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Sent as `x-goog-api-key`; a same-origin proxy may inject it instead.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|key: &String| !key.is_empty());
        self
    }

    /// Sets a default model such as `gemini-2.5-flash` when the request omits one.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Threshold applied to every harm category, e.g. `BLOCK_NONE`.
    pub fn with_safety_threshold(mut self, threshold: impl Into<String>) -> Self {
        self.safety_threshold = threshold.into();
        self
    }

    /// Streams newline-delimited JSON instead of SSE when `false`.
    pub fn with_sse(mut self, sse: bool) -> Self {
        self.sse = sse;
        self
    }

    pub fn with_preprocessor(mut self, preprocessor: DynContentPreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    /// `…/v1beta/models/{model}:streamGenerateContent`, with `alt=sse` for SSE streams.
    ///
    /// The single-shot call uses the same method and reads the whole body.
    pub(crate) fn endpoint(&self, model: &str, sse: bool) -> String {
        let base = self.base_url.trim_end_matches('/');
        let model = model.trim_start_matches("models/");
        let mut url = if base.ends_with("/v1beta") {
            format!("{base}/models/{model}:streamGenerateContent")
        } else {
            format!("{base}/v1beta/models/{model}:streamGenerateContent")
        };
        if sse {
            url.push_str(if url.contains('?') { "&alt=sse" } else { "?alt=sse" });
        }
        url
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        if let Some(key) = &self.api_key {
            headers.insert("x-goog-api-key".to_string(), key.clone());
        }
        headers
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        Some(request.config.model.clone())
            .filter(|model| !model.is_empty())
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: "model is required for Google Gemini".to_string(),
            })
    }

    async fn build_payload(
        &self,
        request: &ChatRequest,
        model: &str,
        toolset: &Toolset,
    ) -> Result<GeminiPayload, LLMError> {
        let messages = preprocess_messages(self.preprocessor.as_ref(), &request.messages).await?;
        let payload = build_gemini_payload(
            &messages,
            &request.config,
            model,
            &toolset.definitions,
            &self.safety_threshold,
        );
        debug!(
            provider = self.name(),
            model,
            contents = payload.contents.len(),
            tools = toolset.definitions.len(),
            thinking = payload.generation_config.thinking_config.is_some(),
            "built chat payload"
        );
        Ok(payload)
    }

    fn ensure_success(&self, response: HttpResponse) -> Result<String, LLMError> {
        let status = response.status;
        let retry_after = retry_after(&response.headers);
        let text = response.into_string()?;
        if (200..300).contains(&status) {
            Ok(text)
        } else {
            Err(parse_gemini_error(status, &text, retry_after))
        }
    }
}

#[async_trait]
impl LLMProvider for GoogleGeminiProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let model = self.resolve_model(&request)?;
        let payload = self.build_payload(&request, &model, &Toolset::none()).await?;
        let endpoint = self.endpoint(&model, false);
        let http = json_request(endpoint.clone(), self.build_headers(), &payload)?;
        let timeout = ModelProfile::lookup(&model).request_timeout();
        let response = send_single_shot(self.transport.as_ref(), http, timeout, cancel).await?;
        let text = self.ensure_success(response)?;
        map_response(&text, endpoint)
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        toolset: Toolset,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let model = self.resolve_model(&request)?;
        let payload = self.build_payload(&request, &model, &toolset).await?;
        let dialect = GeminiDialect {
            endpoint: self.endpoint(&model, self.sse),
            headers: self.build_headers(),
            format: if self.sse {
                FrameFormat::ServerSentEvents
            } else {
                FrameFormat::JsonLines
            },
        };
        Ok(StreamSession::drive(SessionPlan {
            dialect: Arc::new(dialect),
            transport: self.transport.clone(),
            payload,
            connect_timeout: ModelProfile::lookup(&model).request_timeout(),
            toolset,
            max_tool_rounds: self.max_tool_rounds,
            cancel,
        }))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_image_input: true,
            supports_tools: true,
            supports_reasoning: true,
        }
    }

    fn name(&self) -> &'static str {
        "google_gemini"
    }
}
