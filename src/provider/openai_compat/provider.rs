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
use crate::tools::{DynContentPreprocessor, PassThrough, Toolset, preprocess_messages};
use crate::types::{CapabilityDescriptor, ChatRequest, ChatResponse, Message};

use super::error::parse_compat_error;
use super::request::build_compat_payload;
use super::response::map_response;
use super::stream::CompatDialect;
use super::types::{CompatPayload, CompatVendor, VendorQuirks};

/// Provider for vendors speaking the OpenAI chat-completions dialect.
pub struct OpenAiCompatProvider {
    pub(crate) transport: DynHttpTransport,
    pub(crate) vendor: CompatVendor,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) default_model: Option<String>,
    pub(crate) preprocessor: DynContentPreprocessor,
    pub(crate) max_tool_rounds: usize,
    pub(crate) extra_headers: HashMap<String, String>,
}

impl OpenAiCompatProvider {
    /// 创建指向供应商公开地址的 Provider
    pub fn new(transport: DynHttpTransport, vendor: CompatVendor) -> Self {
        Self {
            transport,
            vendor,
            base_url: ProviderKind::from(vendor).profile().app_base_url.to_string(),
            api_key: None,
            default_model: None,
            preprocessor: Arc::new(PassThrough),
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            extra_headers: HashMap::new(),
        }
    }

    /// 自定义 base_url
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 设置 Bearer 凭证 代理模式下可省略
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into()).filter(|key: &String| !key.is_empty());
        self
    }

    /// 设置默认模型
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
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

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn vendor(&self) -> CompatVendor {
        self.vendor
    }

    fn quirks(&self) -> &'static VendorQuirks {
        self.vendor.quirks()
    }

    pub(crate) fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn build_headers(&self) -> HashMap<String, String> {
        let mut headers = self.extra_headers.clone();
        if let Some(key) = &self.api_key {
            headers.insert("Authorization".to_string(), format!("Bearer {key}"));
        }
        headers
    }

    fn resolve_model(&self, request: &ChatRequest) -> Result<String, LLMError> {
        Some(request.config.model.clone())
            .filter(|model| !model.is_empty())
            .or_else(|| self.default_model.clone())
            .ok_or_else(|| LLMError::Validation {
                message: format!("model is required for {}", self.name()),
            })
    }

    async fn build_payload(
        &self,
        request: &ChatRequest,
        toolset: &Toolset,
        stream: bool,
    ) -> Result<CompatPayload, LLMError> {
        let model = self.resolve_model(request)?;
        let messages: Vec<Message> =
            preprocess_messages(self.preprocessor.as_ref(), &request.messages).await?;
        let payload = build_compat_payload(
            self.quirks(),
            &messages,
            &request.config,
            &model,
            &toolset.definitions,
            stream,
        );
        debug!(
            provider = self.name(),
            model = %payload.model,
            messages = payload.messages.len(),
            tools = payload.tools.len(),
            max_tokens = ?payload.max_tokens,
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
            Err(parse_compat_error(self.name(), status, &text, retry_after))
        }
    }
}

#[async_trait]
impl LLMProvider for OpenAiCompatProvider {
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let payload = self.build_payload(&request, &Toolset::none(), false).await?;
        let timeout = self
            .quirks()
            .fixed_timeout
            .unwrap_or_else(|| ModelProfile::lookup(&payload.model).request_timeout());
        let http = json_request(self.endpoint(), self.build_headers(), &payload)?;
        let response = send_single_shot(self.transport.as_ref(), http, timeout, cancel).await?;
        let text = self.ensure_success(response)?;
        map_response(self.quirks(), &text, self.endpoint())
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        toolset: Toolset,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError> {
        let payload = self.build_payload(&request, &toolset, true).await?;
        let connect_timeout = ModelProfile::lookup(&payload.model).request_timeout();
        let dialect = CompatDialect {
            quirks: self.quirks(),
            endpoint: self.endpoint(),
            headers: self.build_headers(),
        };
        Ok(StreamSession::drive(SessionPlan {
            dialect: Arc::new(dialect),
            transport: self.transport.clone(),
            payload,
            connect_timeout,
            toolset,
            max_tool_rounds: self.max_tool_rounds,
            cancel,
        }))
    }

    fn capabilities(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            supports_stream: true,
            supports_image_input: !self.quirks().text_only_history,
            supports_tools: true,
            supports_reasoning: true,
        }
    }

    fn name(&self) -> &'static str {
        self.quirks().name
    }
}
