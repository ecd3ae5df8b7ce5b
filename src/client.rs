use std::collections::HashMap;

use async_stream::stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::LLMError;
use crate::provider::{ChatStream, DynProvider};
use crate::tools::Toolset;
use crate::types::{
    CapabilityDescriptor, ChatEvent, ChatOutcome, ChatRequest, ChatResponse, Delta, FinalMessage,
};

/// LLM 调用入口 负责维护已注册的 Provider
pub struct LLMClient {
    providers: HashMap<String, DynProvider>,
}

impl LLMClient {
    /// 创建 Builder 便于后续注册 Provider
    pub fn builder() -> LLMClientBuilder {
        LLMClientBuilder {
            providers: HashMap::new(),
        }
    }

    /// 发起聊天 返回以唯一 `Finished` 事件结束的事件流
    ///
    /// Requests with `stream == false` issue one single-shot call and replay it as one
    /// delta followed by the terminal event. Every failure, including an unknown handle,
    /// is reported as `Finished(Errored)`.
    pub fn chat(
        &self,
        handle: &str,
        request: ChatRequest,
        toolset: Toolset,
        cancel: CancellationToken,
    ) -> ChatStream {
        let provider = match self.get_provider(handle) {
            Ok(provider) => provider,
            Err(err) => return finished(ChatOutcome::Errored(err)),
        };

        Box::pin(stream! {
            if request.config.stream {
                match provider.stream_chat(request, toolset, cancel).await {
                    Ok(mut events) => {
                        while let Some(event) = events.next().await {
                            yield event;
                        }
                    }
                    Err(err) => {
                        yield ChatEvent::Finished(ChatOutcome::Errored(err));
                    }
                }
            } else {
                if !toolset.is_empty() {
                    debug!(provider = provider.name(), "tools are not offered to single-shot chats");
                }
                match provider.chat(request, &cancel).await {
                    Ok(response) => {
                        let delta = Delta {
                            reasoning: response.reasoning.clone(),
                            content: Some(response.content.clone()),
                            tool_call_fragments: Vec::new(),
                        }
                        .normalized();
                        if !delta.is_empty() {
                            yield ChatEvent::Delta(delta);
                        }
                        yield ChatEvent::Finished(ChatOutcome::Completed(FinalMessage {
                            content: response.content,
                            reasoning: response.reasoning.unwrap_or_default(),
                            rounds: 1,
                        }));
                    }
                    Err(LLMError::Aborted { .. }) if cancel.is_cancelled() => {
                        yield ChatEvent::Finished(ChatOutcome::Cancelled);
                    }
                    Err(err) => {
                        yield ChatEvent::Finished(ChatOutcome::Errored(err));
                    }
                }
            }
        })
    }

    /// 发送非流式请求并等待完整响应
    pub async fn complete(
        &self,
        handle: &str,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LLMError> {
        let provider = self.get_provider(handle)?;
        provider.chat(request, cancel).await
    }

    /// 返回当前已注册的句柄
    pub fn handles(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }

    /// 查询指定句柄的能力描述
    pub fn capabilities(&self, handle: &str) -> Result<CapabilityDescriptor, LLMError> {
        let provider = self.get_provider(handle)?;
        Ok(provider.capabilities())
    }

    /// 返回所有支持工具调用的句柄列表
    pub fn handles_supporting_tools(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter_map(|(handle, provider)| {
                if provider.capabilities().supports_tools {
                    Some(handle.clone())
                } else {
                    None
                }
            })
            .collect()
    }

    fn get_provider(&self, handle: &str) -> Result<DynProvider, LLMError> {
        self.providers
            .get(handle)
            .cloned()
            .ok_or_else(|| LLMError::Validation {
                message: format!("unknown model handle: {handle}"),
            })
    }
}

/// 负责注册 Provider 的 Builder
pub struct LLMClientBuilder {
    providers: HashMap<String, DynProvider>,
}

impl LLMClientBuilder {
    /// 注册一个句柄对应的 Provider
    pub fn register_handle<S: Into<String>>(mut self, handle: S, provider: DynProvider) -> Self {
        self.providers.insert(handle.into(), provider);
        self
    }

    /// 构建最终的 LLMClient
    pub fn build(self) -> LLMClient {
        LLMClient {
            providers: self.providers,
        }
    }
}

fn finished(outcome: ChatOutcome) -> ChatStream {
    Box::pin(futures_util::stream::once(async move {
        ChatEvent::Finished(outcome)
    }))
}

/// Drains a chat stream and returns its terminal outcome.
///
/// A stream that ends without `Finished` is reported as an `Unknown` error.
pub async fn wait_for_outcome(mut events: ChatStream) -> ChatOutcome {
    while let Some(event) = events.next().await {
        if let ChatEvent::Finished(outcome) = event {
            return outcome;
        }
    }
    ChatOutcome::Errored(LLMError::Unknown {
        message: "chat stream ended without a terminal event".to_string(),
    })
}
