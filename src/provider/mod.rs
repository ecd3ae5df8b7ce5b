use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::LLMError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use crate::tools::Toolset;
use crate::types::{CapabilityDescriptor, ChatEvent, ChatRequest, ChatResponse};

pub mod google_gemini;
pub mod openai_compat;

/// 流式事件别名 以唯一的 `ChatEvent::Finished` 结束
pub type ChatStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

/// 统一的 Provider Trait 所有供应商实现该接口即可接入
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// 提交完整请求并等待完整响应 超时由模型决定
    async fn chat(
        &self,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, LLMError>;

    /// 以流式方式返回增量事件 包含工具调用轮次
    ///
    /// 失败只在构造请求阶段以 `Err` 返回 之后的错误通过 `ChatOutcome::Errored` 报告
    async fn stream_chat(
        &self,
        request: ChatRequest,
        toolset: Toolset,
        cancel: CancellationToken,
    ) -> Result<ChatStream, LLMError>;

    /// 描述支持的能力范围
    fn capabilities(&self) -> CapabilityDescriptor;

    /// 供应商名称
    fn name(&self) -> &'static str;
}

/// 线程安全 Provider
pub type DynProvider = Arc<dyn LLMProvider>;

/// 发送非流式请求 同时响应取消与超时
pub(crate) async fn send_single_shot(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<HttpResponse, LLMError> {
    let request = request.with_timeout(Some(timeout));
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LLMError::Aborted {
            message: "chat cancelled by caller".to_string(),
        }),
        result = tokio::time::timeout(timeout, transport.send(request)) => match result {
            Ok(response) => response,
            Err(_) => Err(LLMError::Timeout { after: timeout }),
        },
    }
}

/// 将流中携带的错误渲染为可直接展示的正文
pub(crate) fn render_inline_error(message: &str) -> String {
    format!("\n\n> [!ERROR]\n> {message}")
}
