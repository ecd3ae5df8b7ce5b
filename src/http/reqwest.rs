use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, RequestBuilder};
use tracing::{debug, warn};

use crate::error::LLMError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpMethod, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

/// Streams can stay idle for minutes while a reasoning model thinks.
const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

/// 基于 reqwest 的默认 HttpTransport
///
/// Single-shot requests honor [`HttpRequest::timeout`] for the whole exchange. Streaming
/// requests only bound the connect phase, which the session enforces itself, so that a
/// long answer is never cut off mid-body.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 使用自定义 reqwest::Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// 创建带 keep-alive 与 User-Agent 的默认客户端
    pub fn default_client() -> Result<Self, LLMError> {
        Client::builder()
            .tcp_keepalive(TCP_KEEPALIVE)
            .user_agent(concat!("thinkstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map(Self::new)
            .map_err(|err| LLMError::transport(format!("failed to create reqwest client: {err}")))
    }

    fn prepare(&self, request: HttpRequest, whole_timeout: bool) -> Result<RequestBuilder, LLMError> {
        let method = match request.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };
        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(header_map(request.headers)?);
        if let Some(timeout) = request.timeout.filter(|_| whole_timeout) {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        Ok(builder)
    }
}

fn header_map(headers: HashMap<String, String>) -> Result<HeaderMap, LLMError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| LLMError::transport(format!("invalid header name `{name}`: {err}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|err| LLMError::transport(format!("invalid header value for {name}: {err}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Header names are lower-cased by reqwest; non-UTF-8 values become empty strings.
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

fn send_error(err: reqwest::Error, timeout: Option<Duration>) -> LLMError {
    match timeout {
        Some(after) if err.is_timeout() => LLMError::Timeout { after },
        _ if err.is_connect() => LLMError::transport(format!("connection failed: {err}")),
        _ => LLMError::transport(err.to_string()),
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let timeout = request.timeout;
        debug!(url = %request.url, ?timeout, "sending request");
        let response = self
            .prepare(request, true)?
            .send()
            .await
            .map_err(|err| send_error(err, timeout))?;

        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| send_error(err, timeout))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        debug!(url = %request.url, "opening stream");
        let response = self
            .prepare(request, false)?
            .send()
            .await
            .map_err(|err| send_error(err, None))?;

        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let body: HttpBodyStream = Box::pin(response.bytes_stream().map(|chunk| {
            chunk.map(|bytes| bytes.to_vec()).map_err(|err| {
                warn!(error = %err, "stream body interrupted");
                LLMError::transport(format!("stream interrupted: {err}"))
            })
        }));

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// 便捷构造线程安全 Transport
pub fn default_dyn_transport() -> Result<DynHttpTransport, LLMError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
