#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use serde_json::Value;
use thinkstream::LLMError;
use thinkstream::http::{
    HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse, HttpTransport,
};
use thinkstream::tools::ToolExecutor;

/// One canned reply: status plus the body split into the chunks the server would flush.
pub struct Reply {
    pub status: u16,
    pub chunks: Vec<String>,
    /// Keep the body open after the last chunk, like a stalled upstream.
    pub hold_open: bool,
}

impl Reply {
    pub fn ok<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self {
            status: 200,
            chunks: chunks.into_iter().map(Into::into).collect(),
            hold_open: false,
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            chunks: vec![body.into()],
            hold_open: false,
        }
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// In-memory transport replaying scripted replies and recording every request.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<Vec<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.requests()
            .iter()
            .map(|request| request.json_body().expect("json request body"))
            .collect()
    }

    fn next_reply(&self, request: HttpRequest) -> Reply {
        self.requests.lock().unwrap().push(request);
        let mut replies = self.replies.lock().unwrap();
        assert!(!replies.is_empty(), "unexpected extra request");
        replies.remove(0)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, LLMError> {
        let reply = self.next_reply(request);
        Ok(HttpResponse {
            status: reply.status,
            headers: HashMap::new(),
            body: reply.chunks.concat().into_bytes(),
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, LLMError> {
        let reply = self.next_reply(request);
        let chunks: Vec<Result<Vec<u8>, LLMError>> = reply
            .chunks
            .into_iter()
            .map(|chunk| Ok(chunk.into_bytes()))
            .collect();
        let mut body: HttpBodyStream = Box::pin(stream::iter(chunks));
        if reply.hold_open {
            body = Box::pin(body.chain(stream::pending()));
        }
        Ok(HttpStreamResponse {
            status: reply.status,
            headers: HashMap::new(),
            body,
        })
    }
}

/// Executor answering `name(arguments)` and failing for `broken`.
pub struct EchoTools;

#[async_trait]
impl ToolExecutor for EchoTools {
    async fn execute(&self, name: &str, arguments: &str) -> Result<String, LLMError> {
        if name == "broken" {
            return Err(LLMError::Unknown {
                message: "tool crashed".to_string(),
            });
        }
        Ok(format!("{name}({arguments})"))
    }
}

/// Formats one SSE event.
pub fn sse(data: &str) -> String {
    format!("data: {data}\n\n")
}
