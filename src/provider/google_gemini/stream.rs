use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LLMError;
use crate::http::{HttpRequest, json_request};
use crate::provider::render_inline_error;
use crate::session::StreamDialect;
use crate::stream::FrameFormat;
use crate::tools::ToolCallAssembler;
use crate::types::{Delta, ToolCall, ToolResult};

use super::error::parse_gemini_error;
use super::request::append_tool_contents;
use super::types::{GeminiChunk, GeminiPayload, arguments_text, block_message};

/// Streaming half of the Gemini dialect.
pub(crate) struct GeminiDialect {
    pub(crate) endpoint: String,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) format: FrameFormat,
}

impl StreamDialect for GeminiDialect {
    type Payload = GeminiPayload;

    fn name(&self) -> &'static str {
        "google_gemini"
    }

    fn frame_format(&self) -> FrameFormat {
        self.format
    }

    fn build_request(&self, payload: &GeminiPayload) -> Result<HttpRequest, LLMError> {
        json_request(self.endpoint.clone(), self.headers.clone(), payload)
    }

    fn parse_frame(&self, frame: &str, assembler: &mut ToolCallAssembler) -> Delta {
        parse_gemini_frame(frame, assembler)
    }

    fn append_tool_round(
        &self,
        payload: &mut GeminiPayload,
        calls: &[ToolCall],
        results: &[ToolResult],
    ) {
        append_tool_contents(payload, calls, results);
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<Duration>) -> LLMError {
        parse_gemini_error(status, body, retry_after)
    }
}

/// Converts one GenerateContent chunk into a delta.
///
/// `functionCall` parts arrive whole and are recorded on `assembler` with generated ids.
/// A safety block mid-stream is rendered into the answer like any in-band error.
pub(crate) fn parse_gemini_frame(frame: &str, assembler: &mut ToolCallAssembler) -> Delta {
    let chunk: GeminiChunk = match serde_json::from_str(frame) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!(provider = "google_gemini", error = %err, "skipping malformed frame");
            return Delta::default();
        }
    };

    if let Some(error) = &chunk.error {
        let message = error.describe();
        debug!(provider = "google_gemini", %message, "in-band error frame");
        return Delta::answer(render_inline_error(&message));
    }
    if let Some(reason) = chunk.block_reason() {
        warn!(provider = "google_gemini", reason, "prompt blocked");
        return Delta::answer(render_inline_error(&block_message(reason)));
    }

    let mut reasoning = String::new();
    let mut content = String::new();
    for part in chunk.parts() {
        if let Some(call) = &part.function_call {
            assembler.push_complete(None, call.name.clone(), arguments_text(&call.args));
        }
        let Some(text) = part.text.as_deref() else {
            continue;
        };
        if part.thought {
            reasoning.push_str(text);
        } else {
            content.push_str(text);
        }
    }

    Delta {
        reasoning: Some(reasoning),
        content: Some(content),
        tool_call_fragments: Vec::new(),
    }
    .normalized()
}
