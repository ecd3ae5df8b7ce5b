use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::LLMError;
use crate::http::{HttpRequest, json_request};
use crate::provider::render_inline_error;
use crate::session::StreamDialect;
use crate::stream::FrameFormat;
use crate::tools::ToolCallAssembler;
use crate::types::{Delta, ToolCall, ToolCallFragment, ToolResult};

use super::error::parse_compat_error;
use super::request::append_tool_messages;
use super::types::{CompatPayload, CompatStreamChunk, VendorQuirks, first_text_field, images_markdown};

/// Streaming half of the chat-completions dialect.
pub(crate) struct CompatDialect {
    pub(crate) quirks: &'static VendorQuirks,
    pub(crate) endpoint: String,
    pub(crate) headers: HashMap<String, String>,
}

impl StreamDialect for CompatDialect {
    type Payload = CompatPayload;

    fn name(&self) -> &'static str {
        self.quirks.name
    }

    fn frame_format(&self) -> FrameFormat {
        FrameFormat::ServerSentEvents
    }

    fn build_request(&self, payload: &CompatPayload) -> Result<HttpRequest, LLMError> {
        let mut headers = self.headers.clone();
        headers.insert("Accept".to_string(), "text/event-stream".to_string());
        json_request(self.endpoint.clone(), headers, payload)
    }

    fn parse_frame(&self, frame: &str, assembler: &mut ToolCallAssembler) -> Delta {
        parse_compat_frame(self.quirks, frame, assembler)
    }

    fn append_tool_round(
        &self,
        payload: &mut CompatPayload,
        calls: &[ToolCall],
        results: &[ToolResult],
    ) {
        append_tool_messages(payload, calls, results);
    }

    fn parse_error(&self, status: u16, body: &str, retry_after: Option<Duration>) -> LLMError {
        parse_compat_error(self.quirks.name, status, body, retry_after)
    }
}

/// Converts one chat-completions chunk into a delta, feeding tool fragments to `assembler`.
pub(crate) fn parse_compat_frame(
    quirks: &VendorQuirks,
    frame: &str,
    assembler: &mut ToolCallAssembler,
) -> Delta {
    let chunk: CompatStreamChunk = match serde_json::from_str(frame) {
        Ok(chunk) => chunk,
        Err(err) => {
            warn!(provider = quirks.name, error = %err, "skipping malformed frame");
            return Delta::default();
        }
    };

    if let Some(error) = chunk.error {
        let message = error.describe();
        debug!(provider = quirks.name, %message, "in-band error frame");
        return Delta::answer(render_inline_error(&message));
    }

    let choices = if quirks.sum_choices {
        &chunk.choices[..]
    } else {
        &chunk.choices[..chunk.choices.len().min(1)]
    };

    let mut delta = Delta::default();
    let mut reasoning = String::new();
    let mut content = String::new();

    for (position, choice) in choices.iter().enumerate() {
        let Some(wire) = &choice.delta else {
            continue;
        };
        if let Some(text) = first_text_field(&wire.extra, quirks.reasoning_fields) {
            reasoning.push_str(&text);
        }
        if let Some(text) = wire.content.as_deref() {
            content.push_str(text);
        }
        if quirks.stream_images {
            if let Some(images) = wire.images.as_deref().filter(|images| !images.is_empty()) {
                if !content.is_empty() {
                    content.push_str("\n\n");
                }
                content.push_str(&images_markdown(images));
            }
        }
        if position > 0 {
            continue;
        }
        for call in wire.tool_calls.iter().flatten() {
            let function = call.function.as_ref();
            let fragment = ToolCallFragment {
                index: if quirks.trust_wire_index {
                    call.index
                } else {
                    None
                },
                id: call.id.clone(),
                name: function.and_then(|f| f.name.clone()),
                arguments: function.and_then(|f| f.arguments.clone()),
            };
            assembler.push(fragment.clone());
            delta.tool_call_fragments.push(fragment);
        }
    }

    delta.reasoning = Some(reasoning);
    delta.content = Some(content);
    delta.normalized()
}
