//! Wire decoder turning a raw HTTP body into discrete protocol frames.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use tracing::warn;

use crate::error::LLMError;
use crate::http::HttpBodyStream;

/// Framing used by a vendor's streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// `data: <payload>` records separated by blank lines, terminated by `[DONE]`.
    ServerSentEvents,
    /// One JSON object per line, or objects wrapped in a top-level array.
    JsonLines,
}

/// Decoded protocol record yielded by [`StreamDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    /// Opaque payload with the envelope stripped.
    Data(String),
    /// Terminal marker reported via `[DONE]`.
    Done,
}

/// Normalizes a vendor body stream into [`WireFrame`] values.
///
/// Records split across network reads are buffered until their boundary arrives. A
/// record that is not valid UTF-8 is logged and skipped; only transport failures are
/// surfaced as errors, after which the decoder ends.
pub struct StreamDecoder {
    body: HttpBodyStream,
    format: FrameFormat,
    buffer: Vec<u8>,
    data_lines: Vec<Vec<u8>>,
    json: JsonScanner,
    layout: JsonLayout,
    pending: VecDeque<Result<WireFrame, LLMError>>,
    provider: &'static str,
    stream_closed: bool,
    done_received: bool,
}

/// Shape of a `JsonLines` body, decided by its first non-whitespace byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JsonLayout {
    Undecided,
    /// Newline-delimited objects; each non-empty line is one frame.
    Lines,
    /// A top-level `[ {...}, {...} ]` array streamed piecewise.
    Array,
}

#[derive(Default)]
struct JsonScanner {
    current: Vec<u8>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl StreamDecoder {
    /// Wraps a raw HTTP body stream and prepares it for decoding.
    pub fn new(body: HttpBodyStream, format: FrameFormat, provider: &'static str) -> Self {
        Self {
            body,
            format,
            buffer: Vec::new(),
            data_lines: Vec::new(),
            json: JsonScanner::default(),
            layout: JsonLayout::Undecided,
            pending: VecDeque::new(),
            provider,
            stream_closed: false,
            done_received: false,
        }
    }

    /// Whether the `[DONE]` sentinel has been observed.
    pub fn done_received(&self) -> bool {
        self.done_received
    }

    fn ingest(&mut self, bytes: &[u8]) {
        match self.format {
            FrameFormat::ServerSentEvents => {
                self.buffer.extend_from_slice(bytes);
                while let Some(line) = Self::drain_line(&mut self.buffer) {
                    if line.is_empty() {
                        self.flush_event();
                    } else {
                        self.handle_line(line);
                    }
                }
            }
            FrameFormat::JsonLines => self.ingest_json(bytes),
        }
    }

    fn ingest_json(&mut self, bytes: &[u8]) {
        let mut bytes = bytes;
        if self.layout == JsonLayout::Undecided {
            let Some(start) = bytes.iter().position(|b| !b.is_ascii_whitespace()) else {
                return;
            };
            bytes = &bytes[start..];
            self.layout = if bytes[0] == b'[' {
                JsonLayout::Array
            } else {
                JsonLayout::Lines
            };
        }

        match self.layout {
            JsonLayout::Array => self.scan_json(bytes),
            JsonLayout::Lines | JsonLayout::Undecided => {
                self.buffer.extend_from_slice(bytes);
                while let Some(line) = Self::drain_line(&mut self.buffer) {
                    self.push_json_line(line);
                }
            }
        }
    }

    /// One frame per non-blank line, whether or not it parses.
    fn push_json_line(&mut self, line: Vec<u8>) {
        if line.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        if let Some(data) = self.decode_utf8(line) {
            self.pending
                .push_back(Ok(WireFrame::Data(data.trim().to_string())));
        }
    }

    fn finish(&mut self) {
        match self.format {
            FrameFormat::ServerSentEvents => {
                if !self.buffer.is_empty() {
                    let line = std::mem::take(&mut self.buffer);
                    self.handle_line(line);
                }
                self.flush_event();
            }
            FrameFormat::JsonLines => {
                if !self.buffer.is_empty() {
                    let line = std::mem::take(&mut self.buffer);
                    self.push_json_line(line);
                }
                if !self.json.current.is_empty() {
                    warn!(
                        provider = self.provider,
                        bytes = self.json.current.len(),
                        "dropping truncated JSON frame at end of stream"
                    );
                    self.json = JsonScanner::default();
                }
            }
        }
    }

    fn handle_line(&mut self, line: Vec<u8>) {
        if let Some(rest) = line.strip_prefix(b"data:") {
            let data = rest.strip_prefix(b" ").unwrap_or(rest);
            self.data_lines.push(data.to_vec());
        }
        // `event:`, `id:`, `retry:` and `:` comment lines carry nothing we consume.
    }

    fn flush_event(&mut self) {
        if self.data_lines.is_empty() {
            return;
        }

        let mut joined = Vec::new();
        for (idx, mut segment) in self.data_lines.drain(..).enumerate() {
            if idx > 0 {
                joined.push(b'\n');
            }
            joined.append(&mut segment);
        }

        if joined.is_empty() || self.done_received {
            return;
        }

        let Some(data) = self.decode_utf8(joined) else {
            return;
        };

        if data.trim() == "[DONE]" {
            self.done_received = true;
            self.pending.push_back(Ok(WireFrame::Done));
        } else {
            self.pending.push_back(Ok(WireFrame::Data(data)));
        }
    }

    fn scan_json(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            let scanner = &mut self.json;
            if scanner.depth == 0 {
                // Array brackets, separators and whitespace between objects are framing.
                if byte == b'{' {
                    scanner.depth = 1;
                    scanner.current.push(byte);
                }
                continue;
            }

            scanner.current.push(byte);
            if scanner.in_string {
                if scanner.escaped {
                    scanner.escaped = false;
                } else if byte == b'\\' {
                    scanner.escaped = true;
                } else if byte == b'"' {
                    scanner.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => scanner.in_string = true,
                b'{' | b'[' => scanner.depth += 1,
                b'}' | b']' => {
                    scanner.depth -= 1;
                    if scanner.depth == 0 {
                        let object = std::mem::take(&mut scanner.current);
                        if let Some(data) = self.decode_utf8(object) {
                            self.pending.push_back(Ok(WireFrame::Data(data)));
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn decode_utf8(&self, bytes: Vec<u8>) -> Option<String> {
        match String::from_utf8(bytes) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(provider = self.provider, error = %err, "skipping frame with invalid UTF-8");
                None
            }
        }
    }

    fn drain_line(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
        buffer.iter().position(|b| *b == b'\n').map(|pos| {
            let mut line: Vec<u8> = buffer.drain(..=pos).collect();
            if line.last() == Some(&b'\n') {
                line.pop();
            }
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            line
        })
    }
}

impl Stream for StreamDecoder {
    type Item = Result<WireFrame, LLMError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(frame) = this.pending.pop_front() {
                return Poll::Ready(Some(frame));
            }

            if this.done_received || this.stream_closed {
                return Poll::Ready(None);
            }

            match this.body.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => this.ingest(&bytes),
                Poll::Ready(Some(Err(err))) => {
                    this.stream_closed = true;
                    return Poll::Ready(Some(Err(err)));
                }
                Poll::Ready(None) => {
                    this.stream_closed = true;
                    this.finish();
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Drains an entire body, used to build rich errors from non-2xx streaming responses.
pub(crate) async fn collect_stream_text(
    mut body: HttpBodyStream,
    provider: &'static str,
) -> Result<String, LLMError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = body.next().await {
        bytes.extend_from_slice(&chunk?);
    }
    String::from_utf8(bytes).map_err(|err| LLMError::Provider {
        provider,
        message: format!("failed to decode stream error body: {err}"),
    })
}
