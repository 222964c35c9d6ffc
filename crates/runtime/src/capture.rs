//! Output Capture & Reconstruction
//!
//! A [`CaptureSink`] stands in for the socket a legacy handler believes it is
//! writing to. Written chunks are classified as status-line framing, header
//! text, blank separators or body content; only body content is kept. Once
//! the handler returns, [`CaptureSink::reconstruct`] reduces what was kept
//! to a [`StructuredResponse`].

use devshim_protocol::{StructuredResponse, DEFAULT_CONTENT_TYPE, EMPTY_JSON_BODY};
use std::collections::BTreeMap;

/// Status reported when a handler never calls `send_response`
pub const DEFAULT_STATUS: u16 = 200;

/// Prefix identifying a status line
const STATUS_LINE_PREFIX: &str = "HTTP/";

/// Header consulted for the response content type
const CONTENT_TYPE_HEADER: &str = "Content-Type";

/// How a written chunk was treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkClass {
    /// `HTTP/...` framing, discarded
    StatusLine,
    /// Free-text `Key: Value`, discarded
    HeaderLine,
    /// Empty or line-ending only, discarded
    Blank,
    /// Appended to the body accumulator
    Body,
    /// Matched nothing, silently dropped
    Dropped,
}

impl ChunkClass {
    /// Whether the chunk ended up in the body accumulator
    pub fn is_body(&self) -> bool {
        matches!(self, ChunkClass::Body)
    }
}

/// Classify one written chunk. First match wins.
///
/// Decoding here is for classification only and drops bytes that are not
/// valid UTF-8.
pub fn classify(chunk: &[u8], headers_complete: bool) -> ChunkClass {
    let text = decode_ignoring_invalid(chunk);
    let stripped = text.trim();

    if stripped.starts_with(STATUS_LINE_PREFIX) {
        return ChunkClass::StatusLine;
    }
    if stripped.contains(':') && !starts_like_json(stripped) {
        return ChunkClass::HeaderLine;
    }
    if chunk.iter().all(|byte| is_blank_byte(*byte)) {
        return ChunkClass::Blank;
    }
    if starts_like_json(stripped) || headers_complete {
        return ChunkClass::Body;
    }
    ChunkClass::Dropped
}

/// ASCII whitespace including vertical tab, the same set `trim` strips
fn is_blank_byte(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == 0x0b
}

/// Write target substituted for a handler's socket.
///
/// Single use: one sink per request, read once after the handler returns.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
    headers_complete: bool,
}

impl Default for CaptureSink {
    fn default() -> Self {
        Self {
            status: DEFAULT_STATUS,
            headers: BTreeMap::new(),
            body: Vec::new(),
            headers_complete: false,
        }
    }
}

impl CaptureSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the response status
    pub fn send_response(&mut self, code: u16) {
        self.status = code;
    }

    /// Record a header; the last value written for a key wins
    pub fn send_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(key.into(), value.into());
    }

    /// Signal that headers are complete; later chunks are accepted as body
    pub fn end_headers(&mut self) {
        self.headers_complete = true;
    }

    /// Accept a chunk the way a socket would. Never fails.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> ChunkClass {
        let chunk = chunk.as_ref();
        let class = classify(chunk, self.headers_complete);
        if class.is_body() {
            self.body.extend_from_slice(chunk);
        }
        class
    }

    /// Sockets need flushing; the sink does not.
    pub fn flush(&mut self) {}

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look a header up. An exact key wins; otherwise the first key in
    /// sorted order that matches ignoring ASCII case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .or_else(|| {
                self.headers
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, value)| value)
            })
            .map(String::as_str)
    }

    /// Accumulated body bytes, exactly as written
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn headers_complete(&self) -> bool {
        self.headers_complete
    }

    /// Reduce the captured output to a structured response.
    ///
    /// The body is the leftmost `{` through the rightmost `}` of the trimmed
    /// accumulator, else the trimmed accumulator, else `{}`. The span is not
    /// re-validated as JSON.
    pub fn reconstruct(self) -> StructuredResponse {
        let text = decode_ignoring_invalid(&self.body);
        let stripped = text.trim();

        let body = match json_object_span(stripped) {
            Some(span) => span,
            None if !stripped.is_empty() => stripped,
            None => EMPTY_JSON_BODY,
        };

        let content_type = self
            .header(CONTENT_TYPE_HEADER)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        StructuredResponse::new(self.status, content_type, body.as_bytes().to_vec())
    }
}

/// Leftmost `{` to rightmost `}` after it
fn json_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn starts_like_json(text: &str) -> bool {
    text.starts_with('{') || text.starts_with('[')
}

/// UTF-8 decode that skips invalid sequences instead of replacing them
pub(crate) fn decode_ignoring_invalid(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        decoded.push_str(chunk.valid());
    }
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_framing() {
        assert_eq!(classify(b"HTTP/1.1 200 OK\r\n", false), ChunkClass::StatusLine);
        assert_eq!(classify(b"  HTTP/1.0 404\n", true), ChunkClass::StatusLine);
        assert_eq!(
            classify(b"Content-Type: application/json\r\n", false),
            ChunkClass::HeaderLine
        );
        assert_eq!(classify(b"\r\n", false), ChunkClass::Blank);
        assert_eq!(classify(b"", true), ChunkClass::Blank);
        assert_eq!(classify(b"  \n", true), ChunkClass::Blank);
    }

    #[test]
    fn test_classify_body() {
        assert_eq!(classify(br#"{"ok": true}"#, false), ChunkClass::Body);
        assert_eq!(classify(b"[1, 2]", false), ChunkClass::Body);
        assert_eq!(classify(b"plain text", false), ChunkClass::Dropped);
        assert_eq!(classify(b"plain text", true), ChunkClass::Body);
        // Colon wins over the headers-complete flag for non-JSON text.
        assert_eq!(classify(b"time: 12:00", true), ChunkClass::HeaderLine);
    }

    #[test]
    fn test_classify_vertical_tab_as_blank() {
        assert_eq!(classify(b"\x0b", false), ChunkClass::Blank);
        assert_eq!(classify(b"\x0b\r\n", true), ChunkClass::Blank);

        let mut sink = CaptureSink::new();
        sink.end_headers();
        assert_eq!(sink.write(b"\x0b"), ChunkClass::Blank);
        assert!(sink.body().is_empty());
    }

    #[test]
    fn test_classify_ignores_invalid_utf8() {
        assert_eq!(classify(b"\xff\xfe{\"a\": 1}", false), ChunkClass::Body);
        assert_eq!(classify(b"\xff\xfe", false), ChunkClass::Dropped);
    }

    #[test]
    fn test_framed_response() {
        let mut sink = CaptureSink::new();
        sink.write("HTTP/1.1 200 OK\r\n");
        sink.write("Content-Type: application/json\r\n");
        sink.write("\r\n");
        sink.write(r#"{"ok": true}"#);

        let response = sink.reconstruct();
        assert_eq!(response.status(), 200);
        assert_eq!(response.content_type(), "application/json");
        assert_eq!(response.body(), br#"{"ok": true}"#);
    }

    #[test]
    fn test_empty_output_defaults() {
        let response = CaptureSink::new().reconstruct();
        assert_eq!(response.status(), 200);
        assert_eq!(response.body(), b"{}");
        assert_eq!(response.content_type(), "application/json");
    }

    #[test]
    fn test_explicit_status_and_headers() {
        let mut sink = CaptureSink::new();
        sink.send_response(201);
        sink.send_header("content-type", "text/plain");
        sink.send_header("content-type", "application/vnd.api+json");
        sink.end_headers();
        sink.write("created");

        assert!(sink.headers_complete());
        assert_eq!(sink.headers().len(), 1);
        let response = sink.reconstruct();
        assert_eq!(response.status(), 201);
        assert_eq!(response.content_type(), "application/vnd.api+json");
        assert_eq!(response.body(), b"created");
    }

    #[test]
    fn test_content_type_prefers_exact_key() {
        for order in [["content-type", "Content-Type"], ["Content-Type", "content-type"]] {
            let mut sink = CaptureSink::new();
            for key in order {
                let value = if key == "Content-Type" { "text/csv" } else { "text/plain" };
                sink.send_header(key, value);
            }
            sink.write(r#"{"rows": 2}"#);

            assert_eq!(sink.headers().len(), 2);
            assert_eq!(sink.reconstruct().content_type(), "text/csv");
        }

        let mut sink = CaptureSink::new();
        sink.send_header("content-type", "text/plain");
        sink.send_header("CONTENT-TYPE", "text/html");
        assert_eq!(sink.header("Content-Type"), Some("text/html"));
    }

    #[test]
    fn test_text_before_end_headers_is_dropped() {
        let mut sink = CaptureSink::new();
        assert_eq!(sink.write("warming up"), ChunkClass::Dropped);
        sink.end_headers();
        assert_eq!(sink.write(r#"{"late": 1}"#), ChunkClass::Body);
        assert_eq!(sink.reconstruct().body(), br#"{"late": 1}"#);
    }

    #[test]
    fn test_json_span_is_greedy() {
        let mut sink = CaptureSink::new();
        sink.end_headers();
        sink.write("prefix ");
        sink.write("{\"a\": {\"b\": 1}} trailing } tail");
        let response = sink.reconstruct();
        assert_eq!(response.body(), b"{\"a\": {\"b\": 1}} trailing }");
    }

    #[test]
    fn test_array_body_passes_through() {
        let mut sink = CaptureSink::new();
        sink.write("  [1, 2, 3]\n");
        assert_eq!(sink.body(), b"  [1, 2, 3]\n");
        assert_eq!(sink.reconstruct().body(), b"[1, 2, 3]");
    }

    #[test]
    fn test_split_json_object() {
        let mut sink = CaptureSink::new();
        sink.write("HTTP/1.1 200 OK\r\n");
        sink.end_headers();
        sink.write("{\"items\": [");
        sink.write("1, 2");
        sink.write("]}\n");
        let value: serde_json::Value = sink.reconstruct().body_json();
        assert_eq!(value, serde_json::json!({"items": [1, 2]}));
    }

    #[test]
    fn test_malformed_json_passes_through() {
        let mut sink = CaptureSink::new();
        sink.write("{not json}");
        let response = sink.reconstruct();
        assert_eq!(response.body(), b"{not json}");
        assert_eq!(response.content_type(), "application/json");
    }
}
