//! Line-level parsing of OpenAI-style chat completion streams.
//!
//! The wire format is server-sent events: `data: {json}` lines separated by
//! blank lines, terminated by `data: [DONE]`. Chunks from the socket may split
//! a line anywhere, so [`SseBuffer`] reassembles complete lines first.

use parley_service_traits::BackendError;

/// Result of processing a single SSE data payload.
#[derive(Debug, PartialEq, Eq)]
pub enum SseLineResult {
    /// Keep-alive, role-only delta, or a non-JSON payload.
    Skip,
    /// `[DONE]` sentinel.
    Done,
    /// Visible text to forward.
    Delta(String),
    /// The server reported an error inside the stream.
    Error(String),
}

/// Interpret one `data:` payload (prefix already stripped).
pub fn process_sse_data(data: &str) -> SseLineResult {
    if data == "[DONE]" {
        return SseLineResult::Done;
    }

    let Ok(evt) = serde_json::from_str::<serde_json::Value>(data) else {
        return SseLineResult::Skip;
    };

    if let Some(error) = evt.get("error") {
        let message = error["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return SseLineResult::Error(message);
    }

    match evt["choices"][0]["delta"]["content"].as_str() {
        Some(content) if !content.is_empty() => SseLineResult::Delta(content.to_string()),
        _ => SseLineResult::Skip,
    }
}

/// Strip the `data:` field name from a trimmed SSE line.
fn data_field(line: &str) -> Option<&str> {
    line.strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))
}

/// Accumulates raw bytes and yields parsed results per complete line.
///
/// Lines are decoded only once complete so a multi-byte character split
/// across socket reads survives intact.
#[derive(Debug, Default)]
pub struct SseBuffer {
    buf: Vec<u8>,
}

impl SseBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseLineResult> {
        self.buf.extend_from_slice(chunk);

        let mut results = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);

            if let Some(data) = data_field(line.trim()) {
                results.push(process_sse_data(data));
            }
        }
        results
    }

    /// Flush a trailing line that arrived without a newline before EOF.
    pub fn finish(&mut self) -> Option<SseLineResult> {
        let raw = std::mem::take(&mut self.buf);
        let line = String::from_utf8_lossy(&raw);
        data_field(line.trim()).map(process_sse_data)
    }
}

/// Map a transport error onto the retry classification.
pub fn classify_reqwest_error(error: &reqwest::Error) -> BackendError {
    let message = error.to_string();
    if error.is_connect() && error.is_timeout() {
        BackendError::ConnectTimeout(message)
    } else if error.is_connect() {
        BackendError::Connect(message)
    } else if error.is_timeout() {
        BackendError::Timeout(message)
    } else if error.is_decode() || error.is_body() {
        BackendError::Protocol(message)
    } else {
        BackendError::Other(message)
    }
}
