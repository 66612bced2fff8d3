//! Streaming output types

use serde::{Deserialize, Serialize};

/// One unit of the reply delivered to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextChunk {
    /// Assistant text as it arrives from the provider
    Text { text: String },
    /// Terminal error marker; nothing follows it
    Error { message: String },
}

impl TextChunk {
    /// Create a text chunk
    pub fn text(text: impl Into<String>) -> Self {
        TextChunk::Text { text: text.into() }
    }

    /// Create an error chunk
    pub fn error(message: impl Into<String>) -> Self {
        TextChunk::Error {
            message: message.into(),
        }
    }

    /// Check if this is an error chunk
    pub fn is_error(&self) -> bool {
        matches!(self, TextChunk::Error { .. })
    }

    /// Get the text content if this is a text chunk
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TextChunk::Text { text } => Some(text),
            TextChunk::Error { .. } => None,
        }
    }

    /// Render as one line of the data-stream protocol.
    ///
    /// Text parts use the `0:` prefix, errors the `3:` prefix; the payload is a
    /// JSON string so embedded newlines never break the framing.
    pub fn to_data_stream_line(&self) -> String {
        let (code, payload) = match self {
            TextChunk::Text { text } => ('0', text),
            TextChunk::Error { message } => ('3', message),
        };
        let encoded = serde_json::Value::String(payload.clone()).to_string();
        format!("{}:{}\n", code, encoded)
    }
}

/// Concatenate the text of a chunk sequence, ignoring error markers
pub fn collect_text<'a>(chunks: impl IntoIterator<Item = &'a TextChunk>) -> String {
    chunks.into_iter().filter_map(TextChunk::as_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_chunk() {
        let chunk = TextChunk::text("Hello");
        assert!(!chunk.is_error());
        assert_eq!(chunk.as_text(), Some("Hello"));
    }

    #[test]
    fn test_error_chunk_serialization() {
        let chunk = TextChunk::error("backend unavailable");
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"message\":\"backend unavailable\""));
    }

    #[test]
    fn test_data_stream_lines() {
        assert_eq!(TextChunk::text("Hi").to_data_stream_line(), "0:\"Hi\"\n");
        assert_eq!(
            TextChunk::text("a\nb").to_data_stream_line(),
            "0:\"a\\nb\"\n"
        );
        assert_eq!(
            TextChunk::error("boom").to_data_stream_line(),
            "3:\"boom\"\n"
        );
    }

    #[test]
    fn test_collect_text() {
        let chunks = vec![
            TextChunk::text("Hello, "),
            TextChunk::text("world"),
            TextChunk::error("cut"),
        ];
        assert_eq!(collect_text(&chunks), "Hello, world");
    }
}
