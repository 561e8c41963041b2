//! Gemini generateContent wire format: newline-delimited JSON, no SSE
//! framing and no explicit start/stop events.

use serde_json::{json, Value};

use super::{StreamEncoder, TurnOutcome};
use crate::events::TurnEvent;
use crate::transcript::IncomingMessage;

/// One NDJSON chunk carrying a single part.
pub fn stream_chunk(text: &str, is_thought: bool) -> String {
    let mut part = json!({ "text": text });
    if is_thought {
        part["thought"] = json!(true);
    }
    let body = json!({
        "candidates": [
            {
                "content": { "parts": [part], "role": "model" },
            },
        ],
    });
    format!("{body}\n")
}

/// Streaming encoder for `streamGenerateContent`. The protocol has no
/// terminal frame; the stream just ends after the last chunk.
#[derive(Default)]
pub struct GeminiStreamEncoder;

impl GeminiStreamEncoder {
    pub fn new() -> Self {
        Self
    }
}

impl StreamEncoder for GeminiStreamEncoder {
    fn begin(&mut self) -> Vec<String> {
        Vec::new()
    }

    fn handle(&mut self, event: &TurnEvent) -> Vec<String> {
        match event {
            TurnEvent::TextDelta { text, .. } if !text.is_empty() => {
                vec![stream_chunk(text, false)]
            }
            TurnEvent::ReasoningDelta { text, .. } if !text.is_empty() => {
                vec![stream_chunk(text, true)]
            }
            _ => Vec::new(),
        }
    }

    fn finish_abrupt(&mut self) -> Vec<String> {
        Vec::new()
    }

    fn error_frame(&self, message: &str) -> String {
        format!("{}\n", json!({ "error": message }))
    }
}

/// Non-streaming generateContent envelope. The thinking part, when present,
/// precedes the text part.
pub fn assemble_response(outcome: &TurnOutcome) -> Value {
    let mut parts = Vec::new();
    if !outcome.reasoning.is_empty() {
        parts.push(json!({ "text": outcome.reasoning, "thought": true }));
    }
    parts.push(json!({ "text": outcome.text }));

    json!({
        "candidates": [
            {
                "content": { "parts": parts, "role": "model" },
                "finishReason": outcome.stop_reason.as_gemini(),
            },
        ],
        "modelVersion": outcome.model,
    })
}

/// Flatten Gemini `contents` into role/text messages. Gemini's `model` role
/// maps to assistant; anything else is treated as user.
pub fn contents_to_messages(contents: &[Value]) -> Vec<IncomingMessage> {
    contents
        .iter()
        .map(|content| {
            let role = match content["role"].as_str() {
                Some("model") => "assistant",
                _ => "user",
            };
            let text = content["parts"]
                .as_array()
                .map(|parts| {
                    parts
                        .iter()
                        .filter_map(|p| p["text"].as_str())
                        .filter(|t| !t.is_empty())
                        .collect::<Vec<_>>()
                        .join("\n")
                })
                .unwrap_or_default();
            IncomingMessage {
                role: role.into(),
                content: json!(text),
            }
        })
        .collect()
}
