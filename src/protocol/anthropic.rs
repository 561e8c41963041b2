//! Anthropic Messages wire format: SSE frames with the full content-block
//! lifecycle, and the non-streaming message envelope.

use serde_json::{json, Value};

use super::{StreamEncoder, TurnOutcome};
use crate::events::TurnEvent;
use crate::tools::{parse_tool_calls, ToolUseFilter};

fn sse(event: &str, data: &Value) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

pub fn message_start(msg_id: &str, model: &str, input_tokens: u32) -> String {
    sse(
        "message_start",
        &json!({
            "type": "message_start",
            "message": {
                "id": msg_id,
                "type": "message",
                "role": "assistant",
                "model": model,
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": { "input_tokens": input_tokens, "output_tokens": 0 },
            },
        }),
    )
}

pub fn ping() -> String {
    "event: ping\ndata: {\"type\": \"ping\"}\n\n".to_string()
}

pub fn text_block_start(index: usize) -> String {
    sse(
        "content_block_start",
        &json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "text", "text": "" },
        }),
    )
}

pub fn thinking_block_start(index: usize) -> String {
    sse(
        "content_block_start",
        &json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "thinking", "thinking": "" },
        }),
    )
}

pub fn tool_use_block_start(index: usize, tool_id: &str, name: &str) -> String {
    sse(
        "content_block_start",
        &json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "tool_use", "id": tool_id, "name": name, "input": {} },
        }),
    )
}

pub fn text_delta(index: usize, text: &str) -> String {
    sse(
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "text_delta", "text": text },
        }),
    )
}

pub fn thinking_delta(index: usize, text: &str) -> String {
    sse(
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "thinking_delta", "thinking": text },
        }),
    )
}

pub fn input_json_delta(index: usize, partial_json: &str) -> String {
    sse(
        "content_block_delta",
        &json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "input_json_delta", "partial_json": partial_json },
        }),
    )
}

pub fn content_block_stop(index: usize) -> String {
    sse(
        "content_block_stop",
        &json!({ "type": "content_block_stop", "index": index }),
    )
}

pub fn message_delta(output_tokens: u32, stop_reason: &str) -> String {
    sse(
        "message_delta",
        &json!({
            "type": "message_delta",
            "delta": { "stop_reason": stop_reason, "stop_sequence": null },
            "usage": { "output_tokens": output_tokens },
        }),
    )
}

pub fn message_stop() -> String {
    "event: message_stop\ndata: {\"type\": \"message_stop\"}\n\n".to_string()
}

/// Streaming encoder for the Messages API.
///
/// Block indices mirror the normalizer's: thinking, text and tool_use
/// blocks never share one. Tool invocations surface only at finish, as a
/// `tool_use` block with its whole input in a single `input_json_delta`.
pub struct MessagesStreamEncoder {
    msg_id: String,
    model: String,
    input_tokens: u32,
    thinking_enabled: bool,
    tools_enabled: bool,
    filter: ToolUseFilter,
    block_idx: usize,
    in_thinking: bool,
    in_text: bool,
    full_text: String,
    finished: bool,
}

impl MessagesStreamEncoder {
    pub fn new(msg_id: impl Into<String>, model: impl Into<String>, input_tokens: u32) -> Self {
        Self {
            msg_id: msg_id.into(),
            model: model.into(),
            input_tokens,
            thinking_enabled: false,
            tools_enabled: false,
            filter: ToolUseFilter::new(),
            block_idx: 0,
            in_thinking: false,
            in_text: false,
            full_text: String::new(),
            finished: false,
        }
    }

    pub fn with_thinking(mut self, enabled: bool) -> Self {
        self.thinking_enabled = enabled;
        self
    }

    pub fn with_tools(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    fn open_text(&mut self, frames: &mut Vec<String>) {
        if !self.in_text {
            frames.push(text_block_start(self.block_idx));
            self.in_text = true;
        }
    }

    fn close_open_blocks(&mut self, frames: &mut Vec<String>) {
        if self.in_thinking {
            frames.push(content_block_stop(self.block_idx));
            self.block_idx += 1;
            self.in_thinking = false;
        }
        if self.in_text {
            frames.push(content_block_stop(self.block_idx));
            self.block_idx += 1;
            self.in_text = false;
        }
    }
}

impl StreamEncoder for MessagesStreamEncoder {
    fn begin(&mut self) -> Vec<String> {
        vec![
            message_start(&self.msg_id, &self.model, self.input_tokens),
            ping(),
        ]
    }

    fn handle(&mut self, event: &TurnEvent) -> Vec<String> {
        let mut frames = Vec::new();

        match event {
            TurnEvent::ReasoningStart { .. } if self.thinking_enabled => {
                frames.push(thinking_block_start(self.block_idx));
                self.in_thinking = true;
            }
            TurnEvent::ReasoningDelta { text, .. } if self.thinking_enabled => {
                if !self.in_thinking {
                    frames.push(thinking_block_start(self.block_idx));
                    self.in_thinking = true;
                }
                if !text.is_empty() {
                    frames.push(thinking_delta(self.block_idx, text));
                }
            }
            TurnEvent::ReasoningEnd { .. } if self.thinking_enabled => {
                if self.in_thinking {
                    frames.push(content_block_stop(self.block_idx));
                    self.block_idx += 1;
                    self.in_thinking = false;
                }
            }
            TurnEvent::TextStart { .. } => {
                // With tools on, the block opens lazily once safe prose
                // actually survives the filter.
                if !self.tools_enabled {
                    self.open_text(&mut frames);
                }
            }
            TurnEvent::TextDelta { text, .. } => {
                self.full_text.push_str(text);
                if self.tools_enabled {
                    if let Some(safe) = self.filter.push(text) {
                        self.open_text(&mut frames);
                        frames.push(text_delta(self.block_idx, &safe));
                    }
                } else if !text.is_empty() {
                    self.open_text(&mut frames);
                    frames.push(text_delta(self.block_idx, text));
                }
            }
            TurnEvent::TextEnd { .. } => {
                if self.tools_enabled {
                    if let Some(rest) = self.filter.flush() {
                        self.open_text(&mut frames);
                        frames.push(text_delta(self.block_idx, &rest));
                    }
                }
                if self.in_text {
                    frames.push(content_block_stop(self.block_idx));
                    self.block_idx += 1;
                    self.in_text = false;
                }
            }
            TurnEvent::Finish { reason, usage } => {
                self.finished = true;
                if self.tools_enabled {
                    if let Some(rest) = self.filter.flush() {
                        self.open_text(&mut frames);
                        frames.push(text_delta(self.block_idx, &rest));
                    }
                }
                self.close_open_blocks(&mut frames);

                let mut stop_reason = reason.as_anthropic();
                if self.tools_enabled {
                    let parsed = parse_tool_calls(&self.full_text);
                    if !parsed.calls.is_empty() {
                        stop_reason = "tool_use";
                        for call in &parsed.calls {
                            let input =
                                serde_json::to_string(&call.input).unwrap_or_else(|_| "{}".into());
                            frames.push(tool_use_block_start(self.block_idx, &call.id, &call.name));
                            frames.push(input_json_delta(self.block_idx, &input));
                            frames.push(content_block_stop(self.block_idx));
                            self.block_idx += 1;
                        }
                    }
                }

                frames.push(message_delta(usage.output_tokens, stop_reason));
                frames.push(message_stop());
            }
            _ => {}
        }

        frames
    }

    fn finish_abrupt(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let mut frames = Vec::new();
        self.close_open_blocks(&mut frames);
        let estimated = self.full_text.len().div_ceil(4) as u32;
        frames.push(message_delta(estimated, "end_turn"));
        frames.push(message_stop());
        frames
    }

    fn error_frame(&self, message: &str) -> String {
        sse("error", &json!({ "error": message }))
    }
}

/// Non-streaming Messages envelope.
pub fn assemble_message(msg_id: &str, outcome: &TurnOutcome, thinking_enabled: bool) -> Value {
    let mut content = Vec::new();

    if thinking_enabled && !outcome.reasoning.is_empty() {
        content.push(json!({ "type": "thinking", "thinking": outcome.reasoning }));
    }
    if !outcome.text.is_empty() {
        content.push(json!({ "type": "text", "text": outcome.text }));
    }
    for call in &outcome.tool_uses {
        content.push(json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        }));
    }

    json!({
        "id": msg_id,
        "type": "message",
        "role": "assistant",
        "model": outcome.model,
        "content": content,
        "stop_reason": outcome.stop_reason.as_anthropic(),
        "usage": {
            "input_tokens": outcome.usage.input_tokens,
            "output_tokens": outcome.usage.output_tokens,
        },
    })
}
