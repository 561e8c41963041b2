//! OpenAI wire formats: Chat Completions chunks and the Responses API,
//! plus request-side conversion of function tools and tool-role messages.

use serde_json::{json, Map, Value};

use super::{StreamEncoder, TurnOutcome};
use crate::events::TurnEvent;
use crate::tools::{parse_tool_calls, ToolSpec, ToolUse, ToolUseFilter};
use crate::transcript::IncomingMessage;

/// Literal stream terminator. Clients match on these exact bytes.
pub const DONE: &str = "data: [DONE]\n\n";

/// Creation timestamp for `chat.completion` objects, seconds since epoch.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn chunk(id: &str, model: &str, created: i64, delta: Value, finish_reason: Option<&str>) -> String {
    let body = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [
            {
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            },
        ],
    });
    format!("data: {body}\n\n")
}

fn tool_call_value(call: &ToolUse) -> Value {
    let arguments = serde_json::to_string(&call.input).unwrap_or_else(|_| "{}".into());
    json!({
        "id": call.id,
        "type": "function",
        "function": { "name": call.name, "arguments": arguments },
    })
}

/// Streaming encoder for Chat Completions.
pub struct ChatStreamEncoder {
    id: String,
    model: String,
    created: i64,
    tools_enabled: bool,
    filter: ToolUseFilter,
    full_text: String,
    finished: bool,
}

impl ChatStreamEncoder {
    pub fn new(id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: unix_now(),
            tools_enabled: false,
            filter: ToolUseFilter::new(),
            full_text: String::new(),
            finished: false,
        }
    }

    pub fn with_tools(mut self, enabled: bool) -> Self {
        self.tools_enabled = enabled;
        self
    }

    pub fn with_created(mut self, created: i64) -> Self {
        self.created = created;
        self
    }

    fn content_chunk(&self, text: &str) -> String {
        chunk(
            &self.id,
            &self.model,
            self.created,
            json!({ "content": text }),
            None,
        )
    }
}

impl StreamEncoder for ChatStreamEncoder {
    fn begin(&mut self) -> Vec<String> {
        vec![chunk(
            &self.id,
            &self.model,
            self.created,
            json!({ "role": "assistant" }),
            None,
        )]
    }

    fn handle(&mut self, event: &TurnEvent) -> Vec<String> {
        let mut frames = Vec::new();

        match event {
            TurnEvent::ReasoningDelta { text, .. } if !text.is_empty() => {
                frames.push(chunk(
                    &self.id,
                    &self.model,
                    self.created,
                    json!({ "reasoning_content": text }),
                    None,
                ));
            }
            TurnEvent::TextDelta { text, .. } => {
                self.full_text.push_str(text);
                if self.tools_enabled {
                    if let Some(safe) = self.filter.push(text) {
                        frames.push(self.content_chunk(&safe));
                    }
                } else if !text.is_empty() {
                    frames.push(self.content_chunk(text));
                }
            }
            TurnEvent::TextEnd { .. } => {
                if self.tools_enabled {
                    if let Some(rest) = self.filter.flush() {
                        frames.push(self.content_chunk(&rest));
                    }
                }
            }
            TurnEvent::Finish { reason, .. } => {
                self.finished = true;
                if self.tools_enabled {
                    if let Some(rest) = self.filter.flush() {
                        frames.push(self.content_chunk(&rest));
                    }
                }

                let mut finish_reason = reason.as_openai();
                if self.tools_enabled {
                    let parsed = parse_tool_calls(&self.full_text);
                    if !parsed.calls.is_empty() {
                        finish_reason = "tool_calls";
                        let calls: Vec<Value> =
                            parsed.calls.iter().map(tool_call_value).collect();
                        frames.push(chunk(
                            &self.id,
                            &self.model,
                            self.created,
                            json!({ "tool_calls": calls }),
                            None,
                        ));
                    }
                }

                frames.push(chunk(
                    &self.id,
                    &self.model,
                    self.created,
                    json!({}),
                    Some(finish_reason),
                ));
                frames.push(DONE.to_string());
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
        vec![
            chunk(&self.id, &self.model, self.created, json!({}), Some("stop")),
            DONE.to_string(),
        ]
    }

    fn error_frame(&self, message: &str) -> String {
        format!("data: {}\n\n", json!({ "error": message }))
    }
}

/// Non-streaming `chat.completion` envelope.
pub fn assemble_completion(id: &str, created: i64, outcome: &TurnOutcome) -> Value {
    let mut message = Map::new();
    message.insert("role".into(), json!("assistant"));
    message.insert("content".into(), json!(outcome.text));

    let finish_reason = if outcome.tool_uses.is_empty() {
        outcome.stop_reason.as_openai()
    } else {
        let calls: Vec<Value> = outcome.tool_uses.iter().map(tool_call_value).collect();
        message.insert("tool_calls".into(), json!(calls));
        "tool_calls"
    };

    json!({
        "id": id,
        "object": "chat.completion",
        "created": created,
        "model": outcome.model,
        "choices": [
            {
                "index": 0,
                "message": message,
                "finish_reason": finish_reason,
            },
        ],
        "usage": {
            "prompt_tokens": outcome.usage.input_tokens,
            "completion_tokens": outcome.usage.output_tokens,
            "total_tokens": outcome.usage.total(),
        },
    })
}

/// Streaming encoder for the Responses API. Text-only: `content_part_delta`
/// frames followed by a `response_done` envelope carrying the full text.
pub struct ResponsesStreamEncoder {
    id: String,
    full_text: String,
    finished: bool,
}

impl ResponsesStreamEncoder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            full_text: String::new(),
            finished: false,
        }
    }

    fn done_frame(&self) -> String {
        let body = json!({
            "type": "response_done",
            "response": {
                "id": self.id,
                "output": [{ "type": "text", "text": self.full_text }],
            },
        });
        format!("data: {body}\n\n")
    }
}

impl StreamEncoder for ResponsesStreamEncoder {
    fn begin(&mut self) -> Vec<String> {
        Vec::new()
    }

    fn handle(&mut self, event: &TurnEvent) -> Vec<String> {
        match event {
            TurnEvent::TextDelta { text, .. } if !text.is_empty() => {
                self.full_text.push_str(text);
                let body = json!({
                    "type": "content_part_delta",
                    "delta": { "text": text },
                });
                vec![format!("data: {body}\n\n")]
            }
            TurnEvent::Finish { .. } => {
                self.finished = true;
                vec![self.done_frame()]
            }
            _ => Vec::new(),
        }
    }

    fn finish_abrupt(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        vec![self.done_frame()]
    }

    fn error_frame(&self, message: &str) -> String {
        format!("data: {}\n\n", json!({ "error": message }))
    }
}

/// Non-streaming Responses envelope.
pub fn assemble_response(id: &str, outcome: &TurnOutcome) -> Value {
    json!({
        "id": id,
        "object": "response",
        "model": outcome.model,
        "output": [{ "type": "text", "text": outcome.text }],
        "usage": {
            "input_tokens": outcome.usage.input_tokens,
            "output_tokens": outcome.usage.output_tokens,
        },
    })
}

/// Flatten a Responses `input` (string or text-part array) and optional
/// instructions into user messages.
pub fn responses_messages(input: &Value, instructions: Option<&str>) -> Vec<IncomingMessage> {
    let text = match input.as_str() {
        Some(s) => s.to_string(),
        None => input
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter(|p| p["type"].as_str() == Some("text"))
                    .filter_map(|p| p["text"].as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
    };

    let mut messages = Vec::new();
    if let Some(instructions) = instructions.filter(|s| !s.is_empty()) {
        messages.push(IncomingMessage {
            role: "user".into(),
            content: json!(format!("[Instructions]: {instructions}")),
        });
    }
    messages.push(IncomingMessage {
        role: "user".into(),
        content: json!(text),
    });
    messages
}

/// OpenAI function-style tool declarations as Anthropic-style specs.
pub fn convert_function_tools(tools: &[Value]) -> Vec<ToolSpec> {
    tools
        .iter()
        .filter_map(|tool| {
            let func = tool.get("function")?;
            Some(ToolSpec {
                name: func["name"].as_str()?.to_string(),
                description: func["description"].as_str().unwrap_or_default().to_string(),
                input_schema: func
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
            })
        })
        .collect()
}

/// A raw Chat Completions message before tool-role rewriting.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub tool_call_id: Option<String>,
}

/// Rewrite `tool`-role messages into user messages carrying `tool_result`
/// markup, anchored right after the assistant message that issued the
/// matching `tool_call`. Unmatched results go to the end.
pub fn convert_tool_role_messages(messages: &[ChatMessage]) -> Vec<IncomingMessage> {
    let mut results: Vec<(String, String)> = Vec::new();
    let mut converted: Vec<&ChatMessage> = Vec::new();

    for msg in messages {
        match (&msg.tool_call_id, msg.content.as_str()) {
            (Some(id), Some(content)) if msg.role == "tool" => {
                results.push((
                    id.clone(),
                    format!(
                        "<tool_result tool_use_id=\"{id}\" status=\"success\">\n{content}\n</tool_result>"
                    ),
                ));
            }
            _ if msg.role == "tool" => {}
            _ => converted.push(msg),
        }
    }

    let mut out = Vec::new();
    for msg in converted {
        out.push(IncomingMessage {
            role: msg.role.clone(),
            content: msg.content.clone(),
        });
        if msg.role == "assistant" {
            if let Some(parts) = msg.content.as_array() {
                for part in parts {
                    if part["type"].as_str() != Some("tool_call") {
                        continue;
                    }
                    let Some(call_id) = part["id"].as_str() else {
                        continue;
                    };
                    if let Some(pos) = results.iter().position(|(id, _)| id == call_id) {
                        let (_, text) = results.remove(pos);
                        out.push(IncomingMessage {
                            role: "user".into(),
                            content: json!(text),
                        });
                    }
                }
            }
        }
    }

    for (_, text) in results {
        out.push(IncomingMessage {
            role: "user".into(),
            content: json!(text),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{StopReason, Usage};

    fn data_json(frame: &str) -> Value {
        serde_json::from_str(frame.trim_start_matches("data: ").trim_end()).unwrap()
    }

    fn finish() -> TurnEvent {
        TurnEvent::Finish {
            reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 2,
                output_tokens: 3,
            },
        }
    }

    #[test]
    fn stream_carries_role_then_content_then_stop() {
        let mut enc = ChatStreamEncoder::new("chatcmpl-1", "m").with_created(1700000000);
        let mut frames = enc.begin();
        frames.extend(enc.handle(&TurnEvent::TextDelta {
            index: 0,
            text: "Hi".into(),
        }));
        frames.extend(enc.handle(&finish()));

        assert_eq!(data_json(&frames[0])["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(data_json(&frames[1])["choices"][0]["delta"]["content"], "Hi");
        let last_chunk = data_json(&frames[2]);
        assert_eq!(last_chunk["choices"][0]["finish_reason"], "stop");
        assert_eq!(last_chunk["object"], "chat.completion.chunk");
        assert_eq!(frames[3], DONE);
    }

    #[test]
    fn reasoning_surfaces_as_reasoning_content() {
        let mut enc = ChatStreamEncoder::new("chatcmpl-1", "m");
        let frames = enc.handle(&TurnEvent::ReasoningDelta {
            index: 0,
            text: "step".into(),
        });
        assert_eq!(
            data_json(&frames[0])["choices"][0]["delta"]["reasoning_content"],
            "step"
        );
    }

    #[test]
    fn tool_markup_becomes_tool_calls_chunk() {
        let mut enc = ChatStreamEncoder::new("chatcmpl-1", "m").with_tools(true);
        let mut frames = Vec::new();
        frames.extend(enc.handle(&TurnEvent::TextDelta {
            index: 0,
            text: "<tool_use><name>lookup</name><input>{\"k\":1}</input></tool_use>".into(),
        }));
        frames.extend(enc.handle(&finish()));

        let calls_chunk = frames
            .iter()
            .map(|f| data_json(f))
            .find(|v| v["choices"][0]["delta"]["tool_calls"].is_array())
            .unwrap();
        let call = &calls_chunk["choices"][0]["delta"]["tool_calls"][0];
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "lookup");
        assert_eq!(call["function"]["arguments"], "{\"k\":1}");

        let finish_chunk = data_json(&frames[frames.len() - 2]);
        assert_eq!(finish_chunk["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(frames.last().unwrap(), DONE);
    }

    #[test]
    fn abrupt_end_still_emits_done() {
        let mut enc = ChatStreamEncoder::new("chatcmpl-1", "m");
        enc.handle(&TurnEvent::TextDelta {
            index: 0,
            text: "partial".into(),
        });
        let frames = enc.finish_abrupt();
        assert_eq!(data_json(&frames[0])["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames[1], DONE);
        assert!(enc.finish_abrupt().is_empty());
    }

    #[test]
    fn completion_envelope_totals_usage() {
        let outcome = TurnOutcome {
            model: "m".into(),
            text: "answer".into(),
            reasoning: String::new(),
            tool_uses: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
        };
        let v = assemble_completion("chatcmpl-9", 1700000000, &outcome);
        assert_eq!(v["object"], "chat.completion");
        assert_eq!(v["choices"][0]["message"]["content"], "answer");
        assert_eq!(v["choices"][0]["finish_reason"], "stop");
        assert_eq!(v["usage"]["total_tokens"], 15);
    }

    #[test]
    fn completion_envelope_with_tool_calls() {
        let outcome = TurnOutcome {
            model: "m".into(),
            text: String::new(),
            reasoning: String::new(),
            tool_uses: vec![ToolUse {
                id: "toolu_1".into(),
                name: "lookup".into(),
                input: json!({"k": 1}),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        };
        let v = assemble_completion("chatcmpl-9", 0, &outcome);
        assert_eq!(v["choices"][0]["finish_reason"], "tool_calls");
        assert_eq!(
            v["choices"][0]["message"]["tool_calls"][0]["function"]["name"],
            "lookup"
        );
    }

    #[test]
    fn responses_stream_echoes_full_text_at_done() {
        let mut enc = ResponsesStreamEncoder::new("resp_1");
        assert!(enc.begin().is_empty());
        let frames = enc.handle(&TurnEvent::TextDelta {
            index: 0,
            text: "Hello".into(),
        });
        assert_eq!(data_json(&frames[0])["type"], "content_part_delta");
        assert_eq!(data_json(&frames[0])["delta"]["text"], "Hello");

        let frames = enc.handle(&finish());
        let done = data_json(&frames[0]);
        assert_eq!(done["type"], "response_done");
        assert_eq!(done["response"]["output"][0]["text"], "Hello");
    }

    #[test]
    fn responses_messages_prepend_instructions() {
        let msgs = responses_messages(&json!("do it"), Some("be brief"));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].content, json!("[Instructions]: be brief"));
        assert_eq!(msgs[1].content, json!("do it"));

        let msgs = responses_messages(
            &json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]),
            None,
        );
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, json!("a\nb"));
    }

    #[test]
    fn function_tools_convert_with_defaults() {
        let tools = vec![json!({
            "type": "function",
            "function": { "name": "lookup" }
        })];
        let specs = convert_function_tools(&tools);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "lookup");
        assert_eq!(specs[0].description, "");
        assert_eq!(specs[0].input_schema["type"], "object");
    }

    #[test]
    fn tool_role_messages_anchor_after_matching_call() {
        let messages = vec![
            ChatMessage {
                role: "user".into(),
                content: json!("run it"),
                tool_call_id: None,
            },
            ChatMessage {
                role: "assistant".into(),
                content: json!([{ "type": "tool_call", "id": "call_1" }]),
                tool_call_id: None,
            },
            ChatMessage {
                role: "tool".into(),
                content: json!("42"),
                tool_call_id: Some("call_1".into()),
            },
        ];
        let out = convert_tool_role_messages(&messages);
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].role, "user");
        let text = out[2].content.as_str().unwrap();
        assert!(text.starts_with("<tool_result tool_use_id=\"call_1\" status=\"success\">"));
        assert!(text.contains("42"));
    }

    #[test]
    fn unmatched_tool_results_append_at_end() {
        let messages = vec![
            ChatMessage {
                role: "tool".into(),
                content: json!("orphan"),
                tool_call_id: Some("call_9".into()),
            },
            ChatMessage {
                role: "user".into(),
                content: json!("hi"),
                tool_call_id: None,
            },
        ];
        let out = convert_tool_role_messages(&messages);
        assert_eq!(out[0].role, "user");
        assert_eq!(out[0].content, json!("hi"));
        assert!(out[1].content.as_str().unwrap().contains("orphan"));
    }
}
