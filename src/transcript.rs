//! Conversation flattening.
//!
//! The upstream agent accepts only plain `{role, content}` text messages,
//! so provider-style block content (text, tool_use, tool_result) is rendered
//! into text on the way in: tool invocations and results become the same
//! markup the tool codec parses back out of responses.

use serde::Deserialize;
use serde_json::Value;

use crate::ids;
use crate::tools::{manifest_prompt, ToolResult, ToolSpec, ToolUse};

/// A decoded client message, as handed over by the per-protocol request
/// decoders. `content` is either a string or an array of content blocks.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: Value,
}

/// A message ready for the upstream agent.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A tool-related block extracted from structured message content.
#[derive(Debug, Clone)]
pub enum ToolBlock {
    Use(ToolUse),
    Result(ToolResult),
}

/// Split structured content into its text and its tool blocks.
/// String content is all text; unknown block types are skipped.
pub fn split_content(content: &Value) -> (String, Vec<ToolBlock>) {
    if let Some(text) = content.as_str() {
        return (text.to_string(), Vec::new());
    }

    let mut text_parts: Vec<&str> = Vec::new();
    let mut blocks = Vec::new();

    if let Some(items) = content.as_array() {
        for block in items {
            match block["type"].as_str() {
                Some("text") => {
                    if let Some(t) = block["text"].as_str() {
                        if !t.is_empty() {
                            text_parts.push(t);
                        }
                    }
                }
                Some("tool_use") => blocks.push(ToolBlock::Use(ToolUse {
                    id: block["id"]
                        .as_str()
                        .map(str::to_string)
                        .unwrap_or_else(ids::tool_use_id),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    input: block.get("input").cloned().unwrap_or(Value::Null),
                })),
                Some("tool_result") => blocks.push(ToolBlock::Result(ToolResult {
                    tool_use_id: block["tool_use_id"].as_str().unwrap_or_default().to_string(),
                    content: result_content_text(&block["content"]),
                    is_error: block["is_error"].as_bool().unwrap_or(false),
                })),
                _ => {}
            }
        }
    }

    (text_parts.join("\n"), blocks)
}

fn result_content_text(content: &Value) -> String {
    if let Some(s) = content.as_str() {
        return s.to_string();
    }
    if let Some(parts) = content.as_array() {
        return parts
            .iter()
            .filter(|p| p["type"].as_str() == Some("text"))
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");
    }
    String::new()
}

/// Textual rendering of a tool invocation for transcript replay.
pub fn tool_use_to_text(tool_use: &ToolUse) -> String {
    let input = serde_json::to_string(&tool_use.input).unwrap_or_else(|_| "{}".into());
    format!(
        "<tool_use id=\"{}\">\n<name>{}</name>\n<input>{}</input>\n</tool_use>",
        tool_use.id, tool_use.name, input
    )
}

/// Textual rendering of a tool result.
pub fn tool_result_to_text(result: &ToolResult) -> String {
    let status = if result.is_error { "error" } else { "success" };
    format!(
        "<tool_result tool_use_id=\"{}\" status=\"{}\">\n{}\n</tool_result>",
        result.tool_use_id, status, result.content
    )
}

/// Flatten messages with no tool manifest and no system text.
pub fn flatten_simple(messages: &[IncomingMessage]) -> Vec<TurnMessage> {
    flatten(messages, None)
}

/// Flatten messages with the tool manifest and/or system text injected as a
/// leading `[System]:` user message.
pub fn flatten_with_tools(
    messages: &[IncomingMessage],
    tools: &[ToolSpec],
    system: Option<&str>,
) -> Vec<TurnMessage> {
    let mut system_parts = Vec::new();
    if let Some(s) = system {
        if !s.is_empty() {
            system_parts.push(s.to_string());
        }
    }
    if !tools.is_empty() {
        system_parts.push(manifest_prompt(tools));
    }

    let preamble = if system_parts.is_empty() {
        None
    } else {
        Some(format!("[System]: {}", system_parts.join("\n")))
    };

    flatten(messages, preamble)
}

fn flatten(messages: &[IncomingMessage], preamble: Option<String>) -> Vec<TurnMessage> {
    let mut out = Vec::new();
    let mut seen_result_ids: Vec<String> = Vec::new();

    if let Some(content) = preamble {
        out.push(TurnMessage {
            role: Role::User,
            content,
        });
    }

    for msg in messages {
        let (text, blocks) = split_content(&msg.content);
        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(text);
        }

        if msg.role == "assistant" {
            for block in &blocks {
                if let ToolBlock::Use(tu) = block {
                    parts.push(tool_use_to_text(tu));
                }
            }
            if !parts.is_empty() {
                out.push(TurnMessage {
                    role: Role::Assistant,
                    content: parts.join("\n"),
                });
            }
        } else {
            for block in &blocks {
                if let ToolBlock::Result(tr) = block {
                    // Duplicate results collapse to the first occurrence.
                    if !tr.tool_use_id.is_empty() {
                        if seen_result_ids.contains(&tr.tool_use_id) {
                            continue;
                        }
                        seen_result_ids.push(tr.tool_use_id.clone());
                    }
                    parts.push(tool_result_to_text(tr));
                }
            }
            if !parts.is_empty() {
                out.push(TurnMessage {
                    role: Role::User,
                    content: parts.join("\n"),
                });
            }
        }
    }

    merge_consecutive(out)
}

/// The upstream service rejects back-to-back messages of the same role, so
/// they merge with a blank line between.
fn merge_consecutive(messages: Vec<TurnMessage>) -> Vec<TurnMessage> {
    let mut out: Vec<TurnMessage> = Vec::new();
    for msg in messages {
        match out.last_mut() {
            Some(last) if last.role == msg.role => {
                if !msg.content.is_empty() {
                    if !last.content.is_empty() {
                        last.content.push_str("\n\n");
                    }
                    last.content.push_str(&msg.content);
                }
            }
            _ => out.push(msg),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(content: Value) -> IncomingMessage {
        IncomingMessage {
            role: "user".into(),
            content,
        }
    }

    fn assistant(content: Value) -> IncomingMessage {
        IncomingMessage {
            role: "assistant".into(),
            content,
        }
    }

    #[test]
    fn string_content_passes_through() {
        let msgs = vec![user(json!("hi")), assistant(json!("hello"))];
        let flat = flatten_simple(&msgs);
        assert_eq!(flat.len(), 2);
        assert_eq!(flat[0].content, "hi");
        assert_eq!(flat[1].role, Role::Assistant);
    }

    #[test]
    fn tool_use_renders_as_markup() {
        let msgs = vec![assistant(json!([
            {"type": "text", "text": "Checking."},
            {"type": "tool_use", "id": "toolu_1", "name": "search", "input": {"q": "x"}}
        ]))];
        let flat = flatten_simple(&msgs);
        assert_eq!(flat.len(), 1);
        assert!(flat[0].content.starts_with("Checking.\n<tool_use id=\"toolu_1\">"));
        assert!(flat[0].content.contains("<name>search</name>"));
        assert!(flat[0].content.contains("<input>{\"q\":\"x\"}</input>"));
    }

    #[test]
    fn tool_result_renders_with_status() {
        let msgs = vec![user(json!([
            {"type": "tool_result", "tool_use_id": "toolu_1", "content": "42", "is_error": false}
        ]))];
        let flat = flatten_simple(&msgs);
        assert_eq!(
            flat[0].content,
            "<tool_result tool_use_id=\"toolu_1\" status=\"success\">\n42\n</tool_result>"
        );
    }

    #[test]
    fn duplicate_tool_results_collapse_to_first() {
        let result = json!([
            {"type": "tool_result", "tool_use_id": "abc", "content": "first"}
        ]);
        let dup = json!([
            {"type": "tool_result", "tool_use_id": "abc", "content": "second"}
        ]);
        let msgs = vec![user(result), assistant(json!("ok")), user(dup)];
        let flat = flatten_simple(&msgs);
        // The duplicate produced no content, so only two messages remain.
        assert_eq!(flat.len(), 2);
        assert!(flat[0].content.contains("first"));
        assert!(!flat.iter().any(|m| m.content.contains("second")));
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let msgs = vec![user(json!("one")), user(json!("two"))];
        let flat = flatten_simple(&msgs);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].content, "one\n\ntwo");
    }

    #[test]
    fn tools_inject_system_preamble() {
        let tools = vec![ToolSpec {
            name: "search".into(),
            description: "Search".into(),
            input_schema: json!({"type": "object"}),
        }];
        let msgs = vec![user(json!("find it"))];
        let flat = flatten_with_tools(&msgs, &tools, Some("Be terse."));
        // Preamble merges into the first user message.
        assert_eq!(flat.len(), 1);
        assert!(flat[0].content.starts_with("[System]: Be terse.\n"));
        assert!(flat[0].content.contains("You have access to the following tools:"));
        assert!(flat[0].content.ends_with("find it"));
    }

    #[test]
    fn no_tools_no_system_means_no_preamble() {
        let flat = flatten_with_tools(&[user(json!("hi"))], &[], None);
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].content, "hi");
    }

    #[test]
    fn result_content_parts_join() {
        let msgs = vec![user(json!([
            {"type": "tool_result", "tool_use_id": "t1", "content": [
                {"type": "text", "text": "line1"},
                {"type": "text", "text": "line2"}
            ]}
        ]))];
        let flat = flatten_simple(&msgs);
        assert!(flat[0].content.contains("line1\nline2"));
    }
}
