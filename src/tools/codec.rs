//! Textual tool-invocation codec.
//!
//! The upstream service only understands plain text, so tool manifests are
//! encoded as an instruction block and invocations are parsed back out of
//! the assistant's prose. Three grammars are tolerated on the way out, from
//! most to least specific, so a stricter form is consumed before a looser
//! one can mis-match its leftovers.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use super::{ToolSpec, ToolUse};
use crate::ids;

/// Grammar 1: explicit sub-tags, optionally carrying an id.
/// `<tool_use id="..."><name>..</name><input>{..}</input></tool_use>`
static TAGGED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)<tool_use(?:\s+id="([^"]*)")?>\s*<name>([^<]+)</name>\s*<input>(.*?)</input>\s*</tool_use>"#,
    )
    .expect("tagged tool_use pattern")
});

/// Grammar 2: a single JSON object as the whole body.
/// `<tool_use>{"name":..,"input":{..}}</tool_use>`
static JSON_BODY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<tool_use>\s*(\{.*?\})\s*</tool_use>").expect("json-body tool_use pattern")
});

/// Grammar 3: bare name on its own line, then the input JSON. The name must
/// not itself look like JSON (no leading `{` or `"`).
static BARE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tool_use>\s*([^\s{"<][^<\n]*)\n\s*(.*?)\s*</tool_use>"#)
        .expect("bare-name tool_use pattern")
});

/// Result of scanning assistant text for embedded invocations.
#[derive(Debug, Clone, Default)]
pub struct ParsedCalls {
    /// Input text with every matched invocation stripped, trimmed.
    pub remaining_text: String,
    pub calls: Vec<ToolUse>,
}

/// Encode a tool manifest into the instruction block injected into the
/// first user message. Identical manifests encode to identical text so
/// transcripts stay stable across retries.
pub fn manifest_prompt(tools: &[ToolSpec]) -> String {
    if tools.is_empty() {
        return String::new();
    }

    let mut lines = vec!["You have access to the following tools:\n".to_string()];

    for tool in tools {
        lines.push(format!("<tool name=\"{}\">", tool.name));
        if !tool.description.is_empty() {
            lines.push(format!("<description>{}</description>", tool.description));
        }
        if !tool.input_schema.is_null() {
            lines.push(format!(
                "<parameters>{}</parameters>",
                serde_json::to_string(&tool.input_schema).unwrap_or_else(|_| "{}".into())
            ));
        }
        lines.push("</tool>\n".to_string());
    }

    lines.push(
        "\nWhen you need to use a tool, output it in this exact format:\n\
         <tool_use>\n\
         <name>tool_name</name>\n\
         <input>{\"param\": \"value\"}</input>\n\
         </tool_use>\n\n\
         You can use multiple tools in one response. After outputting tool_use blocks, \
         wait for the tool results before continuing.\n"
            .to_string(),
    );

    lines.join("\n")
}

/// Recover tool invocations embedded in assistant text.
///
/// Malformed input JSON is wrapped as `{"raw": <original>}` rather than
/// dropped; missing ids get a fresh `toolu_` identifier.
pub fn parse_tool_calls(text: &str) -> ParsedCalls {
    let mut calls = Vec::new();

    let stripped = TAGGED.replace_all(text, |caps: &regex::Captures<'_>| {
        let id = caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(ids::tool_use_id);
        let name = caps[2].trim().to_string();
        calls.push(ToolUse {
            id,
            name,
            input: parse_input(caps[3].trim()),
        });
        ""
    });

    let stripped = JSON_BODY.replace_all(&stripped, |caps: &regex::Captures<'_>| {
        // Only a parseable object carrying a name counts as a match here;
        // anything else is left in place for the next grammar.
        match serde_json::from_str::<Value>(caps[1].trim()) {
            Ok(obj) if obj["name"].is_string() => {
                let id = obj["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(ids::tool_use_id);
                let name = obj["name"].as_str().unwrap_or_default().to_string();
                let input = match obj.get("input") {
                    Some(v) if !v.is_null() => v.clone(),
                    _ => json!({}),
                };
                calls.push(ToolUse { id, name, input });
                String::new()
            }
            _ => caps[0].to_string(),
        }
    });

    let stripped = BARE_NAME.replace_all(&stripped, |caps: &regex::Captures<'_>| {
        calls.push(ToolUse {
            id: ids::tool_use_id(),
            name: caps[1].trim().to_string(),
            input: parse_input(caps[2].trim()),
        });
        ""
    });

    ParsedCalls {
        remaining_text: stripped.trim().to_string(),
        calls,
    }
}

fn parse_input(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "raw": raw }))
}
