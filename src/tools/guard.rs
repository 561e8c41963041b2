//! Pre-flight loop detection.
//!
//! Runs synchronously before a turn is opened when the request declares
//! tools. Catches two failure modes of text-embedded tool calling: the model
//! re-issuing the same invocation over and over, and a client echoing the
//! same tool result back twice (which tends to send the agent in circles).

use tracing::warn;

use crate::transcript::{split_content, IncomingMessage, ToolBlock};

/// How many trailing messages are inspected.
const SCAN_WINDOW: usize = 15;

/// How many occurrences of repeated result ids trigger a rejection. A single
/// id delivered twice counts as two occurrences, so one echoed pair is
/// already enough.
const DUPLICATE_RESULT_LIMIT: usize = 2;

/// Scan recent history for tool-call loops. Returns a human-readable
/// rejection reason, or `None` when the turn may proceed.
pub fn detect_tool_loop(messages: &[IncomingMessage], threshold: usize) -> Option<String> {
    let start = messages.len().saturating_sub(SCAN_WINDOW);
    let recent = &messages[start..];

    let mut calls: Vec<(String, String)> = Vec::new();
    let mut result_ids: Vec<(String, usize)> = Vec::new();

    for msg in recent {
        let (_, blocks) = split_content(&msg.content);
        if msg.role == "assistant" {
            for block in &blocks {
                if let ToolBlock::Use(tu) = block {
                    let input = serde_json::to_string(&tu.input).unwrap_or_default();
                    calls.push((tu.name.clone(), input));
                }
            }
        } else {
            for block in &blocks {
                if let ToolBlock::Result(tr) = block {
                    if tr.tool_use_id.is_empty() {
                        continue;
                    }
                    match result_ids.iter_mut().find(|(id, _)| *id == tr.tool_use_id) {
                        Some((_, count)) => *count += 1,
                        None => result_ids.push((tr.tool_use_id.clone(), 1)),
                    }
                }
            }
        }
    }

    // Every occurrence of an echoed id counts, so one id seen twice already
    // reaches the limit.
    let duplicate_results: Vec<&str> = result_ids
        .iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(id, _)| id.as_str())
        .collect();
    let duplicate_occurrences: usize = result_ids
        .iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(_, count)| *count)
        .sum();

    if calls.len() >= threshold {
        let last = &calls[calls.len() - 1];
        let consecutive = calls[calls.len() - threshold..]
            .iter()
            .filter(|c| *c == last)
            .count();
        if consecutive >= threshold {
            warn!(tool = %last.0, repeats = consecutive, "rejecting looping tool calls");
            return Some(format!(
                "Detected infinite loop: tool '{}' called {} times consecutively with same input",
                last.0, consecutive
            ));
        }
    }

    if duplicate_occurrences >= DUPLICATE_RESULT_LIMIT {
        warn!(ids = ?duplicate_results, "rejecting duplicated tool results");
        let shown: Vec<&str> = duplicate_results.iter().take(3).copied().collect();
        return Some(format!(
            "Detected duplicate tool_results: {}. This may cause infinite loops.",
            shown.join(", ")
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_msg(name: &str, input: serde_json::Value) -> IncomingMessage {
        IncomingMessage {
            role: "assistant".into(),
            content: json!([
                {"type": "tool_use", "id": "t", "name": name, "input": input}
            ]),
        }
    }

    fn result_msg(id: &str) -> IncomingMessage {
        IncomingMessage {
            role: "user".into(),
            content: json!([
                {"type": "tool_result", "tool_use_id": id, "content": "out"}
            ]),
        }
    }

    #[test]
    fn three_identical_calls_trip_the_guard() {
        let msgs: Vec<_> = (0..3).map(|_| call_msg("search", json!({"q": "x"}))).collect();
        let reason = detect_tool_loop(&msgs, 3);
        assert!(reason.is_some());
        assert!(reason.unwrap().contains("search"));
    }

    #[test]
    fn two_identical_calls_pass() {
        let msgs: Vec<_> = (0..2).map(|_| call_msg("search", json!({"q": "x"}))).collect();
        assert!(detect_tool_loop(&msgs, 3).is_none());
    }

    #[test]
    fn different_inputs_do_not_trip() {
        let msgs = vec![
            call_msg("search", json!({"q": "a"})),
            call_msg("search", json!({"q": "b"})),
            call_msg("search", json!({"q": "c"})),
        ];
        assert!(detect_tool_loop(&msgs, 3).is_none());
    }

    #[test]
    fn trailing_repeats_after_other_calls_still_trip() {
        let mut msgs = vec![call_msg("read", json!({"path": "a"}))];
        msgs.extend((0..3).map(|_| call_msg("search", json!({"q": "x"}))));
        assert!(detect_tool_loop(&msgs, 3).is_some());
    }

    #[test]
    fn duplicated_result_ids_trip_the_guard() {
        let msgs = vec![
            result_msg("abc"),
            result_msg("abc"),
            result_msg("def"),
            result_msg("def"),
        ];
        let reason = detect_tool_loop(&msgs, 3).unwrap();
        assert!(reason.contains("duplicate tool_results"));
        assert!(reason.contains("abc"));
    }

    #[test]
    fn one_echoed_pair_is_enough() {
        let msgs = vec![result_msg("abc"), result_msg("abc")];
        let reason = detect_tool_loop(&msgs, 3).unwrap();
        assert!(reason.contains("abc"));
    }

    #[test]
    fn distinct_result_ids_pass() {
        let msgs = vec![result_msg("abc"), result_msg("def")];
        assert!(detect_tool_loop(&msgs, 3).is_none());
    }

    #[test]
    fn only_recent_messages_are_scanned() {
        // Looping calls buried beyond the scan window are ignored.
        let mut msgs: Vec<_> = (0..3).map(|_| call_msg("search", json!({"q": "x"}))).collect();
        msgs.extend((0..15).map(|i| IncomingMessage {
            role: "user".into(),
            content: json!(format!("filler {i}")),
        }));
        assert!(detect_tool_loop(&msgs, 3).is_none());
    }
}
