pub mod codec;
pub mod filter;
pub mod guard;

use serde::Deserialize;
use serde_json::Value;

pub use codec::{manifest_prompt, parse_tool_calls, ParsedCalls};
pub use filter::ToolUseFilter;
pub use guard::detect_tool_loop;

/// One entry of the tool manifest a client declares for a turn.
/// Immutable per turn; encoded into a textual instruction block because the
/// upstream service has no native function-calling concept.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

/// A tool invocation recovered from assistant text. `id` is generated when
/// the text omits one, and stays stable for the rest of the response so
/// encoders can correlate start/delta/stop frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// A tool result sent back by the client on a subsequent turn.
/// Identity key is `tool_use_id`; duplicates collapse to the first.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: String,
    pub is_error: bool,
}
