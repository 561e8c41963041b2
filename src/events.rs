use serde::Deserialize;

/// One event from the upstream agent's duplex connection, as delivered on
/// the wire. The vocabulary is closed; anything we don't recognize lands in
/// `Unknown` instead of aborting the turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum UpstreamEvent {
    StepStart,
    ReasoningStart,
    ReasoningDelta {
        #[serde(default)]
        delta: Option<String>,
    },
    ReasoningEnd,
    TextStart,
    TextDelta {
        #[serde(default)]
        delta: Option<String>,
    },
    TextEnd,
    Finish {
        #[serde(default)]
        usage: Option<UpstreamUsage>,
        #[serde(default, rename = "finishReason")]
        finish_reason: Option<String>,
        /// Some revisions of the upstream service send heartbeat `finish`
        /// events with `final: false` before the real one.
        #[serde(default, rename = "final")]
        is_final: Option<bool>,
    },
    #[serde(other)]
    Unknown,
}

/// Token counts as reported by the upstream service. Both fields are
/// optional; missing output counts are estimated from accumulated text.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamUsage {
    #[serde(default)]
    pub input_tokens: Option<u32>,
    #[serde(default)]
    pub output_tokens: Option<u32>,
}

/// Canonical, protocol-agnostic event produced by the normalizer.
/// Block indices are monotonically increasing in the order blocks open;
/// a block's end event reuses that block's index.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    StepStart,
    ReasoningStart { index: usize },
    ReasoningDelta { index: usize, text: String },
    ReasoningEnd { index: usize },
    TextStart { index: usize },
    TextDelta { index: usize, text: String },
    TextEnd { index: usize },
    Finish { reason: StopReason, usage: Usage },
    /// Event arrived after the terminal finish, or a non-final heartbeat.
    Ignored,
    /// Unrecognized upstream payload. No state change.
    Unknown,
}

/// Token usage for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Why the turn ended. Each downstream protocol has its own vocabulary for
/// this; all three encoders go through the mappings below rather than
/// keeping their own tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
}

impl StopReason {
    /// Parse the upstream `finishReason` string. Anything unrecognized
    /// degrades to `EndTurn`.
    pub fn from_upstream(reason: Option<&str>) -> Self {
        match reason {
            Some("tool_use") => StopReason::ToolUse,
            Some("max_tokens") | Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }

    /// Anthropic Messages `stop_reason`.
    pub fn as_anthropic(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "end_turn",
            StopReason::ToolUse => "tool_use",
            StopReason::MaxTokens => "max_tokens",
        }
    }

    /// OpenAI Chat Completions `finish_reason`.
    pub fn as_openai(&self) -> &'static str {
        match self {
            StopReason::EndTurn => "stop",
            StopReason::ToolUse => "tool_calls",
            StopReason::MaxTokens => "length",
        }
    }

    /// Gemini `finishReason`. Gemini has no tool vocabulary here; tool
    /// turns still complete as STOP.
    pub fn as_gemini(&self) -> &'static str {
        match self {
            StopReason::EndTurn | StopReason::ToolUse => "STOP",
            StopReason::MaxTokens => "MAX_TOKENS",
        }
    }
}
