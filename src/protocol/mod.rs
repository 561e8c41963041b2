pub mod anthropic;
pub mod gemini;
pub mod openai;

use crate::events::{StopReason, TurnEvent, Usage};
use crate::tools::ToolUse;

/// One downstream wire format, driven by the canonical event stream.
///
/// Implementations are per-turn state machines: they own block bookkeeping,
/// the tool-markup filter when tools are in play, and the duty to terminate
/// the client's stream even when the upstream dies early.
pub trait StreamEncoder: Send {
    /// Frames sent before any upstream event (message envelope, role
    /// preamble). May be empty for formats without preamble framing.
    fn begin(&mut self) -> Vec<String>;

    /// Frames for one canonical event.
    fn handle(&mut self, event: &TurnEvent) -> Vec<String>;

    /// Best-effort terminal frames when the upstream ended without a
    /// terminal finish. No-op if the stream already terminated properly.
    fn finish_abrupt(&mut self) -> Vec<String>;

    /// A single in-band error frame in this wire format.
    fn error_frame(&self, message: &str) -> String;
}

/// Everything a completed (buffered) turn produced, ready for the
/// per-protocol non-streaming assemblers.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub model: String,
    /// Visible assistant text, with tool markup already stripped.
    pub text: String,
    pub reasoning: String,
    pub tool_uses: Vec<ToolUse>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}
