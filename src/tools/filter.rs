//! Incremental redaction of `<tool_use>` markup from a live text stream.
//!
//! Raw upstream deltas interleave genuine prose with tool-invocation markup
//! at arbitrary chunk boundaries. The filter forwards prose as early as it
//! can prove the text is not the start of an opening marker, and never emits
//! a partial tag fragment.

const OPEN_MARKER: &str = "<tool_use";
const CLOSE_MARKER: &str = "</tool_use>";

/// Per-turn stateful buffer between the normalizer's text deltas and a
/// downstream encoder.
///
/// Invariant: the concatenation of everything returned by `push` and
/// `flush` equals the input with every well-formed
/// `<tool_use>…</tool_use>` span removed, for any chunking of the input.
#[derive(Debug, Default)]
pub struct ToolUseFilter {
    buffer: String,
    in_tool_block: bool,
}

impl ToolUseFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one delta; returns prose that is now safe to show.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.buffer.push_str(delta);
        let mut safe = String::new();

        // Consume every complete marker in the buffer. A single chunk can
        // carry more than one whole tool block.
        loop {
            if !self.in_tool_block {
                match self.buffer.find(OPEN_MARKER) {
                    Some(k) => {
                        safe.push_str(&self.buffer[..k]);
                        self.buffer.drain(..k);
                        self.in_tool_block = true;
                    }
                    None => break,
                }
            }
            match self.buffer.find(CLOSE_MARKER) {
                Some(k) => {
                    self.buffer.drain(..k + CLOSE_MARKER.len());
                    self.in_tool_block = false;
                }
                None => break,
            }
        }

        if !self.in_tool_block && !self.buffer.is_empty() {
            // Withhold a suffix that might be the start of a not-yet-complete
            // opening marker.
            match self.buffer.rfind('<') {
                Some(k) => {
                    safe.push_str(&self.buffer[..k]);
                    self.buffer.drain(..k);
                }
                None => {
                    safe.push_str(&self.buffer);
                    self.buffer.clear();
                }
            }
        }

        if safe.is_empty() {
            None
        } else {
            Some(safe)
        }
    }

    /// Flush remaining safe content at stream end. Content of an unclosed
    /// tool block stays suppressed.
    pub fn flush(&mut self) -> Option<String> {
        if self.in_tool_block || self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    /// True while the buffer sits inside an unclosed `<tool_use>` block.
    pub fn in_tool_block(&self) -> bool {
        self.in_tool_block
    }
}
