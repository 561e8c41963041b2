use tracing::debug;

use crate::events::{StopReason, TurnEvent, UpstreamEvent, Usage};

/// Stateful reducer that turns the upstream event stream into canonical
/// [`TurnEvent`]s. One instance per turn.
///
/// `handle` never fails: malformed or unrecognized input degrades to
/// `Unknown`/`Ignored`. After the terminal finish every call returns
/// `Ignored` with no side effects.
pub struct TurnNormalizer {
    model: String,
    input_tokens: u32,
    output_tokens: u32,
    text_buf: String,
    reasoning_buf: String,
    /// Index of the most recently opened block, if any.
    block_index: Option<usize>,
    in_text: bool,
    in_reasoning: bool,
    finished: bool,
}

impl TurnNormalizer {
    pub fn new(model: impl Into<String>, input_tokens: u32) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens: 0,
            text_buf: String::new(),
            reasoning_buf: String::new(),
            block_index: None,
            in_text: false,
            in_reasoning: false,
            finished: false,
        }
    }

    /// Consume one upstream event. Returns the canonical events it maps to;
    /// usually one, but a `text-delta` with no open text block synthesizes
    /// the missing `TextStart` first (some upstream model families skip the
    /// explicit start right after a reasoning block).
    pub fn handle(&mut self, event: UpstreamEvent) -> Vec<TurnEvent> {
        if self.finished {
            return vec![TurnEvent::Ignored];
        }

        match event {
            UpstreamEvent::StepStart => vec![TurnEvent::StepStart],

            UpstreamEvent::ReasoningStart => {
                self.in_reasoning = true;
                let index = self.open_block();
                vec![TurnEvent::ReasoningStart { index }]
            }

            UpstreamEvent::ReasoningDelta { delta } => {
                let text = delta.unwrap_or_default();
                self.reasoning_buf.push_str(&text);
                vec![TurnEvent::ReasoningDelta {
                    index: self.current_index(),
                    text,
                }]
            }

            UpstreamEvent::ReasoningEnd => {
                self.in_reasoning = false;
                vec![TurnEvent::ReasoningEnd {
                    index: self.current_index(),
                }]
            }

            UpstreamEvent::TextStart => {
                self.in_text = true;
                let index = self.open_block();
                vec![TurnEvent::TextStart { index }]
            }

            UpstreamEvent::TextDelta { delta } => {
                let text = delta.unwrap_or_default();
                self.text_buf.push_str(&text);
                if !self.in_text {
                    self.in_text = true;
                    let index = self.open_block();
                    return vec![
                        TurnEvent::TextStart { index },
                        TurnEvent::TextDelta { index, text },
                    ];
                }
                vec![TurnEvent::TextDelta {
                    index: self.current_index(),
                    text,
                }]
            }

            UpstreamEvent::TextEnd => {
                self.in_text = false;
                vec![TurnEvent::TextEnd {
                    index: self.current_index(),
                }]
            }

            UpstreamEvent::Finish {
                usage,
                finish_reason,
                is_final,
            } => {
                // `final: false` is a heartbeat, not a terminal event.
                if is_final == Some(false) {
                    return vec![TurnEvent::Ignored];
                }
                self.finished = true;
                let usage = usage.unwrap_or_default();
                self.output_tokens = usage
                    .output_tokens
                    .unwrap_or_else(|| self.text_buf.len().div_ceil(4) as u32);
                if let Some(input) = usage.input_tokens {
                    self.input_tokens = input;
                }
                vec![TurnEvent::Finish {
                    reason: StopReason::from_upstream(finish_reason.as_deref()),
                    usage: Usage {
                        input_tokens: self.input_tokens,
                        output_tokens: self.output_tokens,
                    },
                }]
            }

            UpstreamEvent::Unknown => {
                debug!(model = %self.model, "unknown upstream event type");
                vec![TurnEvent::Unknown]
            }
        }
    }

    /// Concatenation of every text delta seen so far. Valid mid-stream.
    pub fn full_text(&self) -> &str {
        &self.text_buf
    }

    /// Concatenation of every reasoning delta seen so far.
    pub fn full_reasoning(&self) -> &str {
        &self.reasoning_buf
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn input_tokens(&self) -> u32 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u32 {
        self.output_tokens
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn open_block(&mut self) -> usize {
        let next = self.block_index.map_or(0, |i| i + 1);
        self.block_index = Some(next);
        next
    }

    fn current_index(&self) -> usize {
        self.block_index.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_delta(s: &str) -> UpstreamEvent {
        UpstreamEvent::TextDelta {
            delta: Some(s.into()),
        }
    }

    fn final_finish() -> UpstreamEvent {
        UpstreamEvent::Finish {
            usage: None,
            finish_reason: None,
            is_final: Some(true),
        }
    }

    #[test]
    fn indices_increase_per_block() {
        let mut n = TurnNormalizer::new("m", 0);
        assert_eq!(
            n.handle(UpstreamEvent::ReasoningStart),
            vec![TurnEvent::ReasoningStart { index: 0 }]
        );
        assert_eq!(
            n.handle(UpstreamEvent::ReasoningEnd),
            vec![TurnEvent::ReasoningEnd { index: 0 }]
        );
        assert_eq!(
            n.handle(UpstreamEvent::TextStart),
            vec![TurnEvent::TextStart { index: 1 }]
        );
        assert_eq!(
            n.handle(UpstreamEvent::TextEnd),
            vec![TurnEvent::TextEnd { index: 1 }]
        );
    }

    #[test]
    fn text_delta_without_start_synthesizes_one() {
        let mut n = TurnNormalizer::new("m", 0);
        n.handle(UpstreamEvent::ReasoningStart);
        n.handle(UpstreamEvent::ReasoningEnd);

        let events = n.handle(text_delta("Hello"));
        assert_eq!(
            events,
            vec![
                TurnEvent::TextStart { index: 1 },
                TurnEvent::TextDelta {
                    index: 1,
                    text: "Hello".into()
                },
            ]
        );
        assert_eq!(n.full_text(), "Hello");

        // Subsequent deltas reuse the open block
        let events = n.handle(text_delta(" there"));
        assert_eq!(
            events,
            vec![TurnEvent::TextDelta {
                index: 1,
                text: " there".into()
            }]
        );
    }

    #[test]
    fn finish_is_terminal_and_sticky() {
        let mut n = TurnNormalizer::new("m", 12);
        n.handle(UpstreamEvent::TextStart);
        n.handle(text_delta("Hi"));

        let events = n.handle(final_finish());
        assert_eq!(events.len(), 1);
        match &events[0] {
            TurnEvent::Finish { reason, usage } => {
                assert_eq!(*reason, StopReason::EndTurn);
                assert_eq!(usage.input_tokens, 12);
                // ceil(2 / 4) = 1
                assert_eq!(usage.output_tokens, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(n.is_finished());

        assert_eq!(n.handle(text_delta("late")), vec![TurnEvent::Ignored]);
        assert_eq!(n.handle(final_finish()), vec![TurnEvent::Ignored]);
        assert_eq!(n.full_text(), "Hi");
    }

    #[test]
    fn non_final_finish_is_a_heartbeat() {
        let mut n = TurnNormalizer::new("m", 0);
        let events = n.handle(UpstreamEvent::Finish {
            usage: None,
            finish_reason: None,
            is_final: Some(false),
        });
        assert_eq!(events, vec![TurnEvent::Ignored]);
        assert!(!n.is_finished());

        // A finish without the flag is terminal.
        let events = n.handle(UpstreamEvent::Finish {
            usage: None,
            finish_reason: None,
            is_final: None,
        });
        assert!(matches!(events[0], TurnEvent::Finish { .. }));
    }

    #[test]
    fn upstream_usage_wins_over_estimate() {
        let mut n = TurnNormalizer::new("m", 0);
        n.handle(text_delta("some long text that would estimate differently"));
        let events = n.handle(UpstreamEvent::Finish {
            usage: Some(crate::events::UpstreamUsage {
                input_tokens: Some(100),
                output_tokens: Some(42),
            }),
            finish_reason: Some("tool_use".into()),
            is_final: Some(true),
        });
        match &events[0] {
            TurnEvent::Finish { reason, usage } => {
                assert_eq!(*reason, StopReason::ToolUse);
                assert_eq!(usage.input_tokens, 100);
                assert_eq!(usage.output_tokens, 42);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_changes_nothing() {
        let mut n = TurnNormalizer::new("m", 0);
        n.handle(UpstreamEvent::TextStart);
        assert_eq!(n.handle(UpstreamEvent::Unknown), vec![TurnEvent::Unknown]);
        let events = n.handle(text_delta("x"));
        assert_eq!(
            events,
            vec![TurnEvent::TextDelta {
                index: 0,
                text: "x".into()
            }]
        );
    }

    #[test]
    fn reasoning_delta_without_start_is_tolerated() {
        let mut n = TurnNormalizer::new("m", 0);
        let events = n.handle(UpstreamEvent::ReasoningDelta {
            delta: Some("thinking".into()),
        });
        assert_eq!(
            events,
            vec![TurnEvent::ReasoningDelta {
                index: 0,
                text: "thinking".into()
            }]
        );
        assert_eq!(n.full_reasoning(), "thinking");
    }
}
