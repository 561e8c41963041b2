pub mod error;
pub mod events;
pub mod ids;
pub mod models;
pub mod normalizer;
pub mod protocol;
pub mod tools;
pub mod transcript;
pub mod turn;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use error::{RelayError, UpstreamError};
pub use events::{StopReason, TurnEvent, UpstreamEvent, Usage};
pub use models::{is_valid_model, map_model, AVAILABLE_MODELS};
pub use normalizer::TurnNormalizer;
pub use protocol::anthropic::MessagesStreamEncoder;
pub use protocol::gemini::GeminiStreamEncoder;
pub use protocol::openai::{ChatStreamEncoder, ResponsesStreamEncoder};
pub use protocol::{StreamEncoder, TurnOutcome};
pub use tools::{detect_tool_loop, parse_tool_calls, ToolResult, ToolSpec, ToolUse};
pub use transcript::IncomingMessage;
pub use turn::{CredentialProvider, TurnHandle, TurnSource, TurnStream};

/// Default for how many identical trailing tool calls count as a loop.
const DEFAULT_LOOP_THRESHOLD: usize = 3;

/// Everything one downstream request contributes to a turn, already decoded
/// from whichever provider protocol it arrived in.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub agent_id: String,
    pub model: String,
    pub messages: Vec<IncomingMessage>,
    pub tools: Vec<ToolSpec>,
    pub system: Option<String>,
    pub thinking: bool,
    pub turn_id: Option<String>,
}

impl TurnRequest {
    pub fn new(
        agent_id: impl Into<String>,
        model: impl Into<String>,
        messages: Vec<IncomingMessage>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            model: model.into(),
            messages,
            tools: Vec::new(),
            system: None,
            thinking: false,
            turn_id: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_thinking(mut self, thinking: bool) -> Self {
        self.thinking = thinking;
        self
    }

    pub fn with_turn_id(mut self, turn_id: impl Into<String>) -> Self {
        self.turn_id = Some(turn_id.into());
        self
    }

    fn tools_enabled(&self) -> bool {
        !self.tools.is_empty()
    }
}

/// The translation pipeline. Wire up a turn source and a credential
/// provider, then drive per-request encoders through it.
pub struct Relay {
    source: Box<dyn TurnSource>,
    credentials: Box<dyn CredentialProvider>,
    loop_threshold: usize,
}

impl Relay {
    pub fn new(
        source: impl TurnSource + 'static,
        credentials: impl CredentialProvider + 'static,
    ) -> Self {
        Self {
            source: Box::new(source),
            credentials: Box::new(credentials),
            loop_threshold: DEFAULT_LOOP_THRESHOLD,
        }
    }

    pub fn with_loop_threshold(mut self, threshold: usize) -> Self {
        self.loop_threshold = threshold;
        self
    }

    /// Run one turn, forwarding encoder frames as they become available.
    ///
    /// On cancellation the upstream stream is dropped and no further frames
    /// are sent. If the upstream ends without a terminal finish, the
    /// encoder's abrupt-termination frames go out so the client's stream
    /// still ends well-formed. Upstream failures surface as one in-band
    /// error frame before the error is returned.
    pub async fn run_streaming(
        &self,
        req: TurnRequest,
        encoder: &mut dyn StreamEncoder,
        frames: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<(), RelayError> {
        self.preflight(&req)?;
        let messages = convert_transcript(&req);
        let turn_id = req.turn_id.clone().unwrap_or_else(ids::turn_id);

        for frame in encoder.begin() {
            if frames.send(frame).await.is_err() {
                return Err(RelayError::Cancelled);
            }
        }

        let mut stream = match self.open(&req, &messages, &turn_id).await {
            Ok(stream) => stream,
            Err(err) => {
                let _ = frames.send(encoder.error_frame(&err.to_string())).await;
                return Err(err.into());
            }
        };

        let mut normalizer = TurnNormalizer::new(req.model.clone(), 0);
        info!(turn_id = %turn_id, model = %req.model, "turn opened");

        loop {
            let upstream = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(turn_id = %turn_id, "turn cancelled by client");
                    return Err(RelayError::Cancelled);
                }
                ev = stream.next() => ev,
            };

            let Some(upstream) = upstream else {
                if !normalizer.is_finished() {
                    warn!(turn_id = %turn_id, "upstream ended without finish");
                    for frame in encoder.finish_abrupt() {
                        let _ = frames.send(frame).await;
                    }
                }
                return Ok(());
            };

            for event in normalizer.handle(upstream) {
                let terminal = matches!(event, TurnEvent::Finish { .. });
                for frame in encoder.handle(&event) {
                    if frames.send(frame).await.is_err() {
                        return Err(RelayError::Cancelled);
                    }
                }
                if terminal {
                    debug!(turn_id = %turn_id, output_tokens = normalizer.output_tokens(), "turn finished");
                    return Ok(());
                }
            }
        }
    }

    /// Run one turn to completion and return its aggregate outcome, for the
    /// non-streaming response assemblers.
    pub async fn run_buffered(&self, req: TurnRequest) -> Result<TurnOutcome, RelayError> {
        self.preflight(&req)?;
        let messages = convert_transcript(&req);
        let turn_id = req.turn_id.clone().unwrap_or_else(ids::turn_id);

        let mut stream = self.open(&req, &messages, &turn_id).await?;
        let mut normalizer = TurnNormalizer::new(req.model.clone(), 0);
        let mut stop_reason = StopReason::EndTurn;
        let mut usage = Usage::default();
        let mut finished = false;

        while let Some(upstream) = stream.next().await {
            for event in normalizer.handle(upstream) {
                if let TurnEvent::Finish {
                    reason,
                    usage: turn_usage,
                } = event
                {
                    stop_reason = reason;
                    usage = turn_usage;
                    finished = true;
                }
            }
            if finished {
                break;
            }
        }

        if !finished {
            warn!(turn_id = %turn_id, "upstream ended without finish");
            usage = Usage {
                input_tokens: normalizer.input_tokens(),
                output_tokens: normalizer.full_text().len().div_ceil(4) as u32,
            };
        }

        let (text, tool_uses) = if req.tools_enabled() {
            let parsed = parse_tool_calls(normalizer.full_text());
            if !parsed.calls.is_empty() {
                stop_reason = StopReason::ToolUse;
            }
            (parsed.remaining_text, parsed.calls)
        } else {
            (normalizer.full_text().to_string(), Vec::new())
        };

        Ok(TurnOutcome {
            model: req.model,
            text,
            reasoning: normalizer.full_reasoning().to_string(),
            tool_uses,
            stop_reason,
            usage,
        })
    }

    fn preflight(&self, req: &TurnRequest) -> Result<(), RelayError> {
        if req.tools_enabled() {
            if let Some(reason) = detect_tool_loop(&req.messages, self.loop_threshold) {
                return Err(RelayError::LoopDetected(reason));
            }
        }
        Ok(())
    }

    async fn open(
        &self,
        req: &TurnRequest,
        messages: &[transcript::TurnMessage],
        turn_id: &str,
    ) -> Result<TurnStream, UpstreamError> {
        let token = self.credentials.bearer_token().await?;
        self.source
            .open_turn(&req.agent_id, messages, &token, turn_id)
            .await
    }
}

fn convert_transcript(req: &TurnRequest) -> Vec<transcript::TurnMessage> {
    if req.tools_enabled() || req.system.is_some() {
        transcript::flatten_with_tools(&req.messages, &req.tools, req.system.as_deref())
    } else {
        transcript::flatten_simple(&req.messages)
    }
}
