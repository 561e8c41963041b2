//! The upstream seam: traits a transport implements to open turns against
//! the agent service, and the pull-based event stream the pipeline consumes.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::UpstreamError;
use crate::events::UpstreamEvent;
use crate::ids;
use crate::transcript::{Role, TurnMessage};

/// Supplies the short-lived bearer credential a transport presents when
/// opening a turn. Implementations typically cache and refresh.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String, UpstreamError>;
}

/// Opens one turn against the upstream agent service. The transport pushes
/// decoded events into the returned stream until the connection closes.
#[async_trait]
pub trait TurnSource: Send + Sync {
    async fn open_turn(
        &self,
        agent_id: &str,
        messages: &[TurnMessage],
        token: &str,
        turn_id: &str,
    ) -> Result<TurnStream, UpstreamError>;
}

/// Pull side of a turn's event channel. Backpressure is the channel bound:
/// a slow consumer stalls the transport instead of buffering unboundedly.
pub struct TurnStream {
    rx: mpsc::Receiver<UpstreamEvent>,
}

/// Push side, held by the transport task.
#[derive(Clone)]
pub struct TurnHandle {
    tx: mpsc::Sender<UpstreamEvent>,
}

impl TurnStream {
    pub fn channel(capacity: usize) -> (TurnHandle, TurnStream) {
        let (tx, rx) = mpsc::channel(capacity);
        (TurnHandle { tx }, TurnStream { rx })
    }

    /// Next upstream event, or `None` once the transport hung up.
    pub async fn next(&mut self) -> Option<UpstreamEvent> {
        self.rx.recv().await
    }
}

impl TurnHandle {
    /// Deliver one event. Returns `false` when the consumer is gone, which
    /// a transport should treat as its cue to tear the connection down.
    pub async fn send(&self, event: UpstreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// The opening payload a transport writes after connecting: the whole
/// transcript replayed under a fresh chat id. Assistant history rides in
/// `parts`, user history as plain `content`.
pub fn start_payload(agent_id: &str, messages: &[TurnMessage], token: &str, turn_id: &str) -> Value {
    let msgs: Vec<Value> = messages
        .iter()
        .map(|msg| {
            let msg_id = ids::message_id();
            match msg.role {
                Role::Assistant => json!({
                    "id": msg_id,
                    "role": "assistant",
                    "parts": [{ "id": format!("{msg_id}_part"), "type": "text", "text": msg.content }],
                }),
                Role::User => json!({
                    "id": msg_id,
                    "role": "user",
                    "content": msg.content,
                }),
            }
        })
        .collect();

    json!({
        "type": "start",
        "payload": {
            "id_token": token,
            "context": {
                "chat": { "id": turn_id, "msgs": msgs },
                "type": "chat",
                "gummie_id": agent_id,
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_payload_splits_roles() {
        let messages = vec![
            TurnMessage {
                role: Role::User,
                content: "hi".into(),
            },
            TurnMessage {
                role: Role::Assistant,
                content: "hello".into(),
            },
        ];
        let payload = start_payload("agent-1", &messages, "tok", "turn123");
        assert_eq!(payload["type"], "start");
        assert_eq!(payload["payload"]["id_token"], "tok");
        assert_eq!(payload["payload"]["context"]["chat"]["id"], "turn123");
        assert_eq!(payload["payload"]["context"]["gummie_id"], "agent-1");

        let msgs = payload["payload"]["context"]["chat"]["msgs"].as_array().unwrap();
        assert_eq!(msgs[0]["content"], "hi");
        assert!(msgs[0].get("parts").is_none());
        assert_eq!(msgs[1]["parts"][0]["text"], "hello");
        assert_eq!(msgs[1]["parts"][0]["type"], "text");
    }

    #[tokio::test]
    async fn stream_delivers_in_order_and_ends_on_drop() {
        let (handle, mut stream) = TurnStream::channel(8);
        assert!(handle.send(UpstreamEvent::TextStart).await);
        assert!(
            handle
                .send(UpstreamEvent::TextDelta {
                    delta: Some("x".into())
                })
                .await
        );
        drop(handle);

        assert!(matches!(stream.next().await, Some(UpstreamEvent::TextStart)));
        assert!(matches!(
            stream.next().await,
            Some(UpstreamEvent::TextDelta { .. })
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_consumer_is_visible_to_transport() {
        let (handle, stream) = TurnStream::channel(1);
        drop(stream);
        assert!(handle.is_closed());
        assert!(!handle.send(UpstreamEvent::TextEnd).await);
    }
}
