//! Wire envelope exchanged between the master and its workers.
//!
//! Every message is a JSON object internally tagged by `type`:
//!
//! | type          | fields                                   | direction       |
//! |---------------|------------------------------------------|-----------------|
//! | `assign_role` | `role`, `modules`                        | Master → Worker |
//! | `role_ack`    | `role`, `ok`, `loaded`, `failed`         | Worker → Master |
//! | `task`        | `name`, `id`, `data`                     | Master → Worker |
//! | `result`      | `id`, `result` (may carry `error`)       | Worker → Master |
//! | `shutdown`    | -                                        | Master → Worker |
//!
//! Messages travel inside a topic-tagged [`Packet`]; packets on any other
//! topic are invisible to the protocol.

use chorus_env::{NetworkTransport, Packet, PeerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{trace, warn};

use crate::error::ProtocolError;

/// Opaque key/value payload carried by tasks and results.
pub type Payload = serde_json::Map<String, Value>;

/// Key under which a result payload reports a failure.
pub const ERROR_FIELD: &str = "error";

/// Correlation identifier linking a dispatched task to its result.
///
/// Issued monotonically by the master and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Assigns a role and the capability modules it needs.
    AssignRole {
        role: String,
        #[serde(default)]
        modules: Vec<String>,
    },
    
    /// Worker's answer to `assign_role`.
    RoleAck {
        role: String,
        ok: bool,
        #[serde(default)]
        loaded: Vec<String>,
        #[serde(default)]
        failed: Vec<String>,
    },
    
    /// A named task with its input payload.
    Task {
        name: String,
        id: TaskId,
        #[serde(default)]
        data: Payload,
    },
    
    /// The outcome of a task, echoing the task's id.
    #[serde(rename = "result")]
    TaskResult {
        id: TaskId,
        #[serde(default)]
        result: Payload,
    },
    
    /// Tells a worker to leave its serve loop.
    Shutdown,
}

impl Message {
    /// Returns the wire `type` tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::AssignRole { .. } => "assign_role",
            Message::RoleAck { .. } => "role_ack",
            Message::Task { .. } => "task",
            Message::TaskResult { .. } => "result",
            Message::Shutdown => "shutdown",
        }
    }
    
    /// Encodes the message into a packet on `topic`.
    pub fn encode(&self, topic: &str, timestamp_ms: u64) -> Result<Packet, ProtocolError> {
        let payload = serde_json::to_vec(self).map_err(ProtocolError::Encode)?;
        Ok(Packet::new(topic, payload, timestamp_ms))
    }
    
    /// Decodes a packet received on the transport.
    ///
    /// Returns `Ok(None)` for packets on another topic.
    pub fn decode(packet: &Packet, topic: &str) -> Result<Option<Message>, ProtocolError> {
        if !packet.has_topic(topic) {
            return Ok(None);
        }
        
        serde_json::from_slice(&packet.payload)
            .map(Some)
            .map_err(|source| ProtocolError::Malformed {
                topic: topic.to_string(),
                source,
            })
    }
}

/// Builds a result payload that carries an error message.
pub fn error_payload(message: impl Into<String>) -> Payload {
    let mut payload = Payload::new();
    payload.insert(ERROR_FIELD.to_string(), Value::String(message.into()));
    payload
}

/// Returns the error carried by a result payload, if any.
pub fn remote_error(payload: &Payload) -> Option<&str> {
    payload.get(ERROR_FIELD).and_then(Value::as_str)
}

/// Receives the next protocol message on `topic`.
///
/// Foreign-topic and malformed packets are skipped. Returns `None` once the
/// transport is closed.
pub async fn recv_message<Net: NetworkTransport>(net: &Net, topic: &str) -> Option<(PeerId, Message)> {
    loop {
        let (sender, packet) = net.recv().await?;
        match Message::decode(&packet, topic) {
            Ok(Some(message)) => return Some((sender, message)),
            Ok(None) => trace!(%sender, topic = %packet.topic, "ignoring packet on foreign topic"),
            Err(err) => warn!(%sender, error = %err, "dropping malformed packet"),
        }
    }
}

/// Resolves once the stop flag is raised.
///
/// If the sender side goes away without raising it, this never resolves.
pub(crate) async fn stop_signalled(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn to_json(message: &Message) -> Value {
        serde_json::to_value(message).unwrap()
    }

    #[test]
    fn test_wire_shapes() {
        let assign = Message::AssignRole {
            role: "memory".into(),
            modules: vec!["memory_store".into()],
        };
        assert_eq!(
            to_json(&assign),
            json!({"type": "assign_role", "role": "memory", "modules": ["memory_store"]})
        );
        
        let mut data = Payload::new();
        data.insert("text".into(), json!("hello"));
        let task = Message::Task { name: "reply".into(), id: TaskId(7), data };
        assert_eq!(
            to_json(&task),
            json!({"type": "task", "name": "reply", "id": 7, "data": {"text": "hello"}})
        );
        
        let result = Message::TaskResult { id: TaskId(7), result: error_payload("boom") };
        assert_eq!(
            to_json(&result),
            json!({"type": "result", "id": 7, "result": {"error": "boom"}})
        );
        
        assert_eq!(to_json(&Message::Shutdown), json!({"type": "shutdown"}));
    }

    #[test]
    fn test_role_ack_without_failed_field() {
        let raw = json!({"type": "role_ack", "role": "neural", "ok": true, "loaded": ["attention"]});
        let message: Message = serde_json::from_value(raw).unwrap();
        assert_eq!(
            message,
            Message::RoleAck {
                role: "neural".into(),
                ok: true,
                loaded: vec!["attention".into()],
                failed: vec![],
            }
        );
    }

    #[test]
    fn test_decode_filters_topic() {
        let packet = Message::Shutdown.encode("chorus", 5).unwrap();
        assert_eq!(packet.timestamp_ms, 5);
        assert_eq!(Message::decode(&packet, "chorus").unwrap(), Some(Message::Shutdown));
        assert_eq!(Message::decode(&packet, "chat").unwrap(), None);
    }

    #[test]
    fn test_decode_malformed() {
        let packet = Packet::new("chorus", b"{\"type\":\"warp\"}".to_vec(), 0);
        let err = Message::decode(&packet, "chorus").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed { .. }));
    }

    #[test]
    fn test_remote_error() {
        assert_eq!(remote_error(&error_payload("unknown task: x")), Some("unknown task: x"));
        
        let mut ok = Payload::new();
        ok.insert("pong".into(), json!(true));
        assert_eq!(remote_error(&ok), None);
        
        // A non-string error field is not an error report
        let mut odd = Payload::new();
        odd.insert(ERROR_FIELD.into(), json!(3));
        assert_eq!(remote_error(&odd), None);
    }

    #[test]
    fn test_kind_matches_tag() {
        let messages = [
            Message::AssignRole { role: "a".into(), modules: vec![] },
            Message::RoleAck { role: "a".into(), ok: false, loaded: vec![], failed: vec![] },
            Message::Task { name: "t".into(), id: TaskId(1), data: Payload::new() },
            Message::TaskResult { id: TaskId(1), result: Payload::new() },
            Message::Shutdown,
        ];
        for message in messages {
            assert_eq!(to_json(&message)["type"], json!(message.kind()));
        }
    }
}
