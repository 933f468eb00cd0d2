// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network Message Types
//!
//! Message roles, lifecycle states and the tracked message record.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{NetworkError, NetworkResult};

/// Unique message identifier (UUID v4) used to match responses.
pub type MessageId = String;

/// An opaque JSON object payload with string keys, in insertion order.
pub type JsonMap = serde_json::Map<String, Value>;

/// Semantic role of a message. Does not affect framing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    /// Instruction for the peer (start recording, poll status, ...).
    Command,
    /// Answer to a previously sent command.
    Response,
    /// Unsolicited notification.
    Event,
    /// Periodic low-payload liveness / latency probe.
    Heartbeat,
}

/// Lifecycle state of a tracked message.
///
/// Transitions are monotonic: `Pending -> Sent -> {Acknowledged | Failed}`,
/// plus `Pending -> Failed` when the send itself fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
}

impl MessageStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [MessageStatus; 4] = [
        MessageStatus::Pending,
        MessageStatus::Sent,
        MessageStatus::Acknowledged,
        MessageStatus::Failed,
    ];

    /// Returns true for `Acknowledged` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Acknowledged | MessageStatus::Failed)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        matches!(
            (self, next),
            (MessageStatus::Pending, MessageStatus::Sent)
                | (MessageStatus::Pending, MessageStatus::Failed)
                | (MessageStatus::Sent, MessageStatus::Acknowledged)
                | (MessageStatus::Sent, MessageStatus::Failed)
        )
    }
}

/// A tracked unit of communication.
///
/// Created by the sending side when a payload is queued and updated as
/// send/ack/failure events occur. Records live only as long as the
/// connection that tracks them.
#[derive(Debug, Clone)]
pub struct SocketMessage {
    id: MessageId,
    message_type: MessageType,
    status: MessageStatus,
    payload: JsonMap,
    created_at: Instant,
    last_updated: Instant,
    round_trip_latency: Option<Duration>,
}

impl SocketMessage {
    /// Creates a pending message with a fresh id.
    pub fn new(message_type: MessageType, payload: JsonMap) -> Self {
        Self::new_at(message_type, payload, Instant::now())
    }

    /// Creates a pending message with an explicit creation time.
    pub fn new_at(message_type: MessageType, payload: JsonMap, created_at: Instant) -> Self {
        SocketMessage {
            id: uuid::Uuid::new_v4().to_string(),
            message_type,
            status: MessageStatus::Pending,
            payload,
            created_at,
            last_updated: created_at,
            round_trip_latency: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn payload(&self) -> &JsonMap {
        &self.payload
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_updated(&self) -> Instant {
        self.last_updated
    }

    /// Time between creation and acknowledgement, once acknowledged.
    pub fn round_trip_latency(&self) -> Option<Duration> {
        self.round_trip_latency
    }

    /// Applies a status transition at `timestamp`.
    ///
    /// Timestamps earlier than `created_at` are clamped so that
    /// `last_updated >= created_at` always holds. The round-trip latency is
    /// recorded on the transition into `Acknowledged`, which happens at most
    /// once.
    pub fn transition(&mut self, next: MessageStatus, timestamp: Instant) -> NetworkResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(NetworkError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let timestamp = timestamp.max(self.created_at);
        self.status = next;
        self.last_updated = timestamp;
        if next == MessageStatus::Acknowledged {
            self.round_trip_latency = Some(timestamp.duration_since(self.created_at));
        }
        Ok(())
    }

    /// Wire form of this message: `{"id", "type", "payload"}`.
    pub fn to_envelope(&self) -> MessageEnvelope {
        MessageEnvelope {
            id: Some(self.id.clone()),
            message_type: self.message_type,
            payload: self.payload.clone(),
            reply_to: None,
        }
    }
}

/// Envelope convention for tracked traffic.
///
/// The transport itself treats every payload as opaque; this is the shape
/// used when the caller wants ids and reply matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEnvelope {
    /// Sender-assigned id, absent for untracked messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Message role.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Opaque application payload.
    #[serde(default)]
    pub payload: JsonMap,
    /// Id of the command this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

impl MessageEnvelope {
    /// Creates a response envelope answering `command_id`.
    pub fn response_to(command_id: &str, payload: JsonMap) -> Self {
        MessageEnvelope {
            id: Some(uuid::Uuid::new_v4().to_string()),
            message_type: MessageType::Response,
            payload,
            reply_to: Some(command_id.to_string()),
        }
    }

    /// Creates an untracked heartbeat envelope.
    pub fn heartbeat() -> Self {
        MessageEnvelope {
            id: None,
            message_type: MessageType::Heartbeat,
            payload: JsonMap::new(),
            reply_to: None,
        }
    }

    /// Parses an envelope out of a received JSON object.
    pub fn from_json_map(map: JsonMap) -> NetworkResult<Self> {
        serde_json::from_value(Value::Object(map))
            .map_err(|e| NetworkError::MalformedMessage(format!("not an envelope: {}", e)))
    }

    /// Converts the envelope into a JSON object ready for sending.
    pub fn to_json_map(&self) -> NetworkResult<JsonMap> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(NetworkError::Serialization(
                "envelope did not serialize to an object".into(),
            )),
            Err(e) => Err(NetworkError::Serialization(e.to_string())),
        }
    }
}

// INLINE_TEST_REQUIRED: Tests clamping of private timestamps
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> JsonMap {
        json!({"cmd": "start_daq"}).as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_message_is_pending() {
        let msg = SocketMessage::new(MessageType::Command, payload());
        assert_eq!(msg.status(), MessageStatus::Pending);
        assert_eq!(msg.created_at(), msg.last_updated());
        assert!(msg.round_trip_latency().is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = SocketMessage::new(MessageType::Command, JsonMap::new());
        let b = SocketMessage::new(MessageType::Command, JsonMap::new());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_early_timestamp_is_clamped() {
        let created = Instant::now() + Duration::from_secs(10);
        let mut msg = SocketMessage::new_at(MessageType::Command, payload(), created);

        msg.transition(MessageStatus::Sent, Instant::now()).unwrap();
        assert_eq!(msg.last_updated, created);
        assert!(msg.last_updated >= msg.created_at);
    }

    #[test]
    fn test_latency_set_on_acknowledge() {
        let created = Instant::now();
        let mut msg = SocketMessage::new_at(MessageType::Command, payload(), created);
        msg.transition(MessageStatus::Sent, created + Duration::from_millis(1))
            .unwrap();
        msg.transition(MessageStatus::Acknowledged, created + Duration::from_millis(25))
            .unwrap();

        assert_eq!(msg.round_trip_latency(), Some(Duration::from_millis(25)));
    }

    #[test]
    fn test_type_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&MessageType::Heartbeat).unwrap(),
            "\"HEARTBEAT\""
        );
        assert_eq!(
            serde_json::to_string(&MessageStatus::Acknowledged).unwrap(),
            "\"ACKNOWLEDGED\""
        );
    }

    #[test]
    fn test_envelope_without_id_parses() {
        let map = json!({"type": "COMMAND", "payload": {"cmd": "start_daq"}})
            .as_object()
            .cloned()
            .unwrap();
        let envelope = MessageEnvelope::from_json_map(map).unwrap();
        assert_eq!(envelope.id, None);
        assert_eq!(envelope.message_type, MessageType::Command);
        assert_eq!(envelope.payload, payload());
    }

    #[test]
    fn test_envelope_with_unknown_type_is_malformed() {
        let map = json!({"type": "GOSSIP"}).as_object().cloned().unwrap();
        assert!(matches!(
            MessageEnvelope::from_json_map(map),
            Err(NetworkError::MalformedMessage(_))
        ));
    }
}
