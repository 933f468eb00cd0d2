// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Tracker
//!
//! In-flight bookkeeping for messages sent over one connection.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::error::{NetworkError, NetworkResult};
use super::message::{JsonMap, MessageId, MessageStatus, MessageType, SocketMessage};

/// Table of tracked messages keyed by id.
///
/// The tracker itself is not synchronized; [`SocketComm`](super::SocketComm)
/// keeps it behind a mutex so the sending path and the path processing
/// acknowledgements can both update it.
#[derive(Debug, Default)]
pub struct MessageTracker {
    messages: HashMap<MessageId, SocketMessage>,
}

impl MessageTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        MessageTracker {
            messages: HashMap::new(),
        }
    }

    /// Starts tracking a new pending message and returns its id.
    pub fn track(&mut self, message_type: MessageType, payload: JsonMap) -> MessageId {
        self.insert(SocketMessage::new(message_type, payload))
    }

    /// Starts tracking an existing record.
    pub fn insert(&mut self, message: SocketMessage) -> MessageId {
        let id = message.id().to_string();
        self.messages.insert(id.clone(), message);
        id
    }

    /// Applies a status transition to the message with `message_id`.
    ///
    /// Fails with `UnknownMessageId` if nothing matches and with
    /// `InvalidTransition` if the change is not allowed. On success returns
    /// the updated record.
    pub fn update_messages(
        &mut self,
        message_id: &str,
        new_status: MessageStatus,
        timestamp: Instant,
    ) -> NetworkResult<&SocketMessage> {
        let message = self
            .messages
            .get_mut(message_id)
            .ok_or_else(|| NetworkError::UnknownMessageId(message_id.to_string()))?;
        message.transition(new_status, timestamp)?;
        Ok(message)
    }

    /// Returns the tracked message with `message_id`.
    pub fn get(&self, message_id: &str) -> Option<&SocketMessage> {
        self.messages.get(message_id)
    }

    /// Marks sent messages older than `ack_timeout` as failed.
    ///
    /// Returns the ids of the messages that timed out.
    pub fn check_timeouts(&mut self, ack_timeout: Duration, now: Instant) -> Vec<MessageId> {
        let mut timed_out = Vec::new();
        for (id, message) in self.messages.iter_mut() {
            if message.status() == MessageStatus::Sent
                && now.saturating_duration_since(message.last_updated()) > ack_timeout
                && message.transition(MessageStatus::Failed, now).is_ok()
            {
                timed_out.push(id.clone());
            }
        }
        timed_out
    }

    /// Drops acknowledged and failed messages. Returns how many were removed.
    pub fn purge_completed(&mut self) -> usize {
        let before = self.messages.len();
        self.messages.retain(|_, m| !m.status().is_terminal());
        before - self.messages.len()
    }

    /// Ids of messages that are pending or sent.
    pub fn in_flight_ids(&self) -> Vec<MessageId> {
        self.messages
            .values()
            .filter(|m| !m.status().is_terminal())
            .map(|m| m.id().to_string())
            .collect()
    }

    /// Number of tracked messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Forgets all messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_timeouts_only_fails_sent() {
        let mut tracker = MessageTracker::new();
        let start = Instant::now();
        let pending = tracker.track(MessageType::Command, JsonMap::new());
        let sent = tracker.track(MessageType::Command, JsonMap::new());
        tracker
            .update_messages(&sent, MessageStatus::Sent, start)
            .unwrap();

        let later = start + Duration::from_secs(31);
        let timed_out = tracker.check_timeouts(Duration::from_secs(30), later);

        assert_eq!(timed_out, vec![sent.clone()]);
        assert_eq!(tracker.get(&sent).unwrap().status(), MessageStatus::Failed);
        assert_eq!(
            tracker.get(&pending).unwrap().status(),
            MessageStatus::Pending
        );
    }

    #[test]
    fn test_purge_completed_keeps_in_flight() {
        let mut tracker = MessageTracker::new();
        let now = Instant::now();
        let a = tracker.track(MessageType::Command, JsonMap::new());
        let b = tracker.track(MessageType::Event, JsonMap::new());
        tracker.update_messages(&a, MessageStatus::Failed, now).unwrap();

        assert_eq!(tracker.purge_completed(), 1);
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.in_flight_ids(), vec![b]);
    }
}
