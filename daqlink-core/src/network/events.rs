// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Connection Events
//!
//! Callbacks for state changes, so front ends can show status without
//! scraping logs.

use std::sync::Arc;

use super::message::{MessageId, MessageStatus};
use super::transport::{ConnectionState, PeerInfo};

/// Events emitted by a [`SocketComm`](super::SocketComm).
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The connection state changed.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// A peer connected (accepted or connected to).
    PeerConnected {
        peer: PeerInfo,
    },

    /// A tracked message changed status.
    MessageStatusChanged {
        message_id: MessageId,
        status: MessageStatus,
    },

    /// A background operation failed.
    Error {
        /// Error description.
        message: String,
    },
}

/// Event handler trait.
///
/// Handlers run on the thread that caused the event, including the
/// background accept thread, and must not block for long.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: ConnectionEvent);
}

/// Closure-backed event handler.
pub struct CallbackHandler<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        CallbackHandler { callback }
    }
}

impl<F> EventHandler for CallbackHandler<F>
where
    F: Fn(ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, event: ConnectionEvent) {
        (self.callback)(event);
    }
}

/// Fan-out to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        EventDispatcher {
            handlers: Vec::new(),
        }
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn clear_handlers(&mut self) {
        self.handlers.clear();
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn dispatch(&self, event: ConnectionEvent) {
        for handler in &self.handlers {
            handler.on_event(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_reaches_every_handler() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = EventDispatcher::new();
        for _ in 0..3 {
            let count = count.clone();
            dispatcher.add_handler(Arc::new(CallbackHandler::new(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            })));
        }

        dispatcher.dispatch(ConnectionEvent::Error {
            message: "boom".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
        dispatcher.clear_handlers();
        assert_eq!(dispatcher.handler_count(), 0);
    }
}
