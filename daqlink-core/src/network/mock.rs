// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test doubles for the framing layer and for collaborators of the channel.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::error::{NetworkError, NetworkResult};
use super::framing::ChunkSource;
use super::message::JsonMap;
use super::transport::JsonChannel;

#[derive(Debug, Clone)]
enum Step {
    Data(Vec<u8>),
    Timeout,
}

/// A [`ChunkSource`] that replays fixed receive results.
///
/// Each `recv` returns at most one scripted chunk, so the boundaries of the
/// script are exactly the boundaries the reader observes. A chunk larger
/// than the caller's buffer is split and the rest returned next time. An
/// exhausted script reports end of stream.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    steps: VecDeque<Step>,
    recv_calls: usize,
}

impl ScriptedSource {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        ScriptedSource {
            steps: chunks
                .into_iter()
                .map(|c| Step::Data(c.as_ref().to_vec()))
                .collect(),
            recv_calls: 0,
        }
    }

    pub fn push_chunk(&mut self, chunk: impl AsRef<[u8]>) {
        self.steps.push_back(Step::Data(chunk.as_ref().to_vec()));
    }

    /// Scripts one `ReadTimeout`.
    pub fn push_timeout(&mut self) {
        self.steps.push_back(Step::Timeout);
    }

    /// Number of `recv` calls made so far.
    pub fn recv_calls(&self) -> usize {
        self.recv_calls
    }

    /// Scripted steps not yet consumed.
    pub fn remaining(&self) -> usize {
        self.steps.len()
    }
}

impl ChunkSource for ScriptedSource {
    fn recv(&mut self, buf: &mut [u8]) -> NetworkResult<usize> {
        self.recv_calls += 1;
        match self.steps.pop_front() {
            None => Ok(0),
            Some(Step::Timeout) => Err(NetworkError::ReadTimeout),
            Some(Step::Data(mut chunk)) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    let rest = chunk.split_off(n);
                    self.steps.push_front(Step::Data(rest));
                }
                Ok(n)
            }
        }
    }
}

/// In-memory [`JsonChannel`] for testing code layered on the transport.
///
/// # Example
///
/// ```ignore
/// let channel = MockChannel::new();
/// channel.queue_receive(reply);
/// command_layer.run(&channel)?;
/// assert_eq!(channel.sent_messages().len(), 1);
/// ```
#[derive(Debug)]
pub struct MockChannel {
    sent: Mutex<Vec<JsonMap>>,
    incoming: Mutex<VecDeque<JsonMap>>,
    connected: Mutex<bool>,
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    /// Creates a connected mock channel.
    pub fn new() -> Self {
        MockChannel {
            sent: Mutex::new(Vec::new()),
            incoming: Mutex::new(VecDeque::new()),
            connected: Mutex::new(true),
        }
    }

    /// Queues a payload for the next `receive_json`.
    pub fn queue_receive(&self, payload: JsonMap) {
        self.incoming.lock().push_back(payload);
    }

    /// Everything sent so far, in order.
    pub fn sent_messages(&self) -> Vec<JsonMap> {
        self.sent.lock().clone()
    }

    pub fn set_connected(&self, connected: bool) {
        *self.connected.lock() = connected;
    }
}

impl JsonChannel for MockChannel {
    fn send_json(&self, payload: &JsonMap) -> NetworkResult<()> {
        if !*self.connected.lock() {
            return Err(NetworkError::NotConnected);
        }
        self.sent.lock().push(payload.clone());
        Ok(())
    }

    /// Returns the next queued payload, `ConnectionClosed` once the queue
    /// is empty.
    fn receive_json(&self) -> NetworkResult<JsonMap> {
        if !*self.connected.lock() {
            return Err(NetworkError::NotConnected);
        }
        self.incoming
            .lock()
            .pop_front()
            .ok_or(NetworkError::ConnectionClosed)
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }
}
