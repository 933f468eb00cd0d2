// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network Error Types

use std::time::Duration;

use thiserror::Error;

use super::message::{MessageId, MessageStatus};

/// Errors raised by the connection manager, the framing layer and message
/// tracking.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The bind address or port is unavailable.
    #[error("bind failed: {0}")]
    Bind(String),

    /// TCP (and TLS, if enabled) setup did not finish in time.
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),

    /// The peer refused or the address could not be reached.
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    /// TLS handshake failed (untrusted certificate, pin mismatch, protocol error).
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// No peer connected before the accept timeout.
    #[error("no connection accepted within {0:?}")]
    AcceptTimeout(Duration),

    /// A background accept was cancelled by `stop_waiting_for_connection`.
    #[error("waiting for connection was cancelled")]
    AcceptCancelled,

    /// The peer disconnected or the local socket was closed mid-I/O.
    #[error("connection closed")]
    ConnectionClosed,

    /// No established connection to read from or write to.
    #[error("not connected")]
    NotConnected,

    /// The per-read deadline elapsed before a full message arrived.
    #[error("read timed out")]
    ReadTimeout,

    /// A received line could not be decoded as a JSON object.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// The payload could not be serialized as a JSON object.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Writing to the socket failed for a reason other than disconnect.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Reading from the socket failed for a reason other than disconnect.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// No tracked message has this id.
    #[error("unknown message id: {0}")]
    UnknownMessageId(MessageId),

    /// The requested status change violates PENDING -> SENT -> {ACKNOWLEDGED | FAILED}.
    #[error("invalid status transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    /// Invalid configuration (TLS material, timeouts, buffer sizes).
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the current connection state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl NetworkError {
    /// Returns true if the connection is gone and the caller must close it.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionClosed | NetworkError::NotConnected
        )
    }

    /// Maps an I/O error raised on an established connection.
    ///
    /// Disconnect-style errors become `ConnectionClosed`; everything else is
    /// passed to `other`.
    pub(crate) fn from_stream_io(
        err: std::io::Error,
        other: impl FnOnce(String) -> NetworkError,
    ) -> NetworkError {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof => NetworkError::ConnectionClosed,
            _ => other(err.to_string()),
        }
    }
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;
