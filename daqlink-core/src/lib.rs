// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Daqlink Core Library
//!
//! Remote-control transport for data-acquisition instruments: framed JSON
//! messages over plain or TLS-encrypted TCP, in client or server role.
//! Logging goes through `tracing`; the embedding process installs the
//! subscriber.

pub mod network;

pub use network::{
    ConnectionEvent, ConnectionState, JsonChannel, JsonMap, MessageEnvelope, MessageStatus,
    MessageType, NetworkError, NetworkResult, SocketComm, SocketConfig, SocketMessage,
};
