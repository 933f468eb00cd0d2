// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Network + Transport Layer
//!
//! Newline-delimited JSON over TCP or TLS between a control process and a
//! data-acquisition instrument.
//!
//! # Architecture
//!
//! The network layer consists of:
//! - **Connection manager** (`SocketComm`): client/server setup, background
//!   accept with cancellation, send and the three read strategies
//! - **Framing**: delimiter-based message boundaries with a carry-over buffer
//! - **Message types**: message roles, lifecycle states and tracked records
//! - **Tracker**: in-flight messages keyed by id
//! - **TLS**: server certificates, client trust policy, fingerprint pinning
//!
//! # Example
//!
//! ```ignore
//! use daqlink_core::network::{MessageType, SocketComm, SocketConfig};
//!
//! let client = SocketComm::new(SocketConfig::client("127.0.0.1", 8800))?;
//! client.open()?;
//!
//! let id = client.send_tracked(MessageType::Command, payload)?;
//! let reply = MessageEnvelope::from_json_map(client.read_json_message()?)?;
//! if reply.reply_to.as_deref() == Some(id.as_str()) {
//!     let latency = client.acknowledge(&id)?;
//! }
//! client.close_socket();
//! ```

#[cfg(feature = "testing")]
pub mod config;
#[cfg(not(feature = "testing"))]
mod config;

#[cfg(feature = "testing")]
pub mod connection;
#[cfg(not(feature = "testing"))]
mod connection;

#[cfg(feature = "testing")]
pub mod error;
#[cfg(not(feature = "testing"))]
mod error;

#[cfg(feature = "testing")]
pub mod events;
#[cfg(not(feature = "testing"))]
mod events;

pub mod framing;

#[cfg(feature = "testing")]
pub mod message;
#[cfg(not(feature = "testing"))]
mod message;

#[cfg(feature = "testing")]
pub mod mock;
#[cfg(not(feature = "testing"))]
mod mock;

#[cfg(feature = "testing")]
pub mod pinning;
#[cfg(not(feature = "testing"))]
mod pinning;

mod stream;

#[cfg(feature = "testing")]
pub mod tls;
#[cfg(not(feature = "testing"))]
mod tls;

#[cfg(feature = "testing")]
pub mod tracker;
#[cfg(not(feature = "testing"))]
mod tracker;

#[cfg(feature = "testing")]
pub mod transport;
#[cfg(not(feature = "testing"))]
mod transport;

// Error types
pub use error::{NetworkError, NetworkResult};

// Message types
pub use message::{JsonMap, MessageEnvelope, MessageId, MessageStatus, MessageType, SocketMessage};

// Framing
pub use framing::{
    decode_json_line, encode_json_line, ChunkSource, FrameLimits, FrameReader, LINE_DELIMITER,
};

// Tracking
pub use tracker::MessageTracker;

// Configuration and TLS
pub use config::{SocketConfig, DEFAULT_PORT};
pub use pinning::{verify_pin, PinnedCertificate};
pub use tls::{ServerCertificate, ServerTrust};

// Transport abstraction
pub use transport::{ConnectionState, JsonChannel, PeerInfo, SocketRole};

// Events
pub use events::{CallbackHandler, ConnectionEvent, EventDispatcher, EventHandler};

// Test doubles
pub use mock::{MockChannel, ScriptedSource};

// Connection management
pub use connection::SocketComm;
