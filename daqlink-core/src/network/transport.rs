// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Transport Trait
//!
//! Connection states and the channel abstraction collaborators program
//! against.

use std::net::SocketAddr;

use super::error::NetworkResult;
use super::message::JsonMap;

/// Connection state of a [`SocketComm`](super::SocketComm).
///
/// Servers go `Disconnected -> Listening -> Connected`, clients go
/// `Disconnected -> Connected`; closing returns to `Disconnected` from
/// anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket open.
    Disconnected,
    /// Bound and waiting for a peer.
    Listening,
    /// Connected and ready for message I/O.
    Connected,
}

/// Which end of the link this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocketRole {
    /// Binds, listens and accepts (the instrument side).
    #[default]
    Server,
    /// Connects out (the control side).
    Client,
}

impl std::str::FromStr for SocketRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "server" => Ok(SocketRole::Server),
            "client" => Ok(SocketRole::Client),
            other => Err(format!("unknown socket role: {}", other)),
        }
    }
}

/// The remote end of an established connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer socket address.
    pub addr: SocketAddr,
    /// True if the connection is TLS-encrypted.
    pub tls: bool,
}

/// A bidirectional channel of opaque JSON objects.
///
/// Command layers and front ends depend on this trait rather than on the
/// socket implementation so they can be tested against
/// [`MockChannel`](super::MockChannel).
///
/// # Example
///
/// ```ignore
/// use daqlink_core::network::{JsonChannel, MockChannel};
///
/// let channel = MockChannel::new();
/// channel.send_json(&payload)?;
/// let reply = channel.receive_json()?;
/// ```
pub trait JsonChannel: Send + Sync {
    /// Sends one payload as a delimited line.
    fn send_json(&self, payload: &JsonMap) -> NetworkResult<()>;

    /// Blocks until the next payload arrives.
    fn receive_json(&self) -> NetworkResult<JsonMap>;

    /// Returns true while the channel can carry messages.
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("Server".parse::<SocketRole>(), Ok(SocketRole::Server));
        assert_eq!("client".parse::<SocketRole>(), Ok(SocketRole::Client));
        assert!("relay".parse::<SocketRole>().is_err());
    }
}
