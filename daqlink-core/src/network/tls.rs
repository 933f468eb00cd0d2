// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! TLS Setup
//!
//! Certificate material for the server role, trust policy for the client
//! role, and the blocking handshakes used by the connection manager.

use std::fmt;
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use native_tls::{Certificate, HandshakeError, Identity, TlsAcceptor, TlsConnector, TlsStream};
use tracing::warn;

use super::error::{NetworkError, NetworkResult};
use super::pinning::{verify_pin, PinnedCertificate};

/// Certificate chain and PKCS#8 private key presented by a TLS server.
#[derive(Clone)]
pub struct ServerCertificate {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl ServerCertificate {
    /// Uses PEM-encoded certificate (chain) and PKCS#8 key bytes.
    pub fn from_pem(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        ServerCertificate {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Reads certificate and key PEM files.
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> NetworkResult<Self> {
        let cert_pem = read_pem(cert_path.as_ref())?;
        let key_pem = read_pem(key_path.as_ref())?;
        Ok(Self::from_pem(cert_pem, key_pem))
    }

    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Builds the acceptor, failing with `Config` on unusable material.
    pub(crate) fn acceptor(&self) -> NetworkResult<TlsAcceptor> {
        let identity = Identity::from_pkcs8(&self.cert_pem, &self.key_pem)
            .map_err(|e| NetworkError::Config(format!("invalid certificate or key: {}", e)))?;
        TlsAcceptor::new(identity)
            .map_err(|e| NetworkError::Config(format!("cannot build TLS acceptor: {}", e)))
    }
}

impl fmt::Debug for ServerCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCertificate")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// How a client decides whether to trust the server certificate.
#[derive(Debug, Clone, Default)]
pub enum ServerTrust {
    /// Strict verification against the platform trust store.
    #[default]
    SystemRoots,
    /// Trust only this PEM certificate (a private CA or the server's
    /// self-signed certificate); built-in roots are disabled.
    PinnedRoot(Vec<u8>),
    /// Skip chain verification but require the leaf certificate to match
    /// one of these SHA-256 fingerprints.
    Fingerprint(Vec<PinnedCertificate>),
    /// No verification at all. Development only.
    AcceptInvalid,
}

impl ServerTrust {
    /// Reads a PEM file to trust as the only root.
    pub fn pinned_root_file(path: impl AsRef<Path>) -> NetworkResult<Self> {
        Ok(ServerTrust::PinnedRoot(read_pem(path.as_ref())?))
    }

    pub(crate) fn connector(&self) -> NetworkResult<TlsConnector> {
        let mut builder = TlsConnector::builder();
        match self {
            ServerTrust::SystemRoots => {}
            ServerTrust::PinnedRoot(pem) => {
                let cert = Certificate::from_pem(pem)
                    .map_err(|e| NetworkError::Config(format!("invalid root certificate: {}", e)))?;
                builder.add_root_certificate(cert).disable_built_in_roots(true);
            }
            ServerTrust::Fingerprint(pins) => {
                if pins.is_empty() {
                    return Err(NetworkError::Config(
                        "fingerprint trust requires at least one pin".into(),
                    ));
                }
                builder
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true);
            }
            ServerTrust::AcceptInvalid => {
                warn!("TLS certificate verification disabled");
                builder
                    .danger_accept_invalid_certs(true)
                    .danger_accept_invalid_hostnames(true);
            }
        }
        builder
            .build()
            .map_err(|e| NetworkError::Config(format!("cannot build TLS connector: {}", e)))
    }

    /// Post-handshake checks that the connector cannot express.
    fn verify_peer(&self, stream: &TlsStream<TcpStream>) -> NetworkResult<()> {
        let ServerTrust::Fingerprint(pins) = self else {
            return Ok(());
        };

        let cert = stream
            .peer_certificate()
            .map_err(|e| NetworkError::Handshake(e.to_string()))?
            .ok_or_else(|| NetworkError::Handshake("server sent no certificate".into()))?;
        let der = cert
            .to_der()
            .map_err(|e| NetworkError::Handshake(e.to_string()))?;

        if verify_pin(&der, pins) {
            Ok(())
        } else {
            Err(NetworkError::Handshake(format!(
                "certificate fingerprint {} is not pinned",
                PinnedCertificate::from_der(&der).to_hex()
            )))
        }
    }
}

/// Client-side handshake bounded by `timeout`.
///
/// A handshake that does not finish in time is `ConnectTimeout`.
pub(crate) fn client_handshake(
    trust: &ServerTrust,
    host: &str,
    tcp: TcpStream,
    timeout: Duration,
) -> NetworkResult<TlsStream<TcpStream>> {
    let connector = trust.connector()?;
    set_handshake_timeouts(&tcp, timeout)?;

    let stream = connector.connect(host, tcp).map_err(|e| match e {
        HandshakeError::Failure(e) => NetworkError::Handshake(e.to_string()),
        HandshakeError::WouldBlock(_) => {
            NetworkError::ConnectTimeout(format!("TLS handshake with {} exceeded {:?}", host, timeout))
        }
    })?;
    trust.verify_peer(&stream)?;
    Ok(stream)
}

/// Server-side handshake bounded by `timeout`.
///
/// Progresses in steps of at most `poll` and gives up with
/// `AcceptCancelled` as soon as `cancel` is set.
pub(crate) fn server_handshake(
    acceptor: &TlsAcceptor,
    tcp: TcpStream,
    timeout: Duration,
    poll: Duration,
    cancel: &AtomicBool,
) -> NetworkResult<TlsStream<TcpStream>> {
    let deadline = Instant::now() + timeout;
    set_handshake_timeouts(&tcp, poll.min(timeout))?;

    let mut attempt = acceptor.accept(tcp);
    loop {
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(HandshakeError::Failure(e)) => return Err(NetworkError::Handshake(e.to_string())),
            Err(HandshakeError::WouldBlock(mid)) => {
                if cancel.load(Ordering::SeqCst) {
                    return Err(NetworkError::AcceptCancelled);
                }
                if Instant::now() >= deadline {
                    return Err(NetworkError::Handshake(format!(
                        "client did not complete handshake within {:?}",
                        timeout
                    )));
                }
                attempt = mid.handshake();
            }
        }
    }
}

fn set_handshake_timeouts(tcp: &TcpStream, timeout: Duration) -> NetworkResult<()> {
    // set_*_timeout rejects a zero duration
    let timeout = timeout.max(Duration::from_millis(1));
    tcp.set_read_timeout(Some(timeout))
        .and_then(|_| tcp.set_write_timeout(Some(timeout)))
        .map_err(|e| NetworkError::Handshake(format!("cannot set handshake timeout: {}", e)))
}

fn read_pem(path: &Path) -> NetworkResult<Vec<u8>> {
    std::fs::read(path)
        .map_err(|e| NetworkError::Config(format!("cannot read {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_key() {
        let cert = ServerCertificate::from_pem("CERT", "SECRET KEY");
        let debug = format!("{:?}", cert);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("SECRET"));
    }

    #[test]
    fn test_garbage_material_is_config_error() {
        let cert = ServerCertificate::from_pem("not a cert", "not a key");
        assert!(matches!(cert.acceptor(), Err(NetworkError::Config(_))));
    }

    #[test]
    fn test_empty_fingerprint_list_is_config_error() {
        let trust = ServerTrust::Fingerprint(Vec::new());
        assert!(matches!(trust.connector(), Err(NetworkError::Config(_))));
    }

    #[test]
    fn test_invalid_pinned_root_is_config_error() {
        let trust = ServerTrust::PinnedRoot(b"garbage".to_vec());
        assert!(matches!(trust.connector(), Err(NetworkError::Config(_))));
    }
}
