// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Socket Configuration

use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::error::{NetworkError, NetworkResult};
use super::framing::FrameLimits;
use super::tls::{ServerCertificate, ServerTrust};
use super::transport::SocketRole;

/// Well-known port of the remote-control link.
pub const DEFAULT_PORT: u16 = 8800;

/// Configuration for a [`SocketComm`](super::SocketComm).
///
/// Host and port here are what [`SocketComm::open`](super::SocketComm::open)
/// uses; `create_socket` and `connect` take them explicitly.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Which side `open()` sets up.
    pub role: SocketRole,
    /// Bind address (server) or peer host (client).
    pub host: String,
    /// Listening or remote port.
    pub port: u16,
    /// Wrap connections in TLS.
    pub use_tls: bool,
    /// Certificate and key presented by a TLS server.
    pub server_certificate: Option<ServerCertificate>,
    /// Client-side trust policy.
    pub server_trust: ServerTrust,
    /// TCP connect plus TLS handshake budget (milliseconds).
    pub connect_timeout_ms: u64,
    /// Server-side TLS handshake budget (milliseconds).
    pub handshake_timeout_ms: u64,
    /// Accept loop poll interval; bounds cancellation latency (milliseconds).
    pub accept_poll_interval_ms: u64,
    /// Socket read timeout used to interleave reads with sends and close
    /// (milliseconds).
    pub io_poll_interval_ms: u64,
    /// Optional deadline for one message read (milliseconds).
    pub read_timeout_ms: Option<u64>,
    /// Socket write timeout (milliseconds).
    pub write_timeout_ms: u64,
    /// Period of the "waiting for connection" log (milliseconds).
    pub waiting_log_interval_ms: u64,
    /// Buffer sizes of the read strategies.
    pub frame_limits: FrameLimits,
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            role: SocketRole::Server,
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            use_tls: false,
            server_certificate: None,
            server_trust: ServerTrust::SystemRoots,
            connect_timeout_ms: 10_000,
            handshake_timeout_ms: 10_000,
            accept_poll_interval_ms: 100,
            io_poll_interval_ms: 10,
            read_timeout_ms: None,
            write_timeout_ms: 5_000,
            waiting_log_interval_ms: 5_000,
            frame_limits: FrameLimits::default(),
        }
    }
}

impl SocketConfig {
    /// Creates a server config listening on `host:port`.
    pub fn server(host: &str, port: u16) -> Self {
        SocketConfig {
            role: SocketRole::Server,
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// Creates a client config connecting to `host:port`.
    pub fn client(host: &str, port: u16) -> Self {
        SocketConfig {
            role: SocketRole::Client,
            host: host.to_string(),
            port,
            ..Default::default()
        }
    }

    /// Enables TLS on a server with the given certificate.
    pub fn with_server_tls(mut self, certificate: ServerCertificate) -> Self {
        self.use_tls = true;
        self.server_certificate = Some(certificate);
        self
    }

    /// Enables TLS on a client with the given trust policy.
    pub fn with_client_tls(mut self, trust: ServerTrust) -> Self {
        self.use_tls = true;
        self.server_trust = trust;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout_ms = timeout.map(duration_ms);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn with_accept_poll_interval(mut self, interval: Duration) -> Self {
        self.accept_poll_interval_ms = duration_ms(interval);
        self
    }

    pub fn with_frame_limits(mut self, limits: FrameLimits) -> Self {
        self.frame_limits = limits;
        self
    }

    /// Builds a config from `DAQLINK_*` environment variables on top of the
    /// defaults.
    ///
    /// Recognized: `DAQLINK_ROLE`, `DAQLINK_HOST`, `DAQLINK_PORT`,
    /// `DAQLINK_USE_TLS`, `DAQLINK_CERT_FILE` + `DAQLINK_KEY_FILE`,
    /// `DAQLINK_CA_FILE`, `DAQLINK_CONNECT_TIMEOUT_MS`,
    /// `DAQLINK_READ_TIMEOUT_MS`.
    pub fn from_env() -> NetworkResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> NetworkResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = SocketConfig::default();

        if let Some(role) = lookup("DAQLINK_ROLE") {
            config.role = role.parse().map_err(NetworkError::Config)?;
        }
        if let Some(host) = lookup("DAQLINK_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("DAQLINK_PORT") {
            config.port = parse_var("DAQLINK_PORT", &port)?;
        }
        if let Some(use_tls) = lookup("DAQLINK_USE_TLS") {
            config.use_tls = parse_flag("DAQLINK_USE_TLS", &use_tls)?;
        }
        match (lookup("DAQLINK_CERT_FILE"), lookup("DAQLINK_KEY_FILE")) {
            (Some(cert), Some(key)) => {
                config.server_certificate = Some(ServerCertificate::from_pem_files(cert, key)?);
            }
            (None, None) => {}
            _ => {
                return Err(NetworkError::Config(
                    "DAQLINK_CERT_FILE and DAQLINK_KEY_FILE must be set together".into(),
                ))
            }
        }
        if let Some(ca) = lookup("DAQLINK_CA_FILE") {
            config.server_trust = ServerTrust::pinned_root_file(ca)?;
        }
        if let Some(ms) = lookup("DAQLINK_CONNECT_TIMEOUT_MS") {
            config.connect_timeout_ms = parse_var("DAQLINK_CONNECT_TIMEOUT_MS", &ms)?;
        }
        if let Some(ms) = lookup("DAQLINK_READ_TIMEOUT_MS") {
            config.read_timeout_ms = Some(parse_var("DAQLINK_READ_TIMEOUT_MS", &ms)?);
        }

        Ok(config)
    }

    /// Rejects zero timeouts, poll intervals and buffer sizes.
    pub fn validate(&self) -> NetworkResult<()> {
        let required = [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("handshake_timeout_ms", self.handshake_timeout_ms),
            ("accept_poll_interval_ms", self.accept_poll_interval_ms),
            ("io_poll_interval_ms", self.io_poll_interval_ms),
            ("write_timeout_ms", self.write_timeout_ms),
            ("waiting_log_interval_ms", self.waiting_log_interval_ms),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| *value == 0) {
            return Err(NetworkError::Config(format!("{} must be non-zero", name)));
        }
        if self.read_timeout_ms == Some(0) {
            return Err(NetworkError::Config("read_timeout_ms must be non-zero".into()));
        }
        self.frame_limits.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms)
    }

    pub fn io_poll_interval(&self) -> Duration {
        Duration::from_millis(self.io_poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn waiting_log_interval(&self) -> Duration {
        Duration::from_millis(self.waiting_log_interval_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> NetworkResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| NetworkError::Config(format!("{}={:?}: {}", name, value, e)))
}

fn parse_flag(name: &str, value: &str) -> NetworkResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(NetworkError::Config(format!(
            "{}={:?}: expected a boolean",
            name, other
        ))),
    }
}
