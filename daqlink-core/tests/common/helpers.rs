// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Test Helpers
//!
//! Logging setup, TLS fixtures and loopback connection pairs.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use daqlink_core::network::{
    JsonMap, ServerCertificate, ServerTrust, SocketComm, SocketConfig,
};

/// Routes `tracing` output through the test harness (`RUST_LOG` filters it).
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Certificate and key of the test server (CN=localhost, IP SAN 127.0.0.1).
pub fn server_certificate() -> ServerCertificate {
    ServerCertificate::from_pem_files(fixture_path("server.crt"), fixture_path("server.key"))
        .expect("fixture certificate")
}

/// Trust policy accepting certificates issued by the test CA.
pub fn trust_test_ca() -> ServerTrust {
    ServerTrust::pinned_root_file(fixture_path("ca.crt")).expect("fixture CA")
}

/// Config with short poll intervals so tests finish quickly.
pub fn quick_config() -> SocketConfig {
    SocketConfig {
        accept_poll_interval_ms: 20,
        connect_timeout_ms: 5_000,
        handshake_timeout_ms: 5_000,
        ..SocketConfig::server("127.0.0.1", 0)
    }
}

/// A server listening on an ephemeral loopback port.
pub fn listening_server(config: SocketConfig, use_tls: bool) -> (SocketComm, u16) {
    let server = SocketComm::new(config).expect("valid config");
    let addr = server
        .create_socket("127.0.0.1", 0, use_tls, None)
        .expect("bind loopback");
    (server, addr.port())
}

/// Connects a client to a fresh server and returns `(server, client)`.
///
/// The client connects on a helper thread so the TLS handshake can run
/// against the server's accept.
pub fn connected_pair(server_config: SocketConfig, client_config: SocketConfig) -> (SocketComm, SocketComm) {
    let use_tls = server_config.use_tls;
    let (server, port) = listening_server(server_config, use_tls);

    let client = thread::scope(|scope| {
        let connecting = scope.spawn(move || {
            let client = SocketComm::new(client_config).expect("valid config");
            let timeout = client.config().connect_timeout();
            client
                .connect("127.0.0.1", port, use_tls, timeout)
                .expect("client connects");
            client
        });
        server
            .accept_connection(Some(Duration::from_secs(5)))
            .expect("server accepts");
        connecting.join().expect("client thread")
    });

    (server, client)
}

/// Plain loopback pair with quick defaults.
pub fn plain_pair() -> (SocketComm, SocketComm) {
    connected_pair(quick_config(), quick_config())
}

/// TLS loopback pair trusting the fixture CA.
pub fn tls_pair() -> (SocketComm, SocketComm) {
    connected_pair(
        quick_config().with_server_tls(server_certificate()),
        quick_config().with_client_tls(trust_test_ca()),
    )
}

/// Unwraps a `json!` object literal into a payload map.
pub fn obj(value: Value) -> JsonMap {
    match value {
        Value::Object(map) => map,
        other => panic!("expected a JSON object, got {}", other),
    }
}
