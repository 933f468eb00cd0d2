// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Tests for network::config

mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::helpers::fixture_path;
use daqlink_core::network::*;

fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_socket_config_defaults() {
    let config = SocketConfig::default();

    assert_eq!(config.role, SocketRole::Server);
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.port, 8800);
    assert!(!config.use_tls);
    assert!(config.server_certificate.is_none());
    assert!(matches!(config.server_trust, ServerTrust::SystemRoots));
    assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    assert_eq!(config.accept_poll_interval(), Duration::from_millis(100));
    assert_eq!(config.io_poll_interval(), Duration::from_millis(10));
    assert_eq!(config.read_timeout(), None);
    assert_eq!(config.waiting_log_interval(), Duration::from_secs(5));
    assert_eq!(config.frame_limits, FrameLimits::default());
    assert!(config.validate().is_ok());
}

#[test]
fn test_role_constructors() {
    let server = SocketConfig::server("0.0.0.0", 9000);
    assert_eq!(server.role, SocketRole::Server);
    assert_eq!(server.host, "0.0.0.0");

    let client = SocketConfig::client("instrument.local", 9000)
        .with_client_tls(ServerTrust::AcceptInvalid)
        .with_read_timeout(Some(Duration::from_millis(250)));
    assert_eq!(client.role, SocketRole::Client);
    assert!(client.use_tls);
    assert_eq!(client.read_timeout_ms, Some(250));
}

#[test]
fn test_from_lookup_reads_variables() {
    let config = SocketConfig::from_lookup(lookup_from(&[
        ("DAQLINK_ROLE", "client"),
        ("DAQLINK_HOST", "10.0.0.7"),
        ("DAQLINK_PORT", "8801"),
        ("DAQLINK_USE_TLS", "true"),
        ("DAQLINK_CONNECT_TIMEOUT_MS", "2500"),
        ("DAQLINK_READ_TIMEOUT_MS", "400"),
    ]))
    .unwrap();

    assert_eq!(config.role, SocketRole::Client);
    assert_eq!(config.host, "10.0.0.7");
    assert_eq!(config.port, 8801);
    assert!(config.use_tls);
    assert_eq!(config.connect_timeout(), Duration::from_millis(2500));
    assert_eq!(config.read_timeout(), Some(Duration::from_millis(400)));
}

#[test]
fn test_from_lookup_loads_tls_material() {
    let cert = fixture_path("server.crt");
    let key = fixture_path("server.key");
    let ca = fixture_path("ca.crt");
    let config = SocketConfig::from_lookup(lookup_from(&[
        ("DAQLINK_CERT_FILE", cert.to_str().unwrap()),
        ("DAQLINK_KEY_FILE", key.to_str().unwrap()),
        ("DAQLINK_CA_FILE", ca.to_str().unwrap()),
    ]))
    .unwrap();

    assert!(config.server_certificate.is_some());
    assert!(matches!(config.server_trust, ServerTrust::PinnedRoot(_)));
}

#[test]
fn test_from_lookup_rejects_bad_values() {
    for vars in [
        &[("DAQLINK_PORT", "eighty")][..],
        &[("DAQLINK_PORT", "70000")][..],
        &[("DAQLINK_ROLE", "relay")][..],
        &[("DAQLINK_USE_TLS", "sometimes")][..],
        &[("DAQLINK_CERT_FILE", "/tmp/only-a-cert.pem")][..],
        &[("DAQLINK_CA_FILE", "/nonexistent/ca.crt")][..],
    ] {
        assert!(
            matches!(SocketConfig::from_lookup(lookup_from(vars)), Err(NetworkError::Config(_))),
            "{:?} should be rejected",
            vars
        );
    }
}

#[test]
fn test_from_lookup_empty_is_default() {
    let config = SocketConfig::from_lookup(|_| None).unwrap();
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.role, SocketRole::Server);
}

#[test]
fn test_validate_rejects_zero_values() {
    let zero_poll = SocketConfig {
        accept_poll_interval_ms: 0,
        ..Default::default()
    };
    assert!(matches!(
        SocketComm::new(zero_poll),
        Err(NetworkError::Config(_))
    ));

    let zero_read_timeout = SocketConfig::default().with_read_timeout(Some(Duration::ZERO));
    assert!(zero_read_timeout.validate().is_err());

    let zero_buffer = SocketConfig::default().with_frame_limits(FrameLimits {
        robust_read_size: 0,
        ..Default::default()
    });
    assert!(zero_buffer.validate().is_err());
}
