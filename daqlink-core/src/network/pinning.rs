// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Certificate Pinning
//!
//! SHA-256 fingerprints of DER-encoded certificates, used to trust a
//! self-signed instrument certificate without a CA.

use ring::digest;

use super::error::{NetworkError, NetworkResult};

/// A pinned certificate fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinnedCertificate {
    /// SHA-256 fingerprint of the DER-encoded certificate.
    pub sha256_fingerprint: [u8; 32],
}

impl PinnedCertificate {
    /// Creates a pin from a known SHA-256 fingerprint.
    pub fn new(sha256_fingerprint: [u8; 32]) -> Self {
        PinnedCertificate { sha256_fingerprint }
    }

    /// Hashes DER-encoded certificate bytes.
    pub fn from_der(cert_der: &[u8]) -> Self {
        let hash = digest::digest(&digest::SHA256, cert_der);
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(hash.as_ref());
        PinnedCertificate {
            sha256_fingerprint: fingerprint,
        }
    }

    /// Hashes the first certificate of a PEM document.
    pub fn from_pem(cert_pem: &[u8]) -> NetworkResult<Self> {
        let cert = native_tls::Certificate::from_pem(cert_pem)
            .map_err(|e| NetworkError::Config(format!("invalid certificate PEM: {}", e)))?;
        let der = cert
            .to_der()
            .map_err(|e| NetworkError::Config(format!("cannot encode certificate: {}", e)))?;
        Ok(Self::from_der(&der))
    }

    /// Parses a hex fingerprint, with or without `:` separators
    /// (`openssl x509 -fingerprint -sha256` output is accepted).
    pub fn from_hex(fingerprint: &str) -> NetworkResult<Self> {
        let cleaned: String = fingerprint
            .trim()
            .chars()
            .filter(|c| *c != ':')
            .collect();
        let bytes = hex::decode(&cleaned)
            .map_err(|e| NetworkError::Config(format!("invalid fingerprint hex: {}", e)))?;
        let fingerprint: [u8; 32] = bytes.try_into().map_err(|_| {
            NetworkError::Config("fingerprint must be 32 bytes (SHA-256)".into())
        })?;
        Ok(Self::new(fingerprint))
    }

    /// Lowercase hex form of the fingerprint.
    pub fn to_hex(&self) -> String {
        hex::encode(self.sha256_fingerprint)
    }
}

/// Returns true if the certificate matches one of the pins.
///
/// An empty pin list never matches.
pub fn verify_pin(cert_der: &[u8], pins: &[PinnedCertificate]) -> bool {
    if pins.is_empty() {
        return false;
    }

    let cert_pin = PinnedCertificate::from_der(cert_der);
    pins.iter().any(|pin| pin == &cert_pin)
}
