// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Message Framing
//!
//! Newline-delimited JSON over a byte stream. Each message is one JSON
//! object serialized on a single line and terminated by `\n`; there is no
//! length prefix.
//!
//! Three read strategies share one carry-over buffer so they can be mixed
//! on a connection without reordering bytes:
//!
//! - **robust** ([`FrameReader::read_line`]): small reads until a full line
//!   is assembled; tolerates messages split over many receives.
//! - **fast** ([`FrameReader::read_json_fast`]): one large receive, decode
//!   the first JSON value found, carry the remainder.
//! - **fast linebreak** ([`FrameReader::read_json_fast_linebreak`]): one
//!   large receive, decode up to the first delimiter, carry the remainder.
//!
//! The fast strategies never fall back to buffering: a message that spans
//! receives fails with `MalformedMessage` and the buffered bytes are dropped.

use serde::Serialize;
use serde_json::Value;

use super::error::{NetworkError, NetworkResult};
use super::message::JsonMap;

/// Message delimiter.
pub const LINE_DELIMITER: u8 = b'\n';

/// Default read size of the robust strategy.
pub const DEFAULT_ROBUST_READ_SIZE: usize = 64;

/// Default single-receive size of the fast strategies.
pub const DEFAULT_FAST_READ_SIZE: usize = 1024;

/// Default upper bound for one assembled line (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Buffer sizes used by the read strategies.
///
/// `fast_read_size` is the effective maximum message size for the fast
/// strategies; `max_message_size` bounds the robust one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Bytes requested per receive by the robust strategy.
    pub robust_read_size: usize,
    /// Bytes requested by the single receive of the fast strategies.
    pub fast_read_size: usize,
    /// Longest line the robust strategy will assemble.
    pub max_message_size: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        FrameLimits {
            robust_read_size: DEFAULT_ROBUST_READ_SIZE,
            fast_read_size: DEFAULT_FAST_READ_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl FrameLimits {
    /// Rejects zero sizes.
    pub fn validate(&self) -> NetworkResult<()> {
        if self.robust_read_size == 0 || self.fast_read_size == 0 || self.max_message_size == 0 {
            return Err(NetworkError::Config(
                "frame buffer sizes must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// A source of raw bytes, one receive call at a time.
///
/// Mirrors a stream socket `recv`: returns the number of bytes written into
/// `buf`, with `Ok(0)` meaning end of stream.
pub trait ChunkSource {
    fn recv(&mut self, buf: &mut [u8]) -> NetworkResult<usize>;
}

/// Reassembles delimited JSON messages from a [`ChunkSource`].
#[derive(Debug, Default)]
pub struct FrameReader {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to contain no delimiter.
    scanned: usize,
    limits: FrameLimits,
}

impl FrameReader {
    pub fn new(limits: FrameLimits) -> Self {
        FrameReader {
            pending: Vec::new(),
            scanned: 0,
            limits,
        }
    }

    pub fn limits(&self) -> FrameLimits {
        self.limits
    }

    /// Bytes received but not yet returned as a message.
    pub fn buffered(&self) -> &[u8] {
        &self.pending
    }

    /// Drops all carried-over bytes.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.scanned = 0;
    }

    /// Robust strategy: returns the next non-empty line without its delimiter.
    ///
    /// Keeps reading `robust_read_size` bytes at a time until a delimiter
    /// shows up. Bytes past the delimiter stay buffered. If the source
    /// reports `ReadTimeout`, the partial line is kept for the next call.
    pub fn read_line<S: ChunkSource + ?Sized>(&mut self, source: &mut S) -> NetworkResult<Vec<u8>> {
        loop {
            while let Some(line) = self.take_line() {
                if line.len() > self.limits.max_message_size {
                    return Err(NetworkError::MalformedMessage(format!(
                        "message of {} bytes exceeds limit of {}",
                        line.len(),
                        self.limits.max_message_size
                    )));
                }
                if !is_blank(&line) {
                    return Ok(line);
                }
            }

            if self.pending.len() > self.limits.max_message_size {
                self.clear();
                return Err(NetworkError::MalformedMessage(format!(
                    "no delimiter within {} bytes",
                    self.limits.max_message_size
                )));
            }

            if self.recv_into_pending(source, self.limits.robust_read_size)? == 0 {
                self.clear();
                return Err(NetworkError::ConnectionClosed);
            }
        }
    }

    /// Robust strategy, decoded.
    pub fn read_json<S: ChunkSource + ?Sized>(&mut self, source: &mut S) -> NetworkResult<JsonMap> {
        let line = self.read_line(source)?;
        decode_json_line(&line)
    }

    /// Robust strategy, returning the raw line as text.
    pub fn read_line_raw<S: ChunkSource + ?Sized>(&mut self, source: &mut S) -> NetworkResult<String> {
        let line = self.read_line(source)?;
        String::from_utf8(line)
            .map_err(|e| NetworkError::MalformedMessage(format!("invalid UTF-8: {}", e)))
    }

    /// Fast strategy: one receive, decode the first JSON value.
    ///
    /// Skips the receive when a complete line is already buffered. Anything
    /// after the decoded value is carried over.
    pub fn read_json_fast<S: ChunkSource + ?Sized>(&mut self, source: &mut S) -> NetworkResult<JsonMap> {
        loop {
            self.trim_leading_whitespace();
            if !self.has_delimiter() {
                if self.recv_into_pending(source, self.limits.fast_read_size)? == 0 {
                    self.clear();
                    return Err(NetworkError::ConnectionClosed);
                }
                self.trim_leading_whitespace();
                if self.pending.is_empty() {
                    continue;
                }
            }

            let decoded = {
                let mut values =
                    serde_json::Deserializer::from_slice(&self.pending).into_iter::<Value>();
                match values.next() {
                    Some(Ok(value)) => Ok((value, values.byte_offset())),
                    Some(Err(e)) => Err(e.to_string()),
                    None => Err("empty message".to_string()),
                }
            };

            return match decoded {
                Ok((value, consumed)) => {
                    self.consume(consumed);
                    self.trim_leading_whitespace();
                    into_object(value)
                }
                Err(reason) => {
                    self.clear();
                    Err(NetworkError::MalformedMessage(reason))
                }
            };
        }
    }

    /// Fast linebreak strategy: one receive, decode exactly the first line.
    ///
    /// Fails with `MalformedMessage` if no delimiter is present after the
    /// receive; the buffered bytes are dropped in that case.
    pub fn read_json_fast_linebreak<S: ChunkSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> NetworkResult<JsonMap> {
        loop {
            self.trim_leading_whitespace();
            if !self.has_delimiter() {
                if self.recv_into_pending(source, self.limits.fast_read_size)? == 0 {
                    self.clear();
                    return Err(NetworkError::ConnectionClosed);
                }
                self.trim_leading_whitespace();
            }

            match self.take_line() {
                Some(line) => return decode_json_line(&line),
                None if self.pending.is_empty() => continue,
                None => {
                    let len = self.pending.len();
                    self.clear();
                    return Err(NetworkError::MalformedMessage(format!(
                        "no line delimiter in {} received bytes",
                        len
                    )));
                }
            }
        }
    }

    /// Pops the first line (delimiter and trailing `\r` removed).
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let offset = self.scanned.min(self.pending.len());
        match self.pending[offset..]
            .iter()
            .position(|&b| b == LINE_DELIMITER)
        {
            Some(pos) => {
                let end = offset + pos;
                let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.scanned = 0;
                Some(line)
            }
            None => {
                self.scanned = self.pending.len();
                None
            }
        }
    }

    fn has_delimiter(&self) -> bool {
        self.pending.contains(&LINE_DELIMITER)
    }

    fn consume(&mut self, n: usize) {
        self.pending.drain(..n.min(self.pending.len()));
        self.scanned = 0;
    }

    fn trim_leading_whitespace(&mut self) {
        let start = self
            .pending
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.pending.len());
        if start > 0 {
            self.consume(start);
        }
    }

    fn recv_into_pending<S: ChunkSource + ?Sized>(
        &mut self,
        source: &mut S,
        size: usize,
    ) -> NetworkResult<usize> {
        let start = self.pending.len();
        self.pending.resize(start + size, 0);
        match source.recv(&mut self.pending[start..]) {
            Ok(n) => {
                self.pending.truncate(start + n.min(size));
                Ok(n)
            }
            Err(e) => {
                self.pending.truncate(start);
                Err(e)
            }
        }
    }
}

/// Serializes `payload` as one delimited line.
///
/// The payload must serialize to a JSON object. Compact serialization
/// escapes newlines inside strings, so the delimiter is only ever the last
/// byte.
pub fn encode_json_line<T: Serialize + ?Sized>(payload: &T) -> NetworkResult<Vec<u8>> {
    let value =
        serde_json::to_value(payload).map_err(|e| NetworkError::Serialization(e.to_string()))?;
    if !value.is_object() {
        return Err(NetworkError::Serialization(format!(
            "payload must be a JSON object, got {}",
            json_kind(&value)
        )));
    }

    let mut line =
        serde_json::to_vec(&value).map_err(|e| NetworkError::Serialization(e.to_string()))?;
    line.push(LINE_DELIMITER);
    Ok(line)
}

/// Decodes one line (without delimiter) into a JSON object.
pub fn decode_json_line(line: &[u8]) -> NetworkResult<JsonMap> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| NetworkError::MalformedMessage(e.to_string()))?;
    into_object(value)
}

fn into_object(value: Value) -> NetworkResult<JsonMap> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(NetworkError::MalformedMessage(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

// INLINE_TEST_REQUIRED: Tests private take_line and scan offset bookkeeping
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_line_strips_crlf() {
        let mut reader = FrameReader::default();
        reader.pending.extend_from_slice(b"{\"a\":1}\r\nrest");
        assert_eq!(reader.take_line().unwrap(), b"{\"a\":1}");
        assert_eq!(reader.buffered(), b"rest");
    }

    #[test]
    fn test_scanned_offset_tracks_partial_line() {
        let mut reader = FrameReader::default();
        reader.pending.extend_from_slice(b"{\"a\":");
        assert!(reader.take_line().is_none());
        assert_eq!(reader.scanned, 5);

        reader.pending.extend_from_slice(b"1}\n");
        assert_eq!(reader.take_line().unwrap(), b"{\"a\":1}");
        assert_eq!(reader.scanned, 0);
    }

    #[test]
    fn test_encode_rejects_non_object() {
        let err = encode_json_line(&vec![1, 2, 3]).unwrap_err();
        assert!(matches!(err, NetworkError::Serialization(ref m) if m.contains("an array")));
    }

    #[test]
    fn test_encode_escapes_embedded_newline() {
        let line = encode_json_line(&serde_json::json!({"note": "a\nb"})).unwrap();
        assert_eq!(line.iter().filter(|&&b| b == LINE_DELIMITER).count(), 1);
        assert_eq!(line.last(), Some(&LINE_DELIMITER));
    }

    #[test]
    fn test_decode_rejects_scalar() {
        assert!(matches!(
            decode_json_line(b"42"),
            Err(NetworkError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_zero_limits_rejected() {
        let limits = FrameLimits {
            fast_read_size: 0,
            ..Default::default()
        };
        assert!(matches!(limits.validate(), Err(NetworkError::Config(_))));
    }
}
