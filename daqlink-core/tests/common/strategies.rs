// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Proptest Strategies
//!
//! Reusable proptest strategies for property-based testing.

use proptest::prelude::*;
use serde_json::Value;

use daqlink_core::network::{JsonMap, MessageStatus, MessageType};

// ============================================================
// Payload Strategies
// ============================================================

/// Scalars, excluding floats so round trips compare exactly.
pub fn json_leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        // includes newlines and tabs to exercise escaping
        "[ -~\n\t]{0,40}".prop_map(Value::String),
    ]
}

/// Nested values up to a small depth.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    json_leaf_strategy().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

/// An arbitrary message payload (a JSON object).
pub fn payload_strategy() -> impl Strategy<Value = JsonMap> {
    prop::collection::btree_map("[a-z_]{1,12}", json_value_strategy(), 0..8)
        .prop_map(|m| m.into_iter().collect())
}

// ============================================================
// Message Strategies
// ============================================================

pub fn status_strategy() -> impl Strategy<Value = MessageStatus> {
    prop::sample::select(MessageStatus::ALL.to_vec())
}

pub fn message_type_strategy() -> impl Strategy<Value = MessageType> {
    prop::sample::select(vec![
        MessageType::Command,
        MessageType::Response,
        MessageType::Event,
        MessageType::Heartbeat,
    ])
}
