// SPDX-FileCopyrightText: 2026 Mattia Egloff <mattia.egloff@pm.me>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Performance Benchmarks for Message Framing
//!
//! Compares the three read strategies on the traffic shapes they target.
//!
//! Run with: cargo bench -p daqlink-core

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::json;

use daqlink_core::network::{encode_json_line, FrameReader, ScriptedSource};

const BATCH: usize = 64;

fn heartbeat_line() -> Vec<u8> {
    encode_json_line(&json!({"type": "HEARTBEAT", "payload": {"t": 1_700_000_000u64}})).unwrap()
}

fn status_line() -> Vec<u8> {
    let channels: Vec<u32> = (0..64).collect();
    encode_json_line(&json!({
        "type": "RESPONSE",
        "payload": {"recording": true, "channels": channels, "note": "x".repeat(200)}
    }))
    .unwrap()
}

// =============================================================================
// ONE MESSAGE PER RECEIVE
// =============================================================================

fn bench_one_message_per_receive(c: &mut Criterion) {
    let mut group = c.benchmark_group("one_message_per_receive");

    for (label, line) in [("heartbeat", heartbeat_line()), ("status", status_line())] {
        let chunks: Vec<Vec<u8>> = (0..BATCH).map(|_| line.clone()).collect();
        group.throughput(Throughput::Bytes((line.len() * BATCH) as u64));

        group.bench_function(format!("robust_{}", label), |b| {
            b.iter_batched(
                || (FrameReader::default(), ScriptedSource::new(&chunks)),
                |(mut reader, mut source)| {
                    for _ in 0..BATCH {
                        black_box(reader.read_json(&mut source).unwrap());
                    }
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("fast_{}", label), |b| {
            b.iter_batched(
                || (FrameReader::default(), ScriptedSource::new(&chunks)),
                |(mut reader, mut source)| {
                    for _ in 0..BATCH {
                        black_box(reader.read_json_fast(&mut source).unwrap());
                    }
                },
                BatchSize::SmallInput,
            )
        });

        group.bench_function(format!("fast_linebreak_{}", label), |b| {
            b.iter_batched(
                || (FrameReader::default(), ScriptedSource::new(&chunks)),
                |(mut reader, mut source)| {
                    for _ in 0..BATCH {
                        black_box(reader.read_json_fast_linebreak(&mut source).unwrap());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

// =============================================================================
// COALESCED MESSAGES
// =============================================================================

fn bench_coalesced_heartbeats(c: &mut Criterion) {
    let mut group = c.benchmark_group("coalesced_heartbeats");

    // as many whole heartbeats as fit one fast receive
    let line = heartbeat_line();
    let per_chunk = 1024 / line.len();
    let chunk: Vec<u8> = line.repeat(per_chunk);
    group.throughput(Throughput::Bytes(chunk.len() as u64));

    group.bench_function("robust", |b| {
        b.iter_batched(
            || (FrameReader::default(), ScriptedSource::new([&chunk])),
            |(mut reader, mut source)| {
                for _ in 0..per_chunk {
                    black_box(reader.read_json(&mut source).unwrap());
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("fast", |b| {
        b.iter_batched(
            || (FrameReader::default(), ScriptedSource::new([&chunk])),
            |(mut reader, mut source)| {
                for _ in 0..per_chunk {
                    black_box(reader.read_json_fast(&mut source).unwrap());
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.bench_function("fast_linebreak", |b| {
        b.iter_batched(
            || (FrameReader::default(), ScriptedSource::new([&chunk])),
            |(mut reader, mut source)| {
                for _ in 0..per_chunk {
                    black_box(reader.read_json_fast_linebreak(&mut source).unwrap());
                }
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_one_message_per_receive, bench_coalesced_heartbeats);

criterion_main!(benches);
