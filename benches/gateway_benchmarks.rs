//! Performance benchmarks for the realtime chat gateway
//!
//! Run with: cargo bench
//! Or for specific benchmarks: cargo bench -- <filter>

use bytes::Bytes;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::time::Duration;

use base64::prelude::*;
use realtime_chat_gateway::core::realtime::{
    AudioQueue, FrameReassembler, OverflowPolicy, ReceiveResult, SessionEvent, classify,
};
use realtime_chat_gateway::handlers::chat::{ChatIncomingMessage, ChatOutgoingMessage};

/// Upstream event classification, the hot path of every downstream message
fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");
    group.measurement_time(Duration::from_secs(5));

    let text_delta = r#"{"type":"response.audio_transcript.delta","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":0,"delta":"Hello there"}"#.to_string();

    // 100 ms of 24 kHz PCM16 audio
    let audio = BASE64_STANDARD.encode(vec![0u8; 4800]);
    let audio_delta = format!(
        r#"{{"type":"response.audio.delta","response_id":"resp_1","item_id":"item_1","output_index":0,"content_index":0,"delta":"{audio}"}}"#
    );

    let ignored = r#"{"type":"rate_limits.updated","rate_limits":[{"name":"requests","limit":1000,"remaining":999,"reset_seconds":0.06}]}"#.to_string();

    for (name, raw) in [
        ("text_delta", &text_delta),
        ("audio_delta", &audio_delta),
        ("ignored", &ignored),
    ] {
        group.throughput(Throughput::Bytes(raw.len() as u64));
        group.bench_with_input(BenchmarkId::new(name, raw.len()), raw, |b, raw| {
            b.iter(|| classify(black_box(raw)));
        });
    }

    group.finish();
}

/// Reassembly of a message split into transport fragments
fn bench_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembly");

    let message = format!(
        r#"{{"type":"response.audio.delta","delta":"{}"}}"#,
        "A".repeat(64 * 1024)
    );
    let bytes = Bytes::from(message);

    for fragment_size in [1024usize, 8 * 1024, 64 * 1024] {
        let fragments: Vec<Bytes> = bytes
            .chunks(fragment_size)
            .map(Bytes::copy_from_slice)
            .collect();
        let last = fragments.len() - 1;

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("fragments", fragment_size),
            &fragments,
            |b, fragments| {
                b.iter(|| {
                    let mut reassembler = FrameReassembler::default();
                    for (i, fragment) in fragments.iter().enumerate() {
                        let _ = black_box(
                            reassembler.push(ReceiveResult::fragment(fragment.clone(), i == last)),
                        );
                    }
                });
            },
        );
    }

    group.finish();
}

/// Audio queue push/pop under the drop-oldest policy
fn bench_audio_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("audio_queue");
    let fragment = BASE64_STANDARD.encode(vec![0u8; 4800]);

    group.bench_function("push_pop", |b| {
        let queue = AudioQueue::new(512, OverflowPolicy::DropOldest);
        b.iter(|| {
            queue.push(black_box(fragment.clone()));
            black_box(queue.pop());
        });
    });

    group.bench_function("push_full", |b| {
        let queue = AudioQueue::new(16, OverflowPolicy::DropOldest);
        for _ in 0..16 {
            queue.push(fragment.clone());
        }
        b.iter(|| queue.push(black_box(fragment.clone())));
    });

    group.finish();
}

/// Client frame parsing and downstream frame serialization
fn bench_chat_messages(c: &mut Criterion) {
    let mut group = c.benchmark_group("chat_messages");

    let audio_chunk = format!(
        r#"{{"type":"send_audio_chunk","audio":"{}"}}"#,
        BASE64_STANDARD.encode(vec![0u8; 4800])
    );
    group.throughput(Throughput::Bytes(audio_chunk.len() as u64));
    group.bench_function("parse_audio_chunk", |b| {
        b.iter(|| {
            let _: Result<ChatIncomingMessage, _> = serde_json::from_str(black_box(&audio_chunk));
        });
    });

    let audio_event = SessionEvent::AudioDelta(Bytes::from(vec![0u8; 4800]));
    group.bench_function("serialize_audio_event", |b| {
        b.iter(|| {
            let message: ChatOutgoingMessage = black_box(audio_event.clone()).into();
            serde_json::to_string(&message)
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_reassembly,
    bench_audio_queue,
    bench_chat_messages
);
criterion_main!(benches);
