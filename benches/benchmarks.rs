//! Performance benchmarks for the wsclient protocol core.
//!
//! Run with: `cargo bench`

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use wsclient::config::{Limits, TextDecoding};
use wsclient::protocol::{
    Frame, FrameReassembler, HandshakeKey, HandshakeRequest, HandshakeResponse, MessageAssembler,
    OpCode, apply_mask, apply_mask_fast, compute_accept_key,
};

// =============================================================================
// Frame Codec Benchmarks
// =============================================================================

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");

    for (name, size) in [("small_10b", 10), ("medium_1kb", 1024), ("large_64kb", 65536)] {
        let unmasked = Frame::binary(vec![0xAB; size]).encode();
        let masked = Frame::binary(vec![0xAB; size])
            .with_mask_key([0x37, 0xfa, 0x21, 0x3d])
            .encode();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("decode_{name}_unmasked"), |b| {
            b.iter(|| Frame::decode(black_box(&unmasked)))
        });
        group.bench_function(format!("decode_{name}_masked"), |b| {
            b.iter(|| Frame::decode(black_box(&masked)))
        });

        let frame = Frame::binary(vec![0xAB; size]).masked();
        group.bench_function(format!("encode_{name}_masked"), |b| {
            b.iter(|| black_box(&frame).encode())
        });
    }

    group.finish();
}

// =============================================================================
// Incremental Reassembler Benchmarks
// =============================================================================

fn bench_reassembler(c: &mut Criterion) {
    let mut group = c.benchmark_group("reassembler");

    // Many small frames back to back, delivered in socket-sized reads.
    let wire: Vec<u8> = (0..1000)
        .flat_map(|i| Frame::text(format!("message {i}")).encode())
        .collect();
    group.throughput(Throughput::Bytes(wire.len() as u64));

    for chunk in [1, 64, 8192] {
        group.bench_function(format!("1000_frames_chunk_{chunk}"), |b| {
            b.iter(|| {
                let mut reassembler = FrameReassembler::default();
                let mut count = 0;
                for part in black_box(&wire).chunks(chunk) {
                    count += reassembler.feed(part).unwrap().len();
                }
                count
            })
        });
    }

    let large = Frame::binary(vec![0xCD; 1 << 20]).encode();
    group.throughput(Throughput::Bytes(large.len() as u64));
    group.bench_function("1mb_frame_chunk_8192", |b| {
        b.iter(|| {
            let mut reassembler = FrameReassembler::default();
            let mut frames = Vec::new();
            for part in black_box(&large).chunks(8192) {
                frames.extend(reassembler.feed(part).unwrap());
            }
            frames
        })
    });

    group.finish();
}

// =============================================================================
// Masking Benchmarks
// =============================================================================

fn bench_masking(c: &mut Criterion) {
    let mut group = c.benchmark_group("masking");
    let mask = [0x37, 0xfa, 0x21, 0x3d];

    for (name, size) in [("64b", 64), ("1kb", 1024), ("64kb", 65536), ("1mb", 1 << 20)] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_function(format!("apply_mask_{name}"), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask(black_box(&mut data), mask))
        });

        group.bench_function(format!("apply_mask_fast_{name}"), |b| {
            let mut data = vec![0xAB; size];
            b.iter(|| apply_mask_fast(black_box(&mut data), mask))
        });
    }

    group.finish();
}

// =============================================================================
// Handshake Benchmarks
// =============================================================================

fn bench_handshake(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake");

    let key = "dGhlIHNhbXBsZSBub25jZQ==";
    group.bench_function("compute_accept_key", |b| {
        b.iter(|| compute_accept_key(black_box(key)))
    });

    let request = HandshakeRequest::new("server.example.com", "/chat")
        .with_protocol("chat")
        .with_protocol("superchat");
    let handshake_key = HandshakeKey::from_key(key);
    group.bench_function("write_request", |b| {
        b.iter(|| request.to_bytes(black_box(&handshake_key)))
    });

    let response = b"HTTP/1.1 101 Switching Protocols\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
        Sec-WebSocket-Protocol: chat\r\n\
        \r\n";

    group.bench_function("parse_response", |b| {
        b.iter(|| HandshakeResponse::parse(black_box(response)))
    });

    group.bench_function("parse_and_validate_response", |b| {
        b.iter(|| {
            let parsed = HandshakeResponse::parse(black_box(response)).unwrap();
            parsed.validate(&handshake_key)
        })
    });

    group.finish();
}

// =============================================================================
// Message Reassembly Benchmarks
// =============================================================================

fn bench_message_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("message_assembly");
    let limits = Limits::default();

    group.throughput(Throughput::Bytes(65536));
    group.bench_function("single_frame_64kb", |b| {
        b.iter(|| {
            let mut assembler = MessageAssembler::new(&limits, TextDecoding::WholeMessage);
            let frame = Frame::binary(vec![0xAB; 65536]);
            assembler.push(frame).unwrap()
        })
    });

    for decoding in [TextDecoding::WholeMessage, TextDecoding::PerFragment] {
        group.bench_function(format!("10_text_fragments_{decoding:?}"), |b| {
            b.iter(|| {
                let mut assembler = MessageAssembler::new(&limits, decoding);
                for i in 0..9 {
                    let opcode = if i == 0 { OpCode::Text } else { OpCode::Continuation };
                    assembler.push(Frame::new(false, opcode, "a".repeat(6554))).unwrap();
                }
                assembler
                    .push(Frame::new(true, OpCode::Continuation, "a".repeat(6554)))
                    .unwrap()
            })
        });
    }

    group.finish();
}

// =============================================================================
// Criterion Setup
// =============================================================================

criterion_group!(
    benches,
    bench_frame_codec,
    bench_reassembler,
    bench_masking,
    bench_handshake,
    bench_message_assembly
);

criterion_main!(benches);
