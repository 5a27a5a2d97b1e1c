//! Benchmarks for the command wire envelope and the consistency read path
//!
//! The command path sits between UI input and the publisher, and the
//! version-bracketed read runs on every session-string refresh; both should
//! stay well under a microsecond.
//!
//! Platform: Cross-platform (in-memory providers, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use paddock::test_utils::MemoryProvider;
use paddock::{Command, CommandMessage, VersionedRegion, command};
use std::hint::black_box;

fn bench_command_envelope(c: &mut Criterion) {
    let mut group = c.benchmark_group("command_envelope");
    group.throughput(Throughput::Elements(1));

    let message = CommandMessage::new(9, 2, 65, 0);

    group.bench_function("pack", |b| {
        b.iter(|| black_box(black_box(&message).pack()));
    });

    group.bench_function("unpack", |b| {
        let (word0, word1) = message.pack();
        b.iter(|| black_box(CommandMessage::unpack(black_box(word0), black_box(word1))));
    });

    group.bench_function("encode_decode", |b| {
        let cmd = Command::PitService { command: 2, parameter: 65 };
        b.iter(|| {
            let message = command::encode(black_box(cmd));
            black_box(command::decode(message))
        });
    });

    group.finish();
}

fn bench_versioned_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("versioned_read");

    // 4-byte version counter followed by a 512-byte payload region.
    let mut data = vec![0u8; 516];
    data[0..4].copy_from_slice(&7u32.to_le_bytes());
    let provider = MemoryProvider::new(data);
    let region = VersionedRegion::new(0, 4, 512);

    group.throughput(Throughput::Bytes(512));
    group.bench_function("stable_payload", |b| {
        b.iter(|| black_box(region.read(black_box(&provider)).expect("stable read")));
    });

    group.finish();
}

criterion_group!(benches, bench_command_envelope, bench_versioned_read);
criterion_main!(benches);
