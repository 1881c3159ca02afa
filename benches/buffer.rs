use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mill_frame::buffer::CumulativeBuffer;
use mill_frame::net::tcp::framing::LengthPrefixed;
use mill_frame::net::tcp::PacketLength;

fn bench_append_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_consume");

    for chunk in [64usize, 1024, 8192] {
        group.throughput(Throughput::Bytes(chunk as u64));
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &size| {
            let mut buffer = CumulativeBuffer::with_message_size(64 * 1024);
            let data = vec![0xABu8; size];

            b.iter(|| {
                buffer.append(black_box(&data)).unwrap();
                black_box(buffer.consume(size).unwrap());
            });
        });
    }
    group.finish();
}

fn bench_compaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("compaction");

    // a trailing partial frame forces a compaction on nearly every append
    group.bench_function("partial_tail", |b| {
        let mut buffer = CumulativeBuffer::with_capacity(16 * 1024);
        let data = vec![1u8; 4096];

        b.iter(|| {
            while buffer.append(&data).is_ok() {
                let _ = buffer.consume(4000);
            }
            buffer.compact();
            black_box(buffer.cumulated_len());
            buffer.clear();
        });
    });
    group.finish();
}

fn bench_length_prefixed_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("length_prefixed");

    for body in [16usize, 512, 4096] {
        let frame = LengthPrefixed::encode(&vec![7u8; body]).unwrap();
        let frames_per_fill = (32 * 1024) / frame.len();
        group.throughput(Throughput::Bytes((frame.len() * frames_per_fill) as u64));

        group.bench_with_input(BenchmarkId::from_parameter(body), &frame, |b, frame| {
            let mut buffer = CumulativeBuffer::with_capacity(32 * 1024);

            b.iter(|| {
                for _ in 0..frames_per_fill {
                    buffer.append(frame).unwrap();
                }
                let mut delivered = 0;
                while let PacketLength::Ready(len) = LengthPrefixed::packet_length(buffer.data()) {
                    if buffer.cumulated_len() < len {
                        break;
                    }
                    black_box(LengthPrefixed::payload(buffer.consume(len).unwrap()));
                    delivered += 1;
                }
                assert_eq!(delivered, frames_per_fill);
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_append_consume,
    bench_compaction,
    bench_length_prefixed_framing
);
criterion_main!(benches);
