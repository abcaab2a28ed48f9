//! Sixel encoder benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use mochi_canvas::image::scale::resize;
use mochi_canvas::sixel::{decode, SixelEncoder};
use mochi_canvas::Frame;

fn bench_encode_exact_palette(c: &mut Criterion) {
    let mut group = c.benchmark_group("sixel");

    // Few colours, encoded with an exact palette
    let frame = Frame::solid(256, 256, [40, 120, 200, 255]);
    group.throughput(Throughput::Bytes(frame.data.len() as u64));

    group.bench_function("encode_solid", |b| {
        let mut encoder = SixelEncoder::new(256, true);
        b.iter(|| black_box(encoder.encode(black_box(frame.view()))))
    });

    group.finish();
}

fn bench_encode_dithered(c: &mut Criterion) {
    let mut group = c.benchmark_group("sixel");

    // Full gradient, reduced to the colour cube
    let frame = Frame::gradient(256, 256, 0);
    group.throughput(Throughput::Bytes(frame.data.len() as u64));

    group.bench_function("encode_gradient_dither", |b| {
        let mut encoder = SixelEncoder::new(256, true);
        b.iter(|| black_box(encoder.encode(black_box(frame.view()))))
    });

    group.bench_function("encode_gradient_16_colors", |b| {
        let mut encoder = SixelEncoder::new(16, false);
        b.iter(|| black_box(encoder.encode(black_box(frame.view()))))
    });

    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("sixel");

    let frame = Frame::gradient(256, 256, 0);
    let encoded = SixelEncoder::new(256, true)
        .encode(frame.view())
        .expect("gradient encodes");
    group.throughput(Throughput::Bytes(encoded.len() as u64));

    group.bench_function("decode_gradient", |b| {
        b.iter(|| black_box(decode(black_box(&encoded))))
    });

    group.finish();
}

fn bench_resize(c: &mut Criterion) {
    let mut group = c.benchmark_group("scale");

    let frame = Frame::gradient(1920, 1080, 0);
    group.throughput(Throughput::Bytes(frame.data.len() as u64));

    group.bench_function("downscale_1080p", |b| {
        b.iter(|| black_box(resize(black_box(&frame), 640, 360)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_exact_palette,
    bench_encode_dithered,
    bench_decode,
    bench_resize
);

criterion_main!(benches);
