//! Criterion benchmarks for the element-conversion path.
//!
//! Run with:
//!   cargo bench --bench convert
//!
//! Measures the widen-to-f64 / narrow-with-saturation pipeline that backs
//! every non-identity chunk read and write, plus the identity fast path.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use pghmri::bio::{self, Endian};
use pghmri::Datatype;

fn bench_widen_narrow(c: &mut Criterion) {
    let mut group = c.benchmark_group("widen_narrow");

    for &n in &[4_096usize, 65_536, 1_048_576] {
        let values: Vec<f64> = (0..n).map(|i| (i as f64) * 0.25 - 1000.0).collect();

        // f64 -> int16 bytes (narrowing with saturation checks).
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("f64_to_int16", n), &values, |b, values| {
            let mut out = Vec::with_capacity(n * 2);
            b.iter(|| {
                out.clear();
                let mut clamped = false;
                bio::write_block_f64(&mut out, Datatype::Int16, Endian::Little, values, &mut clamped)
                    .unwrap();
                clamped
            })
        });

        // int16 bytes -> f64 (widening).
        let mut encoded = Vec::with_capacity(n * 2);
        let mut clamped = false;
        bio::write_block_f64(
            &mut encoded,
            Datatype::Int16,
            Endian::Little,
            &values,
            &mut clamped,
        )
        .unwrap();
        group.bench_with_input(
            BenchmarkId::new("int16_to_f64", n),
            &encoded,
            |b, encoded| {
                let mut out = vec![0f64; n];
                b.iter(|| {
                    bio::read_block_f64(&mut encoded.as_slice(), Datatype::Int16, Endian::Little, &mut out)
                        .unwrap();
                    out[0]
                })
            },
        );
    }

    group.finish();
}

fn bench_identity_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_codec");

    for &n in &[65_536usize, 1_048_576] {
        let values: Vec<f32> = (0..n).map(|i| i as f32).collect();

        // Byte-swapped encode (the non-native order forces real work).
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("f32_swapped", n), &values, |b, values| {
            let mut out = Vec::with_capacity(n * 4);
            b.iter(|| {
                out.clear();
                bio::write_array(&mut out, values, Endian::Big).unwrap();
                out.len()
            })
        });

        group.bench_with_input(BenchmarkId::new("f32_native", n), &values, |b, values| {
            let mut out = Vec::with_capacity(n * 4);
            b.iter(|| {
                out.clear();
                bio::write_array(&mut out, values, Endian::native()).unwrap();
                out.len()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_widen_narrow, bench_identity_codec);
criterion_main!(benches);
