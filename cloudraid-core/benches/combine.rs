//! Benchmarks for stripe line combination
//!
//! Run with: cargo bench --package cloudraid-core

use cloudraid_core::combine::combine_lines;
use cloudraid_core::{stripe, Piece, RaidBufferManager, RaidConfig, RAID_LINE, RAID_PARTS, RAID_SECTOR};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Generate test data of specified size
fn generate_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

fn padded_inputs(data: &[u8], lines: usize) -> [Option<Vec<u8>>; RAID_PARTS] {
    let mut parts = stripe(data).into_iter();
    std::array::from_fn(|_| {
        let mut part = parts.next().unwrap_or_default();
        part.resize(lines * RAID_SECTOR as usize, 0);
        Some(part)
    })
}

/// Line assembly with all shards present and with one rebuilt from parity
fn bench_combine_lines(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine_lines");

    for lines in [1024usize, 8 * 1024, 64 * 1024] {
        let size = lines * RAID_LINE as usize;
        let data = generate_data(size);
        let healthy = padded_inputs(&data, lines);
        let mut degraded = padded_inputs(&data, lines);
        degraded[3] = None;

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("six_shards", lines), &healthy, |b, inputs| {
            b.iter(|| combine_lines(black_box(inputs), lines))
        });
        group.bench_with_input(BenchmarkId::new("parity_rebuild", lines), &degraded, |b, inputs| {
            b.iter(|| combine_lines(black_box(inputs), lines))
        });
    }

    group.finish();
}

/// Whole-engine reassembly of a file submitted one shard at a time
fn bench_manager_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager_reassembly");

    for size in [
        1024 * 1024,      // 1 MB
        8 * 1024 * 1024,  // 8 MB
    ] {
        let data = generate_data(size);
        let parts = stripe(&data);

        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::new("direct_read", format!("{}MB", size / (1024 * 1024))),
            &parts,
            |b, parts| {
                b.iter(|| {
                    let mut manager = RaidBufferManager::for_direct_read(RaidConfig::default()).unwrap();
                    let urls = (0..RAID_PARTS).map(|i| format!("bench://{}", i)).collect();
                    manager.configure(urls, 0, size as u64, size as u64, 16 * 1024 * 1024).unwrap();

                    let mut total = 0usize;
                    for (c, part) in parts.iter().enumerate() {
                        manager.submit(c, Piece::from_bytes(0, part)).unwrap();
                    }
                    while !manager.is_complete() {
                        for c in 0..RAID_PARTS {
                            let ready = manager.get_output_buffer(c).unwrap().map(|p| p.len());
                            if let Some(len) = ready {
                                total += len;
                                manager.acknowledge_release(c).unwrap();
                            }
                        }
                    }
                    black_box(total)
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_combine_lines, bench_manager_reassembly);
criterion_main!(benches);
