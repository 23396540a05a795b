// Voxel access benchmarks for VoxStore

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use voxstore::{AccessPattern, CacheOptions, Volume};

fn benchmark_sequential_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_voxels");

    for extent in [16usize, 32, 64].iter() {
        let options = CacheOptions::new()
            .max_cache_bytes(64 * 1024)
            .access_pattern(AccessPattern::SequentialSlice);
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[*extent, *extent, *extent], options).unwrap();

        // Pre-populate through the cache
        for z in 0..*extent {
            for y in 0..*extent {
                for x in 0..*extent {
                    volume.set_voxel(&[z, y, x], (z + y + x) as f64).unwrap();
                }
            }
        }

        let voxels = (extent * extent * extent) as u64;
        group.throughput(Throughput::Elements(voxels));
        group.bench_with_input(BenchmarkId::from_parameter(extent), extent, |b, &extent| {
            b.iter(|| {
                for z in 0..extent {
                    for y in 0..extent {
                        for x in 0..extent {
                            let value = volume.get_voxel(&[z, y, x]).unwrap();
                            black_box(value);
                        }
                    }
                }
            });
        });
    }

    group.finish();
}

fn benchmark_random_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_voxels");

    for extent in [16usize, 32].iter() {
        let options = CacheOptions::new().max_cache_bytes(64 * 1024);
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[*extent, *extent, *extent], options).unwrap();

        for z in 0..*extent {
            for y in 0..*extent {
                for x in 0..*extent {
                    volume.set_voxel(&[z, y, x], (z * y * x) as f64).unwrap();
                }
            }
        }

        group.throughput(Throughput::Elements(10_000));
        group.bench_with_input(BenchmarkId::from_parameter(extent), extent, |b, &extent| {
            b.iter(|| {
                use rand::Rng;
                let mut rng = rand::rng();

                for _ in 0..10_000 {
                    let coords = [
                        rng.random_range(0..extent),
                        rng.random_range(0..extent),
                        rng.random_range(0..extent),
                    ];
                    let value = volume.get_voxel(&coords).unwrap();
                    black_box(value);
                }
            });
        });
    }

    group.finish();
}

fn benchmark_same_block_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("same_block");

    let options = CacheOptions::new().max_cache_bytes(64 * 1024);
    let mut volume: Volume<f64> =
        Volume::new(&["z", "y", "x"], &[32, 32, 32], options).unwrap();
    volume.set_voxel(&[4, 4, 4], 1.0).unwrap();

    group.throughput(Throughput::Elements(10_000));
    group.bench_function("fast_path", |b| {
        b.iter(|| {
            for _ in 0..10_000 {
                // All eight coordinates land in one 8x8x8 block
                let value = volume.get_voxel(&[4, 4, 5]).unwrap();
                black_box(value);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_sequential_access,
    benchmark_random_access,
    benchmark_same_block_access
);
criterion_main!(benches);
