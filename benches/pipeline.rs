//! Throughput of the three stages a caller pays for:
//! 1. Inferring an array from a nested literal
//! 2. Running a lifted elementwise kernel
//! 3. Reducing, serially and split across the rayon pool

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use strata::kernel::apply_with;
use strata::{
    build_array, lift_broadcast, lift_reduction, Array, InferOptions, Item, KernelBuffer, KernelDescriptor,
    PrimitiveOp, ReductionSpec, Type, Value,
};

/// A `rows * cols` literal of mostly ints with one float per row, so every
/// row forces a promotion.
fn synthetic_rows(rows: usize, cols: usize) -> Value {
    Value::List(
        (0..rows)
            .map(|r| {
                Value::List(
                    (0..cols)
                        .map(|c| {
                            if c == cols / 2 {
                                Value::Float(r as f64 + 0.5)
                            } else {
                                Value::Int((r * cols + c) as i64)
                            }
                        })
                        .collect(),
                )
            })
            .collect(),
    )
}

fn matrix(rows: usize, cols: usize) -> Array {
    let (array, _) = build_array(Item::Value(synthetic_rows(rows, cols)), &InferOptions::default()).unwrap();
    array
}

fn bench_infer(c: &mut Criterion) {
    let small = synthetic_rows(16, 16);
    let large = synthetic_rows(256, 256);
    let options = InferOptions::default();

    let mut group = c.benchmark_group("infer");
    group.bench_function("16x16", |b| {
        b.iter(|| build_array(Item::Value(black_box(small.clone())), &options).unwrap())
    });
    group.bench_function("256x256", |b| {
        b.iter(|| build_array(Item::Value(black_box(large.clone())), &options).unwrap())
    });
    group.bench_function("256x256_lazy_rows", |b| {
        b.iter(|| {
            let rows = (0..256).map(|r| {
                Item::seq((0..256).map(move |c| Item::Value(Value::Int(r * 256 + c))))
            });
            build_array(Item::seq(rows), &options).unwrap()
        })
    });
    group.finish();
}

fn bench_map(c: &mut Criterion) {
    let m = matrix(512, 512);
    let row = matrix(1, 512);
    let add = KernelDescriptor::primitive(PrimitiveOp::Add, &Type::float(64)).unwrap();
    let lifted = lift_broadcast(&add, &[m.ty().clone(), row.ty().clone()]).unwrap();

    let mut group = c.benchmark_group("map");
    group.bench_function("add_broadcast_serial", |b| {
        b.iter(|| {
            let mut kb = KernelBuffer::with_parallel_threshold(usize::MAX);
            apply_with(&lifted, &[black_box(&m), black_box(&row)], &mut kb).unwrap()
        })
    });
    group.bench_function("add_broadcast_parallel", |b| {
        b.iter(|| {
            let mut kb = KernelBuffer::with_parallel_threshold(64);
            apply_with(&lifted, &[black_box(&m), black_box(&row)], &mut kb).unwrap()
        })
    });
    group.finish();
}

fn bench_reduce(c: &mut Criterion) {
    let m = matrix(512, 512);
    let add = KernelDescriptor::primitive(PrimitiveOp::Add, &Type::float(64)).unwrap();
    let ordered = lift_reduction(&add, m.ty(), None, &ReductionSpec::default()).unwrap();
    let split = lift_reduction(
        &add,
        m.ty(),
        None,
        &ReductionSpec {
            associative: true,
            commutative: true,
            ..ReductionSpec::default()
        },
    )
    .unwrap();

    let mut group = c.benchmark_group("reduce");
    group.bench_function("sum_ordered", |b| {
        b.iter(|| {
            let mut kb = KernelBuffer::new();
            apply_with(&ordered, &[black_box(&m)], &mut kb).unwrap()
        })
    });
    group.bench_function("sum_split", |b| {
        b.iter(|| {
            let mut kb = KernelBuffer::new();
            apply_with(&split, &[black_box(&m)], &mut kb).unwrap()
        })
    });
    group.finish();
}

criterion_group!(benches, bench_infer, bench_map, bench_reduce);
criterion_main!(benches);
