//! Field path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use livesync_bench::employee_with_rows;
use livesync_engine::{get_path, set_path, FieldPath};
use livesync_store::Value;

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    group.bench_function("plain", |b| {
        b.iter(|| black_box(FieldPath::parse(black_box("employee_name")).unwrap()));
    });

    group.bench_function("row", |b| {
        b.iter(|| black_box(FieldPath::parse(black_box("education.school")).unwrap()));
    });

    group.bench_function("indexed_row", |b| {
        b.iter(|| black_box(FieldPath::parse(black_box("education[3].school")).unwrap()));
    });

    group.finish();
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");
    let record = employee_with_rows(0, 10);

    group.bench_function("get_plain", |b| {
        b.iter(|| black_box(get_path(black_box(&record), "employee_name").unwrap()));
    });

    group.bench_function("get_indexed_row", |b| {
        b.iter(|| black_box(get_path(black_box(&record), "education[7].school").unwrap()));
    });

    let parsed = FieldPath::parse("education[7].school").unwrap();
    group.bench_function("get_preparsed", |b| {
        b.iter(|| black_box(parsed.get(black_box(&record))));
    });

    group.bench_function("set_row_append", |b| {
        b.iter_with_setup(
            || record.clone(),
            |mut target| {
                set_path(&mut target, "education[12].school", Value::from("New")).unwrap();
                black_box(target);
            },
        );
    });

    group.finish();
}

criterion_group!(benches, bench_parse, bench_resolve);
criterion_main!(benches);
