//! Result Handling Benchmarks
//!
//! Measures the client-side work done on every query result:
//! - Concatenating fetched chunks into one frame
//! - Float coercion, date parsing and indexing of a chunk
//! - Merging an entry into a large credential file

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use wrds::config::pgpass::{merge_entry, PgPassEntry};
use wrds::{ColumnMeta, DataFrame, Value};

fn chunk(start: i64, rows: i64) -> DataFrame {
    let columns = vec![
        ColumnMeta::new("permno", "int4"),
        ColumnMeta::new("date", "text"),
        ColumnMeta::new("prc", "numeric"),
    ];
    let rows = (start..start + rows)
        .map(|i| {
            vec![
                Value::Int(10_000 + i),
                Value::from(format!("2020-01-{:02}", i % 28 + 1)),
                Value::Numeric(format!("{}.{:02}", i % 500, i % 100)),
            ]
        })
        .collect();
    DataFrame::new(columns, rows).unwrap()
}

fn bench_concat(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_concat");
    for chunks in [1_i64, 10, 100] {
        let frames: Vec<DataFrame> = (0..chunks).map(|i| chunk(i * 1_000, 1_000)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &frames, |b, frames| {
            b.iter(|| DataFrame::concat(black_box(frames.clone())).unwrap());
        });
    }
    group.finish();
}

fn bench_shape_chunk(c: &mut Criterion) {
    let frame = chunk(0, 10_000);

    c.bench_function("frame_shape_10k", |b| {
        b.iter(|| {
            let mut df = black_box(frame.clone());
            df.coerce_float();
            df.parse_dates(&["date"]).unwrap();
            df.set_index(&["permno"]).unwrap();
            df
        });
    });
}

fn bench_pgpass_merge(c: &mut Criterion) {
    let contents: String = (0..1_000)
        .map(|i| format!("host{i}.example.edu:5432:db{i}:user{i}:secret{i}\n"))
        .collect();
    let entry = PgPassEntry::new("host500.example.edu", 5432, "db500", "user500", "new\\:secret");

    c.bench_function("pgpass_merge_1k_lines", |b| {
        b.iter(|| merge_entry(black_box(&contents), black_box(&entry)));
    });
}

criterion_group!(benches, bench_concat, bench_shape_chunk, bench_pgpass_merge);
criterion_main!(benches);
