use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mongobolt_mongodb::convert::{decode_batch, encode_batch, DocumentFields, ExtractedValue};
use mongobolt_mongodb::schema::{DocumentSchema, lookup_schema, register_schema};
use mongobolt_mongodb::validate::validate_document;
use std::hint::black_box;

/// A document shaped like a typical user record
fn sample_fields(i: i64) -> DocumentFields {
    vec![
        ("name".to_string(), ExtractedValue::String(format!("user-{}", i))),
        (
            "email".to_string(),
            ExtractedValue::String(format!("user{}@example.com", i)),
        ),
        ("age".to_string(), ExtractedValue::Int64(20 + (i % 60))),
        ("score".to_string(), ExtractedValue::Double(i as f64 * 0.5)),
        (
            "tags".to_string(),
            ExtractedValue::Array(vec![
                ExtractedValue::String("alpha".to_string()),
                ExtractedValue::String("beta".to_string()),
            ]),
        ),
        (
            "address".to_string(),
            ExtractedValue::Document(vec![
                ("city".to_string(), ExtractedValue::String("Berlin".to_string())),
                ("zip".to_string(), ExtractedValue::String("10117".to_string())),
            ]),
        ),
    ]
}

fn batch_of(size: usize) -> Vec<DocumentFields> {
    (0..size).map(|i| sample_fields(i as i64)).collect()
}

fn bench_encode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_batch");
    for size in [10, 49, 50, 500, 5000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter_batched(
                || batch_of(size),
                |batch| black_box(encode_batch(batch, 50)),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_encode_sequential_vs_parallel(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_500_docs");
    group.bench_function("sequential", |b| {
        b.iter_batched(
            || batch_of(500),
            |batch| black_box(encode_batch(batch, usize::MAX)),
            criterion::BatchSize::SmallInput,
        );
    });
    group.bench_function("parallel", |b| {
        b.iter_batched(
            || batch_of(500),
            |batch| black_box(encode_batch(batch, 1)),
            criterion::BatchSize::SmallInput,
        );
    });
    group.finish();
}

fn bench_decode_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_batch");
    for size in [10, 500, 5000] {
        let encoded = encode_batch(batch_of(size), 50);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter_batched(
                || encoded.clone(),
                |docs| black_box(decode_batch(docs, 50)),
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let shape = vec![
        (
            "name".to_string(),
            ExtractedValue::Document(vec![(
                "type".to_string(),
                ExtractedValue::String("string".to_string()),
            )]),
        ),
        (
            "email".to_string(),
            ExtractedValue::Document(vec![
                ("type".to_string(), ExtractedValue::String("string".to_string())),
                (
                    "constraints".to_string(),
                    ExtractedValue::Document(vec![(
                        "format".to_string(),
                        ExtractedValue::String("email".to_string()),
                    )]),
                ),
            ]),
        ),
        (
            "age".to_string(),
            ExtractedValue::Document(vec![(
                "type".to_string(),
                ExtractedValue::String("int64".to_string()),
            )]),
        ),
    ];
    let schema = DocumentSchema::from_shape(&shape).unwrap();
    register_schema("bench.User", schema).unwrap();
    let cached = lookup_schema("bench.User").unwrap();

    let docs = encode_batch(batch_of(1000), 50);
    c.bench_function("validate_1000_docs", |b| {
        b.iter(|| {
            for doc in &docs {
                black_box(validate_document(doc, &cached));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_encode_batch,
    bench_encode_sequential_vs_parallel,
    bench_decode_batch,
    bench_validate
);
criterion_main!(benches);
