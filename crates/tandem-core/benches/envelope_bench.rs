// Criterion benchmarks for the envelope codec
//
// Run with:
//   cargo bench -p tandem-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tandem_core::{Envelope, ErrorObject, Id, IdSlot, METHOD_NOT_FOUND};

fn bench_envelope_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_decode");

    let request = r#"{"jsonrpc":"2.0","id":7,"method":"f1","params":{"Age":19,"last":"l","first":"F"}}"#;
    group.bench_function("request", |b| {
        b.iter(|| serde_json::from_str::<Envelope>(black_box(request)).unwrap());
    });

    let response = r#"{"jsonrpc":"2.0","id":"a-1","result":{"name":"Fl","age":19}}"#;
    group.bench_function("response", |b| {
        b.iter(|| serde_json::from_str::<Envelope>(black_box(response)).unwrap());
    });

    group.finish();
}

fn bench_envelope_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_encode");

    let failure = Envelope::failure(
        IdSlot::Id(Id::Number(7)),
        ErrorObject::new(METHOD_NOT_FOUND, "no handler for method f9"),
    );
    group.bench_function("failure", |b| {
        b.iter(|| serde_json::to_vec(black_box(&failure)).unwrap());
    });

    let notification: Envelope =
        serde_json::from_str(r#"{"jsonrpc":"2.0","method":"tick","params":[1,2,3]}"#).unwrap();
    group.bench_function("notification", |b| {
        b.iter(|| serde_json::to_vec(black_box(&notification)).unwrap());
    });

    group.finish();
}

criterion_group!(benches, bench_envelope_decode, bench_envelope_encode);
criterion_main!(benches);
