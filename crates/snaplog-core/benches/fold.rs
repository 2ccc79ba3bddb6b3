use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use serde_json::json;
use snaplog_core::archive::codec::{decode_page, encode_page};
use snaplog_core::archive::PageBatch;
use snaplog_core::snap::{Snapshot, fold, merge};
use snaplog_core::store::EventStore;
use snaplog_core::Event;

const SIZES: [usize; 3] = [100, 1_000, 10_000];

fn synthetic_events(n: usize) -> Vec<Event> {
    (1..=n as u64)
        .map(|id| Event {
            id,
            timestamp: 1_700_000_000 + i64::try_from(id / 10).unwrap_or(0),
            actor: "bench@example.com".into(),
            payload: json!({
                format!("cat{}", id % 16): {
                    format!("key{}", id % 64): id,
                    "title": format!("post {id}"),
                }
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        })
        .collect()
}

fn bench_fold(c: &mut Criterion) {
    let mut group = c.benchmark_group("snap.fold");
    for n in SIZES {
        let events = synthetic_events(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &events, |b, events| {
            b.iter(|| black_box(fold(&Snapshot::new(), events)))
        });
    }
    group.finish();

    let base = fold(&Snapshot::new(), &synthetic_events(10_000)).unwrap_or_default();
    let fresh = fold(&Snapshot::new(), &synthetic_events(1_000)).unwrap_or_default();
    c.bench_function("snap.merge/10000+1000", |b| {
        b.iter(|| black_box(merge(&base, &fresh)))
    });
}

fn bench_page_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive.codec");
    for n in SIZES {
        let events = synthetic_events(n);
        let Ok(batch) = PageBatch::new(events.clone()) else {
            continue;
        };
        let Ok(name) = batch.name() else {
            continue;
        };
        let Ok((bytes, _)) = encode_page(&name, &events) else {
            continue;
        };
        group.throughput(Throughput::Bytes(batch.byte_len()));
        group.bench_with_input(BenchmarkId::new("encode", n), &events, |b, events| {
            b.iter(|| black_box(encode_page(&name, events)))
        });
        group.bench_with_input(BenchmarkId::new("decode", n), &bytes, |b, bytes| {
            b.iter(|| black_box(decode_page(&name, bytes)))
        });
    }
    group.finish();
}

fn bench_append(c: &mut Criterion) {
    let payload = json!({"post": {"title": "bench"}})
        .as_object()
        .cloned()
        .unwrap_or_default();
    c.bench_function("store.append", |b| {
        let Ok(mut store) = EventStore::open_in_memory() else {
            return;
        };
        b.iter(|| black_box(store.append("bench@example.com", payload.clone())));
    });
}

criterion_group!(benches, bench_fold, bench_page_codec, bench_append);
criterion_main!(benches);
