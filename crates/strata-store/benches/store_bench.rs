use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_store::{FileState, FileStore, MetadataType, StoreConfig};
use tempfile::TempDir;

const REFCOUNT: MetadataType = MetadataType::new("_refcount");

fn setup() -> (TempDir, FileStore, FileState, FileState) {
    let temp = TempDir::new().unwrap();
    let incomplete = FileState::under(temp.path(), "incomplete");
    let complete = FileState::under(temp.path(), "complete");
    let store = FileStore::builder(StoreConfig::default())
        .states([incomplete.clone(), complete.clone()])
        .build()
        .unwrap();
    (temp, store, incomplete, complete)
}

fn bench_stat(c: &mut Criterion) {
    let (_temp, store, incomplete, _) = setup();
    let states = [incomplete.clone()];
    store
        .create_file("abcd", &states, &incomplete, 4096)
        .unwrap();

    c.bench_function("file_stat", |b| {
        b.iter(|| store.file_stat(black_box("abcd"), &states).unwrap())
    });
}

fn bench_write_metadata(c: &mut Criterion) {
    let (_temp, store, incomplete, _) = setup();
    let states = [incomplete.clone()];
    store.create_file("abcd", &states, &incomplete, 0).unwrap();

    let mut n = 0u64;
    c.bench_function("write_file_metadata", |b| {
        b.iter(|| {
            n += 1;
            store
                .write_file_metadata("abcd", &states, &REFCOUNT, &n.to_le_bytes())
                .unwrap()
        })
    });
}

fn bench_move_round_trip(c: &mut Criterion) {
    let (_temp, store, incomplete, complete) = setup();
    let both = [incomplete.clone(), complete.clone()];
    store.create_file("abcd", &both, &incomplete, 0).unwrap();

    c.bench_function("move_file_round_trip", |b| {
        b.iter(|| {
            store.move_file("abcd", &both, &complete).unwrap();
            store.move_file("abcd", &both, &incomplete).unwrap();
        })
    });
}

criterion_group!(benches, bench_stat, bench_write_metadata, bench_move_round_trip);
criterion_main!(benches);
