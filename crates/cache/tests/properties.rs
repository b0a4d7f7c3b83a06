use proptest::prelude::*;
use tabviz_cache::{compute_fingerprint, CacheHit, CacheStore, MemoryKv, SqliteKv};
use tabviz_core::{Dataset, GenericRecord, SourceFile, Value};
use tempfile::tempdir;

fn dataset(rows: usize) -> Dataset {
    Dataset::Generic(
        (0..rows)
            .map(|i| {
                let mut row = GenericRecord::new();
                row.insert("row".into(), Value::Number(i as f64));
                row.insert("city".into(), Value::text(format!("city-{}", i % 4)));
                row
            })
            .collect(),
    )
}

fn source_file() -> impl Strategy<Value = SourceFile> {
    (
        "[a-z]{1,8}\\.(csv|xlsx|pdf)",
        prop::collection::vec(any::<u8>(), 0..4096),
        0i64..2_000_000_000_000,
    )
        .prop_map(|(name, bytes, modified)| SourceFile::new(name, bytes, modified))
}

proptest! {
    #[test]
    fn fingerprint_is_deterministic(file in source_file()) {
        let copy = SourceFile::new(file.name.clone(), file.bytes.clone(), file.modified_ms);
        prop_assert_eq!(compute_fingerprint(&file), compute_fingerprint(&copy));
    }

    #[test]
    fn fingerprint_tracks_metadata(file in source_file(), bump in 1i64..1_000_000) {
        let base = compute_fingerprint(&file);

        let touched = SourceFile::new(file.name.clone(), file.bytes.clone(), file.modified_ms + bump);
        prop_assert_ne!(&base, &compute_fingerprint(&touched));

        let renamed = SourceFile::new(format!("x{}", file.name), file.bytes.clone(), file.modified_ms);
        prop_assert_ne!(&base, &compute_fingerprint(&renamed));

        let mut bytes = file.bytes.clone();
        bytes.push(0);
        let grown = SourceFile::new(file.name.clone(), bytes, file.modified_ms);
        prop_assert_ne!(&base, &compute_fingerprint(&grown));
    }

    #[test]
    fn reconcile_is_monotonic(small in 0usize..20, extra in 1usize..20) {
        let large = small + extra;
        let cache = CacheStore::open(MemoryKv::new());
        let file = SourceFile::new("survey.xlsx", b"payload".to_vec(), 42);
        let a = dataset(small);
        let b = dataset(large);

        cache.store(&file, &a);
        prop_assert!(cache.reconcile(&file, &b, Some(&a)));
        prop_assert!(!cache.reconcile(&file, &a, Some(&b)));
        let cached = cache.lookup(&file).data.map(|d| d.len());
        prop_assert_eq!(cached, Some(large));
    }
}

#[test]
fn updated_file_with_more_rows_replaces_name_entry() {
    let cache = CacheStore::open(MemoryKv::new());
    let first = SourceFile::new("survey.xlsx", b"eight rows".to_vec(), 1_000);
    cache.store(&first, &dataset(8));

    let updated = SourceFile::new("survey.xlsx", b"eleven rows now".to_vec(), 2_000);
    let lookup = cache.lookup(&updated);
    assert_eq!(lookup.hit, CacheHit::Name);
    let previous = lookup.data.expect("provisional dataset");
    assert_eq!(previous.len(), 8);

    assert!(cache.reconcile(&updated, &dataset(11), Some(&previous)));
    let exact = cache.lookup(&updated);
    assert_eq!(exact.hit, CacheHit::Exact);
    assert_eq!(exact.data.map(|d| d.len()), Some(11));
}

#[test]
fn sqlite_cache_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tabviz.sqlite");
    let file = SourceFile::new("report.pdf", vec![1, 2, 3, 4], 7);
    {
        let cache = CacheStore::open(SqliteKv::open(&path).unwrap());
        assert!(cache.store(&file, &dataset(3)));
        cache.close();
    }
    let cache = CacheStore::open(SqliteKv::open(&path).unwrap());
    let lookup = cache.lookup(&file);
    assert_eq!(lookup.hit, CacheHit::Exact);
    assert_eq!(lookup.data, Some(dataset(3)));
    let info = cache.info();
    assert_eq!(info.total_entries, 2);
    assert_eq!(info.files[0].records, 3);
}
