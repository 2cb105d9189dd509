#![cfg(feature = "fjall")]

use mvsd_storage::fjall::{FjallOptions, FjallStore};
use mvsd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn fjall_roundtrip_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");

    {
        let store = FjallStore::open(dir.path()).expect("open fjall");
        store.put(Column::Meta, b"tip", b"one").expect("put");
        store.put(Column::Asset, b"GOLD", b"a").expect("put");
        store.put(Column::Asset, b"GOLDEN", b"b").expect("put");
        store.put(Column::Asset, b"SILVER", b"c").expect("put");

        let hits = store.scan_prefix(Column::Asset, b"GOLD").expect("scan");
        assert_eq!(hits.len(), 2);

        let mut batch = WriteBatch::new();
        batch.put(Column::Meta, b"tip", b"two");
        batch.delete(Column::Asset, b"SILVER");
        store.write_batch(&batch).expect("commit");
    }

    let options = FjallOptions {
        sync_writes: true,
        ..FjallOptions::default()
    };
    let store = FjallStore::open_with_options(dir.path(), options).expect("reopen");
    assert_eq!(
        store.get(Column::Meta, b"tip").expect("get"),
        Some(b"two".to_vec())
    );
    assert!(!store.contains(Column::Asset, b"SILVER").expect("get"));
}
