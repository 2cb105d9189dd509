//! In-process store used by tests and the `memory` backend.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Column, KeyValueStore, PrefixVisitor, ScanResult, StoreError, WriteBatch, WriteOp};

type Partition = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct MemoryStore {
    partitions: RwLock<Vec<Partition>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            partitions: RwLock::new(vec![Partition::new(); Column::ALL.len()]),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held in `column`.
    pub fn len(&self, column: Column) -> usize {
        self.read()[column.index()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().iter().all(BTreeMap::is_empty)
    }

    // Every mutation is a single map operation, so a poisoned lock still guards
    // consistent data.
    fn read(&self) -> RwLockReadGuard<'_, Vec<Partition>> {
        self.partitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Partition>> {
        self.partitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn prefixed<'m>(
    partition: &'m Partition,
    prefix: &'m [u8],
) -> impl Iterator<Item = (&'m Vec<u8>, &'m Vec<u8>)> + 'm {
    partition
        .range(prefix.to_vec()..)
        .take_while(move |(key, _)| key.starts_with(prefix))
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.read()[column.index()].get(key).cloned())
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        self.write()[column.index()].insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<(), StoreError> {
        self.write()[column.index()].remove(key);
        Ok(())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.read();
        Ok(prefixed(&guard[column.index()], prefix)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn for_each_prefix<'a>(
        &self,
        column: Column,
        prefix: &[u8],
        visitor: &mut PrefixVisitor<'a>,
    ) -> Result<(), StoreError> {
        let guard = self.read();
        for (key, value) in prefixed(&guard[column.index()], prefix) {
            visitor(key.as_slice(), value.as_slice())?;
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut guard = self.write();
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    guard[column.index()].insert(key.as_slice().to_vec(), value.as_slice().to_vec());
                }
                WriteOp::Delete { column, key } => {
                    guard[column.index()].remove(key.as_slice());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_scan_stops_at_prefix_boundary() {
        let store = MemoryStore::new();
        store.put(Column::Meta, b"a:1", b"1").expect("put");
        store.put(Column::Meta, b"a:2", b"2").expect("put");
        store.put(Column::Meta, b"b:1", b"3").expect("put");
        store.put(Column::Asset, b"a:3", b"4").expect("put");

        let hits = store.scan_prefix(Column::Meta, b"a:").expect("scan");
        assert_eq!(
            hits,
            vec![
                (b"a:1".to_vec(), b"1".to_vec()),
                (b"a:2".to_vec(), b"2".to_vec())
            ]
        );
        assert_eq!(store.len(Column::Meta), 3);
    }

    #[test]
    fn batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(Column::Did, b"ALICE", b"x");
        batch.delete(Column::Did, b"ALICE");
        batch.put(Column::Did, b"BOB", b"y");
        store.write_batch(&batch).expect("batch");
        assert!(!store.contains(Column::Did, b"ALICE").expect("get"));
        assert_eq!(store.get(Column::Did, b"BOB").expect("get"), Some(b"y".to_vec()));
        assert_eq!(batch.touched(), Column::Did.bit());
    }
}
