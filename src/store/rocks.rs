//! RocksDB-backed interval store.
//!
//! The store is an ordered byte-key to byte-value map on top of RocksDB's
//! optimistic transaction database. Writers run inside [`IntervalStore::transact`];
//! any key read through [`StoreTxn::get_for_update`] or written by the
//! transaction is checked at commit, and a concurrent modification aborts
//! the whole transaction with [`IntervalError::Conflict`].

use crate::error::{IntervalError, Result};
use rocksdb::{
    Direction, IteratorMode, MultiThreaded, OptimisticTransactionDB,
    OptimisticTransactionOptions, Options, SnapshotWithThreadMode, Transaction, WriteOptions,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

type Db = OptimisticTransactionDB<MultiThreaded>;

/// A key-value pair as returned by scans.
pub type KvPair = (Box<[u8]>, Box<[u8]>);

/// Durable ordered key-value store with optimistic transactions.
pub struct IntervalStore {
    db: Db,
    path: PathBuf,
}

impl std::fmt::Debug for IntervalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalStore")
            .field("path", &self.path)
            .finish()
    }
}

impl IntervalStore {
    /// Open (or create) the store in `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = Options::default();
        options.create_if_missing(true);

        let db = Db::open(&options, &path)
            .map_err(|e| IntervalError::Io(format!("failed to open store at {path:?}: {e}")))?;
        tracing::info!("Opened interval store at {:?}", path);

        Ok(Self { db, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    /// Ascending scan of every key starting with `prefix`.
    ///
    /// The iterator is lazy; calling this again restarts from the beginning.
    pub fn scan_prefix<'a>(&'a self, prefix: &'a [u8]) -> impl Iterator<Item = Result<KvPair>> + 'a {
        prefix_bounded(
            self.db
                .iterator(IteratorMode::From(prefix, Direction::Forward)),
            prefix,
        )
    }

    /// Consistent point-in-time view for multi-key reads.
    pub fn snapshot(&self) -> StoreSnapshot<'_> {
        StoreSnapshot {
            snapshot: self.db.snapshot(),
        }
    }

    /// Run `f` inside a transaction and commit its writes atomically.
    ///
    /// If `f` fails nothing is written. If a concurrent transaction modified
    /// a key `f` fenced or wrote, the commit fails with
    /// [`IntervalError::Conflict`]; retrying is up to the caller.
    pub fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTxn<'_>) -> Result<T>,
    {
        let write_opts = WriteOptions::default();
        let mut txn_opts = OptimisticTransactionOptions::new();
        txn_opts.set_snapshot(true);

        let txn = StoreTxn {
            txn: self.db.transaction_opt(&write_opts, &txn_opts),
        };
        // Dropping an uncommitted transaction discards its writes.
        let value = f(&txn)?;
        txn.txn.commit()?;
        Ok(value)
    }
}

/// Shared handle passed to every component.
pub type SharedStore = Arc<IntervalStore>;

/// Open a store and wrap it for sharing.
pub fn open_shared(path: impl AsRef<Path>) -> Result<SharedStore> {
    Ok(Arc::new(IntervalStore::open(path)?))
}

/// View of the store inside a running transaction.
pub struct StoreTxn<'a> {
    txn: Transaction<'a, Db>,
}

impl StoreTxn<'_> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.txn.get(key)?)
    }

    /// Read `key` and register it for conflict checking at commit.
    pub fn get_for_update(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.txn.get_for_update(key, true)?)
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        Ok(self.txn.put(key, value)?)
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        Ok(self.txn.delete(key)?)
    }

    /// Greatest key under `prefix`, found with a single reverse seek.
    ///
    /// `upper_bound` must sort after every key under the prefix.
    pub fn last_with_prefix(&self, prefix: &[u8], upper_bound: &[u8]) -> Result<Option<KvPair>> {
        let mut iter = self
            .txn
            .iterator(IteratorMode::From(upper_bound, Direction::Reverse));
        match iter.next() {
            Some(Ok((key, value))) if key.starts_with(prefix) => Ok(Some((key, value))),
            Some(Ok(_)) | None => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

/// Point-in-time read view.
pub struct StoreSnapshot<'a> {
    snapshot: SnapshotWithThreadMode<'a, Db>,
}

impl<'a> StoreSnapshot<'a> {
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key)?)
    }

    pub fn scan_prefix<'b>(&'b self, prefix: &'b [u8]) -> impl Iterator<Item = Result<KvPair>> + 'b {
        prefix_bounded(
            self.snapshot
                .iterator(IteratorMode::From(prefix, Direction::Forward)),
            prefix,
        )
    }
}

fn prefix_bounded<'a, I>(iter: I, prefix: &'a [u8]) -> impl Iterator<Item = Result<KvPair>> + 'a
where
    I: Iterator<Item = std::result::Result<KvPair, rocksdb::Error>> + 'a,
{
    iter.map(|item| item.map_err(IntervalError::from))
        .take_while(move |item| match item {
            Ok((key, _)) => key.starts_with(prefix),
            Err(_) => true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, IntervalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = IntervalStore::open(dir.path().join("db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_transact_commits_all_writes() {
        let (_dir, store) = open_temp();
        store
            .transact(|txn| {
                txn.put(b"a1", b"one")?;
                txn.put(b"a2", b"two")?;
                Ok(())
            })
            .unwrap();

        assert_eq!(store.get(b"a1").unwrap(), Some(b"one".to_vec()));
        assert_eq!(store.get(b"a2").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.get(b"a3").unwrap(), None);
    }

    #[test]
    fn test_failed_closure_writes_nothing() {
        let (_dir, store) = open_temp();
        let result: Result<()> = store.transact(|txn| {
            txn.put(b"k", b"v")?;
            Err(IntervalError::InvalidHeartbeat("abort".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.get(b"k").unwrap(), None);
    }

    #[test]
    fn test_scan_prefix_is_ordered_and_bounded() {
        let (_dir, store) = open_temp();
        store
            .transact(|txn| {
                txn.put(b"b2", b"")?;
                txn.put(b"a", b"")?;
                txn.put(b"b1", b"")?;
                txn.put(b"c", b"")?;
                Ok(())
            })
            .unwrap();

        let keys: Vec<Vec<u8>> = store
            .scan_prefix(b"b")
            .map(|item| item.unwrap().0.to_vec())
            .collect();
        assert_eq!(keys, vec![b"b1".to_vec(), b"b2".to_vec()]);

        // Restartable.
        assert_eq!(store.scan_prefix(b"b").count(), 2);
    }

    #[test]
    fn test_last_with_prefix() {
        let (_dir, store) = open_temp();
        store
            .transact(|txn| {
                txn.put(b"p1", b"x")?;
                txn.put(b"p3", b"y")?;
                txn.put(b"q0", b"z")?;
                Ok(())
            })
            .unwrap();

        let last = store
            .transact(|txn| txn.last_with_prefix(b"p", b"p\xff"))
            .unwrap()
            .unwrap();
        assert_eq!(&*last.0, b"p3");

        let none = store
            .transact(|txn| txn.last_with_prefix(b"o", b"o\xff"))
            .unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_concurrent_fenced_write_conflicts() {
        let (_dir, store) = open_temp();

        let result = store.transact(|txn| {
            txn.get_for_update(b"fence")?;
            // Another writer commits to the fenced key before we do.
            store.transact(|other| other.put(b"fence", b"theirs"))?;
            txn.put(b"fence", b"ours")
        });

        assert_eq!(result, Err(IntervalError::Conflict));
        assert_eq!(store.get(b"fence").unwrap(), Some(b"theirs".to_vec()));
    }

    #[test]
    fn test_snapshot_is_stable() {
        let (_dir, store) = open_temp();
        store.transact(|txn| txn.put(b"k", b"old")).unwrap();

        let snapshot = store.snapshot();
        store.transact(|txn| txn.put(b"k", b"new")).unwrap();

        assert_eq!(snapshot.get(b"k").unwrap(), Some(b"old".to_vec()));
        assert_eq!(store.get(b"k").unwrap(), Some(b"new".to_vec()));
    }
}
