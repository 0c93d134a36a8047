//! Persisted ledger with an atomic check-then-write contract
//!
//! The only synchronization primitive the core relies on is the ledger's
//! transaction: every invariant of the form "check, then write" (credit
//! consumption, prize stock decrement, payment confirmation, claim
//! transition) runs inside [`Ledger::transact`]. Two concurrent transactions
//! cannot both observe a precondition true and both commit.
//!
//! [`LedgerDb`] backs the contract with a RocksDB optimistic transaction and
//! bounded retry on commit conflict. [`MemoryLedger`] serializes transactions
//! behind a mutex and is the drop-in double for tests.

use crate::errors::{CoreError, CoreResult, StorageError};
use rocksdb::{
    OptimisticTransactionDB, OptimisticTransactionOptions, Options, SingleThreaded, WriteOptions,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Write handle available inside one atomic transaction.
///
/// `get` takes a lock on the key (RocksDB `get_for_update`), so any value
/// read through it is stable until commit.
pub trait LedgerTxn {
    fn get(&mut self, key: &[u8]) -> CoreResult<Option<Vec<u8>>>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()>;
    fn delete(&mut self, key: &[u8]) -> CoreResult<()>;
}

/// The shared persisted ledger. Passed explicitly to every service
/// (constructor injection); the core holds no ambient database handle.
pub trait Ledger: Send + Sync {
    /// Plain point read, no locking. Display paths only.
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>>;

    /// Unconditional write outside any transaction. Seed/display paths only.
    fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()>;

    fn delete(&self, key: &[u8]) -> CoreResult<()>;

    /// Keys-ordered prefix scan, bounded by `limit`.
    fn scan_prefix(&self, prefix: &[u8], limit: usize) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>>;

    /// Run `op` as one atomic unit. Either every write in a successful `op`
    /// commits, or none do. `op` may be invoked more than once when the
    /// backend retries a commit conflict, so it must be re-runnable; a
    /// domain error from `op` rolls back immediately without retry.
    fn transact(&self, op: &mut dyn FnMut(&mut dyn LedgerTxn) -> CoreResult<()>) -> CoreResult<()>;
}

// ---------------------------------------------------------------------------
// RocksDB backend
// ---------------------------------------------------------------------------

/// RocksDB-backed ledger using optimistic transactions
pub struct LedgerDb {
    db: Arc<OptimisticTransactionDB<SingleThreaded>>,
    retry_limit: u32,
}

impl LedgerDb {
    pub fn open<P: AsRef<Path>>(path: P, write_buffer_mb: usize, retry_limit: u32) -> CoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(write_buffer_mb * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = OptimisticTransactionDB::open(&opts, path)
            .map_err(|e| StorageError::OpenFailed(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            retry_limit,
        })
    }

    fn is_commit_conflict(err: &rocksdb::Error) -> bool {
        matches!(
            err.kind(),
            rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain | rocksdb::ErrorKind::TimedOut
        )
    }
}

struct RocksTxn<'a> {
    inner: rocksdb::Transaction<'a, OptimisticTransactionDB<SingleThreaded>>,
}

impl LedgerTxn for RocksTxn<'_> {
    fn get(&mut self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.inner
            .get_for_update(key, true)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.inner
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.inner
            .delete(key)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }
}

impl Ledger for LedgerDb {
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.db
            .get(key)
            .map_err(|e| StorageError::ReadFailed(e.to_string()).into())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.db
            .put(key, value)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.db
            .delete(key)
            .map_err(|e| StorageError::WriteFailed(e.to_string()).into())
    }

    fn scan_prefix(&self, prefix: &[u8], limit: usize) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut rows = Vec::new();
        let iter = self.db.iterator(rocksdb::IteratorMode::From(
            prefix,
            rocksdb::Direction::Forward,
        ));
        for item in iter {
            let (key, value) = item.map_err(|e| StorageError::ReadFailed(e.to_string()))?;
            if !key.starts_with(prefix) || rows.len() >= limit {
                break;
            }
            rows.push((key.to_vec(), value.to_vec()));
        }
        Ok(rows)
    }

    fn transact(&self, op: &mut dyn FnMut(&mut dyn LedgerTxn) -> CoreResult<()>) -> CoreResult<()> {
        let write_opts = WriteOptions::default();
        let mut txn_opts = OptimisticTransactionOptions::default();
        txn_opts.set_snapshot(true);

        for attempt in 0..self.retry_limit {
            let mut txn = RocksTxn {
                inner: self.db.transaction_opt(&write_opts, &txn_opts),
            };

            match op(&mut txn) {
                Ok(()) => match txn.inner.commit() {
                    Ok(()) => return Ok(()),
                    Err(e) if Self::is_commit_conflict(&e) => {
                        tracing::debug!(attempt, "ledger commit conflict, retrying");
                        continue;
                    }
                    Err(e) => return Err(StorageError::WriteFailed(e.to_string()).into()),
                },
                Err(err) => {
                    // Domain failure: roll back, surface as-is, no retry.
                    let _ = txn.inner.rollback();
                    return Err(err);
                }
            }
        }

        Err(StorageError::RetriesExhausted(self.retry_limit).into())
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (test double with the same atomic contract)
// ---------------------------------------------------------------------------

/// In-memory ledger. Transactions run serialized under one mutex, which
/// trivially satisfies the atomic check-then-write contract.
#[derive(Default)]
pub struct MemoryLedger {
    map: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MemTxn<'a> {
    base: &'a BTreeMap<Vec<u8>, Vec<u8>>,
    staged: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl LedgerTxn for MemTxn<'_> {
    fn get(&mut self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        if let Some(staged) = self.staged.get(key) {
            return Ok(staged.clone());
        }
        Ok(self.base.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.staged.insert(key.to_vec(), Some(value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> CoreResult<()> {
        self.staged.insert(key.to_vec(), None);
        Ok(())
    }
}

impl Ledger for MemoryLedger {
    fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.lock_map()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.lock_map()?.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> CoreResult<()> {
        self.lock_map()?.remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &[u8], limit: usize) -> CoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let map = self.lock_map()?;
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn transact(&self, op: &mut dyn FnMut(&mut dyn LedgerTxn) -> CoreResult<()>) -> CoreResult<()> {
        let mut map = self.lock_map()?;
        let mut txn = MemTxn {
            base: &map,
            staged: BTreeMap::new(),
        };
        op(&mut txn)?;
        let staged = txn.staged;
        for (key, value) in staged {
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

impl MemoryLedger {
    fn lock_map(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>>, CoreError> {
        self.map
            .lock()
            .map_err(|_| StorageError::ReadFailed("ledger mutex poisoned".to_string()).into())
    }
}
