//! Caching layer for ledger state owned by the pool
//!
//! Provides:
//! - The current ledger's `account_root` entries (LRU, cleared on ledger close)
//! - Per-account sequence numbers with a single in-flight fetch each
use crate::error::{RemoteError, Result};
use crate::request::RequestHandle;
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;

/// Snapshot cache of `account_root` ledger entries in the current ledger.
pub struct LedgerEntryCache {
    entries: Mutex<LruCache<String, Value>>,
}

impl LedgerEntryCache {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(capacity: usize) -> Self {
        let capacity_nz = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity_nz)),
        }
    }

    pub fn get(&self, account: &str) -> Option<Value> {
        self.entries.lock().get(account).cloned()
    }

    pub fn put(&self, account: String, node: Value) {
        self.entries.lock().put(account, node);
    }

    /// Purges one account's snapshot.
    pub fn dirty(&self, account: &str) -> Option<Value> {
        self.entries.lock().pop(account)
    }

    /// Called whenever the ledger advances.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LedgerEntryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

/// How a sequence lookup moves the cached counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqAdvance {
    Peek,
    Advance,
    Rewind,
}

#[derive(Default)]
struct SequenceEntry {
    sequence: Option<u32>,
    in_flight: Option<RequestHandle>,
}

/// Next-sequence cache per account.
#[derive(Default)]
pub struct AccountSequenceCache {
    entries: Mutex<HashMap<String, SequenceEntry>>,
}

impl AccountSequenceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached next sequence, then moves it per `advance`.
    /// Advancing past `u32::MAX` fails with `tejSequenceExhausted` and
    /// leaves the counter where it was.
    pub fn account_seq(&self, account: &str, advance: SeqAdvance) -> Result<Option<u32>> {
        let mut entries = self.entries.lock();
        let Some(seq) = entries.get(account).and_then(|e| e.sequence) else {
            return Ok(None);
        };
        let next = match advance {
            SeqAdvance::Peek => seq,
            SeqAdvance::Advance => seq.checked_add(1).ok_or_else(|| {
                RemoteError::local(
                    "tejSequenceExhausted",
                    format!("sequence of {account} cannot advance past {seq}"),
                )
            })?,
            SeqAdvance::Rewind => seq.saturating_sub(1),
        };
        if let Some(entry) = entries.get_mut(account) {
            entry.sequence = Some(next);
        }
        Ok(Some(seq))
    }

    pub fn set_account_seq(&self, account: &str, seq: u32) {
        self.entries
            .lock()
            .entry(account.to_string())
            .or_default()
            .sequence = Some(seq);
    }

    /// Rewinds the counter, but only if nothing was allocated after `seq`.
    pub fn rewind_if_last(&self, account: &str, seq: u32) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(account) {
            Some(entry) if seq.checked_add(1).is_some_and(|next| entry.sequence == Some(next)) => {
                entry.sequence = Some(seq);
                true
            }
            _ => false,
        }
    }

    /// Returns the running fetch for `account`, or registers the one that
    /// `start` creates. At most one fetch is in flight per account.
    pub fn fetch_or_start<F>(&self, account: &str, start: F) -> RequestHandle
    where
        F: FnOnce() -> RequestHandle,
    {
        let mut entries = self.entries.lock();
        let entry = entries.entry(account.to_string()).or_default();
        if let Some(handle) = &entry.in_flight {
            if !handle.outcome().is_resolved() {
                return handle.clone();
            }
        }
        let handle = start();
        entry.in_flight = Some(handle.clone());
        handle
    }

    /// Records a completed fetch.
    pub fn finish_fetch(&self, account: &str, sequence: Option<u32>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(account.to_string()).or_default();
        entry.in_flight = None;
        if let Some(seq) = sequence {
            entry.sequence = Some(seq);
        }
    }

    pub fn has_in_flight(&self, account: &str) -> bool {
        self.entries
            .lock()
            .get(account)
            .map(|e| e.in_flight.is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
