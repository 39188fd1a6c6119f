//! Active transaction table.

use crate::types::{DistributedTxId, Identifier};
use std::collections::HashMap;

/// A transaction that has started but not reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ActiveTx {
    pub xid: DistributedTxId,
    /// Offset of the transaction's `Start` entry in the current segment.
    pub start_offset: u64,
}

/// Maps identifiers to in-flight transactions and hands out new identifiers.
#[derive(Debug)]
pub(crate) struct ActiveTransactionTable {
    rows: HashMap<Identifier, ActiveTx>,
    /// Last identifier handed out or seen during replay.
    last: Identifier,
}

impl Default for ActiveTransactionTable {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            last: Identifier::new(0),
        }
    }
}

impl ActiveTransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next free identifier, skipping ones still in use.
    pub fn allocate(&mut self) -> Identifier {
        loop {
            self.last = self.last.next();
            if !self.rows.contains_key(&self.last) {
                return self.last;
            }
        }
    }

    /// Makes later allocations continue past an identifier found on disk.
    pub fn observe(&mut self, identifier: Identifier) {
        if identifier > self.last {
            self.last = identifier;
        }
    }

    pub fn insert(&mut self, identifier: Identifier, xid: DistributedTxId, start_offset: u64) {
        self.rows.insert(identifier, ActiveTx { xid, start_offset });
    }

    pub fn get(&self, identifier: Identifier) -> Option<&ActiveTx> {
        self.rows.get(&identifier)
    }

    pub fn contains(&self, identifier: Identifier) -> bool {
        self.rows.contains_key(&identifier)
    }

    pub fn remove(&mut self, identifier: Identifier) -> Option<ActiveTx> {
        self.rows.remove(&identifier)
    }

    pub fn set_start_offset(&mut self, identifier: Identifier, offset: u64) {
        if let Some(row) = self.rows.get_mut(&identifier) {
            row.start_offset = offset;
        }
    }

    /// Offset of the oldest `Start` still active.
    pub fn earliest_start(&self) -> Option<u64> {
        self.rows.values().map(|row| row.start_offset).min()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All rows, sorted by identifier.
    pub fn snapshot(&self) -> Vec<(Identifier, ActiveTx)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .map(|(id, row)| (*id, row.clone()))
            .collect();
        rows.sort_by_key(|(id, _)| *id);
        rows
    }
}
