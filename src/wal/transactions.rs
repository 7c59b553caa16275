//! Active transaction table
//!
//! Tracks every transaction that has a begin record but no commit or
//! rollback yet, keyed by transaction id.

use std::collections::BTreeMap;

use crate::record::ActiveTransaction;

#[derive(Debug, Default)]
pub struct ActiveTransactionTable {
    entries: BTreeMap<u32, ActiveTransaction>,
}

impl ActiveTransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, snapshot: ActiveTransaction) {
        self.entries.insert(snapshot.transaction_id, snapshot);
    }

    pub fn is_active(&self, transaction_id: u32) -> bool {
        self.entries.contains_key(&transaction_id)
    }

    /// Drop a finished transaction, returning its snapshot
    pub fn end(&mut self, transaction_id: u32) -> Option<ActiveTransaction> {
        self.entries.remove(&transaction_id)
    }

    /// Snapshot for a checkpoint record, oldest begin first
    pub fn snapshot(&self) -> Vec<ActiveTransaction> {
        let mut active: Vec<ActiveTransaction> = self.entries.values().copied().collect();
        active.sort_by_key(|t| t.first_sequence_id);
        active
    }
}
