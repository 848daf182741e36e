//! Store-wide metadata contract.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::TxId;

/// Contract for the metadata collaborator notified on constraint activation.
///
/// Downstream read-consistency checks must not trust an index as enforcing a
/// constraint until the transaction recorded here is durable.
pub trait MetadataTracker: Send + Sync {
    /// Records the transaction that introduced the newest constraint.
    fn set_latest_constraint_introducing_tx(&self, tx_id: TxId);
    /// The transaction that introduced the newest constraint.
    fn latest_constraint_introducing_tx(&self) -> TxId;
}

/// Default in-memory metadata tracker.
#[derive(Default)]
pub struct MetaStore {
    latest_constraint_tx: AtomicU64,
    updates: AtomicU64,
}

impl MetaStore {
    /// A tracker with no constraint recorded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times the constraint transaction has been recorded.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

impl MetadataTracker for MetaStore {
    fn set_latest_constraint_introducing_tx(&self, tx_id: TxId) {
        self.latest_constraint_tx.store(tx_id.0, Ordering::Relaxed);
        self.updates.fetch_add(1, Ordering::Relaxed);
    }

    fn latest_constraint_introducing_tx(&self) -> TxId {
        TxId(self.latest_constraint_tx.load(Ordering::Relaxed))
    }
}
