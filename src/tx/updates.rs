//! Update values fanned out to the index and label-scan collaborators.

use smallvec::SmallVec;

use crate::primitives::worksync::Work;
use crate::schema::rule::SchemaRule;
use crate::storage::record::{PropValue, NODE_INLINE_LABELS};
use crate::types::{LabelId, NodeId, PropId, Result};

/// One node's label change, derived from a node command's images.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelUpdate {
    /// The node whose labels changed.
    pub node: NodeId,
    /// Labels before the transaction.
    pub before_labels: SmallVec<[LabelId; NODE_INLINE_LABELS]>,
    /// Labels after the transaction.
    pub after_labels: SmallVec<[LabelId; NODE_INLINE_LABELS]>,
}

/// One property change relevant to some index, derived from a property
/// command's images.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntryUpdate {
    /// The owning node.
    pub node: NodeId,
    /// The property key that changed.
    pub key: PropId,
    /// Value before the transaction, if the record was in use.
    pub before: Option<PropValue>,
    /// Value after the transaction, if the record remains in use.
    pub after: Option<PropValue>,
}

/// Contract for the index-lifecycle collaborator.
pub trait IndexLifecycle: Send + Sync {
    /// Called exactly once per logical index-create transition.
    fn create_index(&self, rule: &SchemaRule) -> Result<()>;
    /// Called exactly once per logical index-drop transition, with the rule
    /// that existed before the drop.
    fn drop_index(&self, rule: &SchemaRule) -> Result<()>;
    /// Receives batched property updates.
    fn apply_updates(&self, updates: &[IndexEntryUpdate]) -> Result<()>;
}

/// Contract for the label-scan collaborator.
pub trait LabelScanListener: Send + Sync {
    /// Receives batched label changes.
    fn apply_label_updates(&self, updates: &[LabelUpdate]) -> Result<()>;
}

/// Work item batching index entry updates for a [`WorkSync`] queue.
///
/// [`WorkSync`]: crate::primitives::worksync::WorkSync
pub struct IndexUpdatesWork(pub Vec<IndexEntryUpdate>);

impl Work<dyn IndexLifecycle> for IndexUpdatesWork {
    fn combine(mut self, other: Self) -> Self {
        self.0.extend(other.0);
        self
    }

    fn apply(self, listener: &dyn IndexLifecycle) -> Result<()> {
        listener.apply_updates(&self.0)
    }
}

/// Work item batching label updates for a [`WorkSync`] queue.
///
/// [`WorkSync`]: crate::primitives::worksync::WorkSync
pub struct LabelUpdatesWork(pub Vec<LabelUpdate>);

impl Work<dyn LabelScanListener> for LabelUpdatesWork {
    fn combine(mut self, other: Self) -> Self {
        self.0.extend(other.0);
        self
    }

    fn apply(self, listener: &dyn LabelScanListener) -> Result<()> {
        listener.apply_label_updates(&self.0)
    }
}
