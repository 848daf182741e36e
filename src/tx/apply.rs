//! Batched transaction application.
//!
//! A pipeline is an ordered list of appliers; every command of a transaction
//! is offered to each applier in pipeline order, sequentially, before the
//! appliers' completion hooks run. Application is at-least-once safe:
//! re-applying an after-image to a store already in that state is a no-op,
//! and drop-side releases are guarded by the slot state observed immediately
//! before the write, so replay cannot double-free.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::primitives::worksync::WorkSync;
use crate::storage::meta::MetadataTracker;
use crate::storage::record::SchemaRecord;
use crate::storage::stores::Stores;
use crate::tx::command::{Command, SchemaCommand};
use crate::tx::updates::{
    IndexEntryUpdate, IndexLifecycle, IndexUpdatesWork, LabelScanListener, LabelUpdate,
    LabelUpdatesWork,
};
use crate::types::{Result, TesseraError, TxId};

/// One transaction's decoded commands, ready to apply.
#[derive(Clone, Debug)]
pub struct TransactionToApply {
    /// Transaction id from the log.
    pub tx_id: TxId,
    /// Commands in log order.
    pub commands: Vec<Command>,
}

impl TransactionToApply {
    /// Bundles commands under a transaction id.
    pub fn new(tx_id: TxId, commands: Vec<Command>) -> Self {
        Self { tx_id, commands }
    }
}

/// An applier consumes decoded commands and mutates its store or dependent
/// subsystem state.
pub trait CommandApplier {
    /// Offers one command. Appliers ignore kinds they do not handle.
    fn apply(&mut self, tx_id: TxId, command: &Command) -> Result<()>;

    /// Runs after every command of the transaction has been offered. Used to
    /// flush batched side effects before the apply pass is acknowledged.
    fn complete(&mut self, tx_id: TxId) -> Result<()> {
        let _ = tx_id;
        Ok(())
    }
}

/// Drives one transaction through an applier pipeline.
///
/// Any error aborts the pass immediately and propagates; a transaction is
/// never acknowledged with only a subset of its appliers applied.
pub fn apply_transaction(
    tx: &TransactionToApply,
    appliers: &mut [&mut dyn CommandApplier],
) -> Result<()> {
    for command in &tx.commands {
        for applier in appliers.iter_mut() {
            applier.apply(tx.tx_id, command)?;
        }
    }
    for applier in appliers.iter_mut() {
        applier.complete(tx.tx_id)?;
    }
    debug!(tx = tx.tx_id.0, commands = tx.commands.len(), "apply.tx");
    Ok(())
}

/// The legal schema record transitions.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SchemaTransition {
    /// A rule came into existence in this transaction.
    Create,
    /// An existing rule became constraint-enforcing.
    ConstraintActivation,
    /// A rule was removed.
    Drop,
}

/// Classifies a schema command's before/after images.
///
/// Anything outside the three known shapes signals an engine defect or a
/// corrupted log and must not be silently accepted.
pub fn classify_schema_transition(
    before: &SchemaRecord,
    after: &SchemaRecord,
) -> Result<SchemaTransition> {
    if !before.in_use && after.in_use && after.created {
        return Ok(SchemaTransition::Create);
    }
    if before.in_use && after.in_use && !before.constraint && after.constraint {
        return Ok(SchemaTransition::ConstraintActivation);
    }
    if before.in_use && !after.in_use {
        return Ok(SchemaTransition::Drop);
    }
    if !before.in_use && after.in_use {
        return Err(TesseraError::InvalidSchemaTransition(
            "rule appeared without the created marker",
        ));
    }
    if before.in_use && after.in_use {
        return Err(TesseraError::InvalidSchemaTransition(
            "in-place rewrite without constraint activation",
        ));
    }
    Err(TesseraError::InvalidSchemaTransition(
        "neither image is in use",
    ))
}

/// Applier that writes record after-images into the stores and keeps the
/// schema cache and store-wide metadata in step.
///
/// Side effects are ordered after the durable record write, so a failure
/// leaves either nothing or a record image that replay will simply rewrite.
pub struct StoreApplier<'a> {
    stores: &'a Stores,
}

impl<'a> StoreApplier<'a> {
    /// An applier over the given store set.
    pub fn new(stores: &'a Stores) -> Self {
        Self { stores }
    }

    fn apply_schema(&mut self, tx_id: TxId, command: &SchemaCommand) -> Result<()> {
        let schema = self.stores.schema();
        match classify_schema_transition(&command.before, &command.after)? {
            SchemaTransition::Create => {
                schema.apply_record(&command.after, &command.payload_records)?;
                if command.after.constraint {
                    self.stores.meta().set_latest_constraint_introducing_tx(tx_id);
                }
                self.stores.schema_cache().add(command.rule.clone());
                trace!(id = command.after.id.0, "apply.schema.create");
            }
            SchemaTransition::ConstraintActivation => {
                schema.apply_record(&command.after, &command.payload_records)?;
                self.stores.meta().set_latest_constraint_introducing_tx(tx_id);
                self.stores.schema_cache().add(command.rule.clone());
                trace!(id = command.after.id.0, "apply.schema.constraint");
            }
            SchemaTransition::Drop => {
                let was_in_use = schema.in_use(command.before.id)?;
                schema.apply_record(&command.after, &command.payload_records)?;
                if was_in_use {
                    schema.release(command.before.id, command.before.payload_block)?;
                }
                self.stores.schema_cache().remove(command.before.id);
                trace!(id = command.before.id.0, replayed = !was_in_use, "apply.schema.drop");
            }
        }
        Ok(())
    }
}

impl CommandApplier for StoreApplier<'_> {
    fn apply(&mut self, tx_id: TxId, command: &Command) -> Result<()> {
        match command {
            Command::LabelToken(c) => self.stores.labels().apply_command(c),
            Command::PropertyKeyToken(c) => self.stores.property_keys().apply_command(c),
            Command::RelTypeToken(c) => self.stores.relationship_types().apply_command(c),
            Command::Node(c) => self.stores.nodes().put(&c.after),
            Command::Property(c) => self.stores.properties().put(&c.after),
            Command::Schema(c) => self.apply_schema(tx_id, c),
        }
    }
}

/// Applier that fans schema transitions out to the index-lifecycle
/// collaborator and batches entity/property changes into the
/// work-synchronization queues.
///
/// Batches are handed over in [`CommandApplier::complete`], and the queues
/// acknowledge only after a flush, so updates are visible before the
/// transaction's apply pass is reported complete.
pub struct IndexApplier<'a> {
    stores: &'a Stores,
    lifecycle: Arc<dyn IndexLifecycle>,
    index_sync: &'a WorkSync<dyn IndexLifecycle, IndexUpdatesWork>,
    label_sync: &'a WorkSync<dyn LabelScanListener, LabelUpdatesWork>,
    pending_entries: Vec<IndexEntryUpdate>,
    pending_labels: Vec<LabelUpdate>,
}

impl<'a> IndexApplier<'a> {
    /// An applier wiring the given collaborators.
    pub fn new(
        stores: &'a Stores,
        lifecycle: Arc<dyn IndexLifecycle>,
        index_sync: &'a WorkSync<dyn IndexLifecycle, IndexUpdatesWork>,
        label_sync: &'a WorkSync<dyn LabelScanListener, LabelUpdatesWork>,
    ) -> Self {
        Self {
            stores,
            lifecycle,
            index_sync,
            label_sync,
            pending_entries: Vec::new(),
            pending_labels: Vec::new(),
        }
    }

    fn apply_schema(&mut self, command: &SchemaCommand) -> Result<()> {
        match classify_schema_transition(&command.before, &command.after)? {
            SchemaTransition::Create => {
                if !command.rule.is_constraint() {
                    self.lifecycle.create_index(&command.rule)?;
                    trace!(id = command.after.id.0, "apply.index.create");
                }
            }
            SchemaTransition::Drop => {
                if !command.rule.is_constraint() {
                    // the carried rule is the one that existed before the drop
                    self.lifecycle.drop_index(&command.rule)?;
                    trace!(id = command.before.id.0, "apply.index.drop");
                }
            }
            SchemaTransition::ConstraintActivation => {}
        }
        Ok(())
    }
}

impl CommandApplier for IndexApplier<'_> {
    fn apply(&mut self, _tx_id: TxId, command: &Command) -> Result<()> {
        match command {
            Command::Schema(c) => self.apply_schema(c)?,
            Command::Node(c) => {
                if c.before.labels != c.after.labels {
                    self.pending_labels.push(LabelUpdate {
                        node: c.after.node_id(),
                        before_labels: c.before.labels.clone(),
                        after_labels: c.after.labels.clone(),
                    });
                }
            }
            Command::Property(c) => {
                let key = if c.after.in_use { c.after.key } else { c.before.key };
                if self.stores.schema_cache().has_index_on_property(key) {
                    self.pending_entries.push(IndexEntryUpdate {
                        node: if c.after.in_use { c.after.node } else { c.before.node },
                        key,
                        before: c.before.in_use.then_some(c.before.value),
                        after: c.after.in_use.then_some(c.after.value),
                    });
                }
            }
            Command::LabelToken(_) | Command::PropertyKeyToken(_) | Command::RelTypeToken(_) => {}
        }
        Ok(())
    }

    fn complete(&mut self, _tx_id: TxId) -> Result<()> {
        if !self.pending_labels.is_empty() {
            let updates = std::mem::take(&mut self.pending_labels);
            self.label_sync.apply(LabelUpdatesWork(updates))?;
        }
        if !self.pending_entries.is_empty() {
            let updates = std::mem::take(&mut self.pending_entries);
            self.index_sync.apply(IndexUpdatesWork(updates))?;
        }
        Ok(())
    }
}
