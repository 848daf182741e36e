#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use tessera::primitives::worksync::WorkSync;
use tessera::schema::descriptor::SchemaDescriptor;
use tessera::schema::rule::{IndexRule, SchemaRule};
use tessera::storage::record::{
    NodeRecord, PropValue, PropertyRecord, SchemaRecord, TokenRecord,
};
use tessera::storage::{StoreOptions, Stores};
use tessera::tx::{
    apply_transaction, Command, CommandApplier, IndexApplier, IndexEntryUpdate, IndexLifecycle,
    IndexUpdatesWork, LabelScanListener, LabelUpdate, LabelUpdatesWork, NodeCommand,
    PropertyCommand, SchemaCommand, StoreApplier, TokenCommand, TransactionToApply,
};
use tessera::types::{LabelId, NodeId, PropId, Result, TxId};

#[derive(Default)]
struct RecordingIndexes {
    created: Mutex<Vec<SchemaRule>>,
    updates: Mutex<Vec<Vec<IndexEntryUpdate>>>,
}

impl IndexLifecycle for RecordingIndexes {
    fn create_index(&self, rule: &SchemaRule) -> Result<()> {
        self.created.lock().push(rule.clone());
        Ok(())
    }

    fn drop_index(&self, _rule: &SchemaRule) -> Result<()> {
        Ok(())
    }

    fn apply_updates(&self, updates: &[IndexEntryUpdate]) -> Result<()> {
        self.updates.lock().push(updates.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingLabelScan {
    batches: Mutex<Vec<Vec<LabelUpdate>>>,
}

impl LabelScanListener for RecordingLabelScan {
    fn apply_label_updates(&self, updates: &[LabelUpdate]) -> Result<()> {
        self.batches.lock().push(updates.to_vec());
        Ok(())
    }
}

struct Harness {
    stores: Stores,
    indexes: Arc<RecordingIndexes>,
    label_scan: Arc<RecordingLabelScan>,
    index_sync: WorkSync<dyn IndexLifecycle, IndexUpdatesWork>,
    label_sync: WorkSync<dyn LabelScanListener, LabelUpdatesWork>,
}

impl Harness {
    fn open(dir: &std::path::Path) -> Result<Self> {
        let stores = Stores::open(dir, &StoreOptions::default())?;
        let indexes = Arc::new(RecordingIndexes::default());
        let label_scan = Arc::new(RecordingLabelScan::default());
        let index_sync: WorkSync<dyn IndexLifecycle, IndexUpdatesWork> =
            WorkSync::new(indexes.clone());
        let label_sync: WorkSync<dyn LabelScanListener, LabelUpdatesWork> =
            WorkSync::new(label_scan.clone());
        Ok(Self {
            stores,
            indexes,
            label_scan,
            index_sync,
            label_sync,
        })
    }

    fn apply(&self, tx_id: TxId, commands: Vec<Command>) -> Result<()> {
        let tx = TransactionToApply::new(tx_id, commands);
        let mut store_applier = StoreApplier::new(&self.stores);
        let mut index_applier = IndexApplier::new(
            &self.stores,
            self.indexes.clone(),
            &self.index_sync,
            &self.label_sync,
        );
        let mut appliers: [&mut dyn CommandApplier; 2] =
            [&mut store_applier, &mut index_applier];
        apply_transaction(&tx, &mut appliers)
    }
}

fn label_token_command(stores: &Stores, name: &str) -> Result<(Command, LabelId)> {
    let id = stores.labels().record_store().allocate()?;
    let name_records = stores.labels().name_store().plan_chain(name.as_bytes())?;
    let command = Command::LabelToken(TokenCommand::new(
        TokenRecord::unused(id),
        TokenRecord {
            id,
            in_use: true,
            internal: false,
            name_block: Some(name_records[0].id),
        },
        name_records,
    )?);
    Ok((command, LabelId(id.0 as u32)))
}

#[test]
fn token_command_applies_and_refreshes_cache() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let (command, label) = label_token_command(&harness.stores, "Person")?;
    harness.apply(TxId(1), vec![command])?;
    assert_eq!(harness.stores.labels().name(label)?, Some("Person".into()));
    assert_eq!(harness.stores.labels().id_by_name("Person"), Some(label));
    Ok(())
}

#[test]
fn replaying_a_transaction_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;

    let (token_command, label) = label_token_command(&harness.stores, "Person")?;
    let node_id = harness.stores.nodes().allocate()?;
    let node_command = Command::Node(NodeCommand::new(
        NodeRecord::unused(node_id),
        NodeRecord::with_labels(node_id, &[label]),
    )?);
    let commands = vec![token_command, node_command];

    harness.apply(TxId(7), commands.clone())?;
    let node_after_first = harness.stores.nodes().get(node_id)?;
    let name_after_first = harness.stores.labels().name(label)?;

    // recovery replays the same transaction
    harness.apply(TxId(7), commands)?;
    assert_eq!(harness.stores.nodes().get(node_id)?, node_after_first);
    assert_eq!(harness.stores.labels().name(label)?, name_after_first);
    Ok(())
}

#[test]
fn replaying_a_schema_drop_does_not_double_free() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = SchemaRule::Index(IndexRule {
        id,
        name: "idx".into(),
        descriptor: SchemaDescriptor::for_label(LabelId(2), &[PropId(8)]),
    });
    let payload = harness.stores.schema().plan_payload(&rule)?;
    let live = SchemaRecord::in_use(id, payload[0].id);
    harness.stores.schema().apply_record(&live, &payload)?;

    let drop = Command::Schema(SchemaCommand::new(
        live,
        SchemaRecord::unused(id),
        rule,
        Vec::new(),
    )?);
    harness.apply(TxId(2), vec![drop.clone()])?;
    // second replay of the same drop must be a harmless no-op
    harness.apply(TxId(2), vec![drop])?;
    Ok(())
}

#[test]
fn node_label_changes_reach_the_label_scan_listener() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let node_id = harness.stores.nodes().allocate()?;
    let before = NodeRecord::unused(node_id);
    let after = NodeRecord::with_labels(node_id, &[LabelId(2), LabelId(5)]);
    harness.apply(
        TxId(3),
        vec![Command::Node(NodeCommand::new(before, after)?)],
    )?;

    let batches = harness.label_scan.batches.lock();
    assert_eq!(batches.len(), 1, "one flush per applied transaction");
    assert_eq!(batches[0].len(), 1);
    assert_eq!(batches[0][0].node, NodeId(node_id.0));
    assert_eq!(
        batches[0][0].after_labels.as_slice(),
        &[LabelId(2), LabelId(5)]
    );
    Ok(())
}

#[test]
fn property_updates_reach_indexes_only_when_one_exists() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;

    // no index yet: the property change is not forwarded
    let prop_id = harness.stores.properties().allocate()?;
    harness.apply(
        TxId(1),
        vec![Command::Property(PropertyCommand::new(
            PropertyRecord::unused(prop_id),
            PropertyRecord::new(prop_id, NodeId(1), PropId(8), PropValue::Int(40)),
        )?)],
    )?;
    assert!(harness.indexes.updates.lock().is_empty());

    // install an index over property 8, then change the property again
    let rule_id = harness.stores.schema().allocate()?;
    let rule = SchemaRule::Index(IndexRule {
        id: rule_id,
        name: "person_name_idx".into(),
        descriptor: SchemaDescriptor::for_label(LabelId(2), &[PropId(8)]),
    });
    let payload = harness.stores.schema().plan_payload(&rule)?;
    harness.apply(
        TxId(2),
        vec![Command::Schema(SchemaCommand::new(
            SchemaRecord::unused(rule_id),
            SchemaRecord::in_use(rule_id, payload[0].id).with_created(),
            rule,
            payload,
        )?)],
    )?;

    harness.apply(
        TxId(3),
        vec![Command::Property(PropertyCommand::new(
            PropertyRecord::new(prop_id, NodeId(1), PropId(8), PropValue::Int(40)),
            PropertyRecord::new(prop_id, NodeId(1), PropId(8), PropValue::Int(41)),
        )?)],
    )?;

    let updates = harness.indexes.updates.lock();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].len(), 1);
    assert_eq!(updates[0][0].key, PropId(8));
    assert_eq!(updates[0][0].before, Some(PropValue::Int(40)));
    assert_eq!(updates[0][0].after, Some(PropValue::Int(41)));
    Ok(())
}

#[test]
fn updates_are_flushed_before_apply_returns() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let node_id = harness.stores.nodes().allocate()?;
    harness.apply(
        TxId(4),
        vec![Command::Node(NodeCommand::new(
            NodeRecord::unused(node_id),
            NodeRecord::with_labels(node_id, &[LabelId(1)]),
        )?)],
    )?;
    // flush-before-acknowledge: the batch is visible the moment apply returns
    assert_eq!(harness.label_scan.batches.lock().len(), 1);
    Ok(())
}
