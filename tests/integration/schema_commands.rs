#![allow(missing_docs)]

use std::sync::Arc;

use parking_lot::Mutex;
use tessera::primitives::worksync::WorkSync;
use tessera::schema::descriptor::SchemaDescriptor;
use tessera::schema::rule::{ConstraintKind, ConstraintRule, IndexRule, SchemaRule};
use tessera::storage::record::SchemaRecord;
use tessera::storage::{MetadataTracker, StoreOptions, Stores};
use tessera::tx::{
    apply_transaction, Command, CommandApplier, IndexApplier, IndexEntryUpdate, IndexLifecycle,
    IndexUpdatesWork, LabelScanListener, LabelUpdate, LabelUpdatesWork, SchemaCommand, StoreApplier,
    TransactionToApply,
};
use tessera::types::{LabelId, PropId, RecordId, Result, TesseraError, TxId};

#[derive(Default)]
struct RecordingIndexes {
    created: Mutex<Vec<SchemaRule>>,
    dropped: Mutex<Vec<SchemaRule>>,
    updates: Mutex<Vec<Vec<IndexEntryUpdate>>>,
}

impl IndexLifecycle for RecordingIndexes {
    fn create_index(&self, rule: &SchemaRule) -> Result<()> {
        self.created.lock().push(rule.clone());
        Ok(())
    }

    fn drop_index(&self, rule: &SchemaRule) -> Result<()> {
        self.dropped.lock().push(rule.clone());
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

fn label_index_rule(id: RecordId, label: u32, prop: u32) -> SchemaRule {
    SchemaRule::Index(IndexRule {
        id,
        name: "person_name_idx".into(),
        descriptor: SchemaDescriptor::for_label(LabelId(label), &[PropId(prop)]),
    })
}

fn create_command(stores: &Stores, rule: &SchemaRule) -> Result<Command> {
    let payload = stores.schema().plan_payload(rule)?;
    let before = SchemaRecord::unused(rule.id());
    let mut after = SchemaRecord::in_use(rule.id(), payload[0].id).with_created();
    if rule.is_constraint() {
        after = after.with_constraint();
    }
    Ok(Command::Schema(SchemaCommand::new(
        before,
        after,
        rule.clone(),
        payload,
    )?))
}

#[test]
fn create_writes_record_and_creates_index_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = label_index_rule(id, 2, 8);

    harness.apply(TxId(1337), vec![create_command(&harness.stores, &rule)?])?;

    let stored = harness.stores.schema().load_rule(id)?;
    assert_eq!(stored, rule);
    assert_eq!(harness.indexes.created.lock().as_slice(), &[rule.clone()]);
    assert!(harness.indexes.dropped.lock().is_empty());
    assert_eq!(harness.stores.schema_cache().rule(id), Some(rule));
    // constraint metadata untouched by a plain index create
    assert_eq!(harness.stores.meta().update_count(), 0);
    Ok(())
}

#[test]
fn drop_writes_record_and_drops_the_original_rule() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = label_index_rule(id, 2, 8);
    let create = create_command(&harness.stores, &rule)?;
    harness.apply(TxId(1), vec![create.clone()])?;

    let Command::Schema(created) = create else {
        unreachable!()
    };
    let drop = Command::Schema(SchemaCommand::new(
        created.after.clone(),
        SchemaRecord::unused(id),
        rule.clone(),
        Vec::new(),
    )?);
    harness.apply(TxId(2), vec![drop])?;

    assert!(matches!(
        harness.stores.schema().load_rule(id),
        Err(TesseraError::NotFound)
    ));
    // exactly one drop, carrying the rule that existed, not a reconstruction
    assert_eq!(harness.indexes.dropped.lock().as_slice(), &[rule]);
    assert!(harness.stores.schema_cache().rule(id).is_none());
    assert!(matches!(
        harness.stores.schema().record_store().get(id),
        Err(TesseraError::NotFound)
    ));
    Ok(())
}

#[test]
fn constraint_activation_updates_metadata_exactly_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = SchemaRule::Constraint(ConstraintRule {
        id,
        name: "person_name_unique".into(),
        kind: ConstraintKind::Unique,
        descriptor: SchemaDescriptor::for_label(LabelId(2), &[PropId(8)]),
        owned_index: None,
    });
    let payload = harness.stores.schema().plan_payload(&rule)?;
    let before = SchemaRecord::in_use(id, payload[0].id);
    let after = before.clone().with_constraint();
    // stage the pre-activation record directly, as an earlier transaction did
    harness.stores.schema().apply_record(&before, &payload)?;

    let command = Command::Schema(SchemaCommand::new(before, after, rule.clone(), payload)?);
    harness.apply(TxId(1337), vec![command])?;

    assert_eq!(harness.stores.meta().update_count(), 1);
    assert_eq!(
        harness.stores.meta().latest_constraint_introducing_tx(),
        TxId(1337)
    );
    let record = harness.stores.schema().record_store().get(id)?;
    assert!(record.constraint);
    // activation triggers neither index create nor drop
    assert!(harness.indexes.created.lock().is_empty());
    assert!(harness.indexes.dropped.lock().is_empty());
    Ok(())
}

#[test]
fn serialized_drop_command_reconstructs_descriptor() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = label_index_rule(id, 2, 8);
    let payload = harness.stores.schema().plan_payload(&rule)?;
    let live = SchemaRecord::in_use(id, payload[0].id);

    let drop = Command::Schema(SchemaCommand::new(
        live,
        SchemaRecord::unused(id),
        rule,
        Vec::new(),
    )?);
    let bytes = drop.to_bytes()?;
    let (decoded, used) = Command::decode(&bytes)?;
    assert_eq!(used, bytes.len());
    let Command::Schema(schema) = decoded else {
        panic!("expected schema command")
    };
    assert!(!schema.after.in_use);
    assert!(schema.rule.descriptor().affects_token(2));
    assert!(schema.rule.descriptor().has_property(PropId(8)));
    Ok(())
}

#[test]
fn invalid_transition_aborts_the_apply_pass() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = label_index_rule(id, 2, 8);
    let payload = harness.stores.schema().plan_payload(&rule)?;
    // in-use -> in-use with no constraint change is no known transition
    let live = SchemaRecord::in_use(id, payload[0].id);
    let command = Command::Schema(SchemaCommand::new(
        live.clone(),
        live,
        rule,
        payload,
    )?);
    assert!(matches!(
        harness.apply(TxId(3), vec![command]),
        Err(TesseraError::InvalidSchemaTransition(_))
    ));
    Ok(())
}

#[test]
fn schema_cache_survives_via_reload_on_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let id;
    let rule;
    {
        let harness = Harness::open(dir.path())?;
        id = harness.stores.schema().allocate()?;
        rule = label_index_rule(id, 2, 8);
        harness.apply(TxId(1), vec![create_command(&harness.stores, &rule)?])?;
        harness.stores.sync()?;
    }
    let stores = Stores::open(dir.path(), &StoreOptions::default())?;
    assert_eq!(stores.schema_cache().rule(id), Some(rule));
    Ok(())
}

#[test]
fn decoded_create_command_replays_through_the_pipeline() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = label_index_rule(id, 2, 8);
    let command = create_command(&harness.stores, &rule)?;

    // the recovery path: commands come back from the log, not from memory
    let bytes = command.to_bytes()?;
    let (decoded, _) = Command::decode(&bytes)?;
    harness.apply(TxId(9), vec![decoded])?;

    assert_eq!(harness.stores.schema().load_rule(id)?, rule);
    assert_eq!(harness.indexes.created.lock().len(), 1);
    Ok(())
}

#[test]
fn unused_label_scan_listener_sees_nothing_from_schema_commands() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let harness = Harness::open(dir.path())?;
    let id = harness.stores.schema().allocate()?;
    let rule = label_index_rule(id, 2, 8);
    harness.apply(TxId(1), vec![create_command(&harness.stores, &rule)?])?;
    assert!(harness.label_scan.batches.lock().is_empty());
    assert!(harness.indexes.updates.lock().is_empty());
    Ok(())
}

mod payload_laws {
    use proptest::prelude::*;
    use tessera::schema::descriptor::SchemaDescriptor;
    use tessera::schema::rule::{IndexRule, SchemaRule};
    use tessera::types::{LabelId, PropId, RecordId};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn generated_rules_roundtrip(
            id in 0u64..1_000_000,
            label in 0u32..10_000,
            props in proptest::collection::vec(0u32..10_000, 1..6),
            name in "[a-z_]{1,40}",
        ) {
            let props: Vec<PropId> = props.into_iter().map(PropId).collect();
            let rule = SchemaRule::Index(IndexRule {
                id: RecordId(id),
                name,
                descriptor: SchemaDescriptor::for_label(LabelId(label), &props),
            });
            let decoded = SchemaRule::decode(&rule.to_bytes()).expect("decode");
            prop_assert_eq!(decoded, rule);
        }
    }
}
