//! Schema store: fixed records pointing at serialized rule payloads.

use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::primitives::ids::{IdAllocator, IdKind};
use crate::primitives::pager::PageFileOptions;
use crate::schema::rule::SchemaRule;
use crate::storage::dynamic::{DynamicStore, DynamicStoreOptions};
use crate::storage::fixed::RecordStore;
use crate::storage::record::{DynamicRecord, SchemaRecord, SchemaRecordFormat};
use crate::types::{BlockId, RecordId, Result, TesseraError};

/// Fixed store of schema records whose payload chains hold serialized rules.
pub struct SchemaStore {
    records: RecordStore<SchemaRecordFormat>,
    payloads: DynamicStore,
}

impl SchemaStore {
    /// Opens the record and payload files.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        record_path: impl AsRef<Path>,
        payload_path: impl AsRef<Path>,
        page_options: &PageFileOptions,
        payload_options: &DynamicStoreOptions,
        record_tag: u8,
        payload_tag: u8,
        ids: Arc<dyn IdAllocator>,
    ) -> Result<Self> {
        let records = RecordStore::open(
            record_path,
            page_options,
            record_tag,
            Arc::clone(&ids),
            IdKind::SchemaRecord,
        )?;
        let payloads = DynamicStore::open(
            payload_path,
            page_options,
            payload_options,
            payload_tag,
            ids,
            IdKind::SchemaBlock,
        )?;
        Ok(Self { records, payloads })
    }

    /// Allocates a fresh schema record id.
    pub fn allocate(&self) -> Result<RecordId> {
        self.records.allocate()
    }

    /// Loads and decodes the rule stored under `id`.
    pub fn load_rule(&self, id: RecordId) -> Result<SchemaRule> {
        let record = self.records.get(id)?;
        let first = record
            .payload_block
            .ok_or(TesseraError::Corruption("schema record without payload"))?;
        let bytes = self.payloads.read(first)?;
        let rule = SchemaRule::decode(&bytes)?;
        if rule.id() != id {
            return Err(TesseraError::Corruption("schema rule id mismatch"));
        }
        Ok(rule)
    }

    /// Serializes `rule` and writes or rewrites its schema record.
    pub fn write_rule(&self, rule: &SchemaRule) -> Result<SchemaRecord> {
        let id = rule.id();
        let existing = match self.records.get(id) {
            Ok(record) => Some(record),
            Err(TesseraError::NotFound) => None,
            Err(err) => return Err(err),
        };
        let payload_block = self.payloads.write(&rule.to_bytes())?;
        let mut record = SchemaRecord::in_use(id, payload_block);
        if rule.is_constraint() {
            record = record.with_constraint();
        }
        self.records.put(&record)?;
        if let Some(old) = existing.and_then(|r| r.payload_block) {
            self.payloads.free(old)?;
        }
        trace!(id = id.0, constraint = record.constraint, "schema.write_rule");
        Ok(record)
    }

    /// Stages the payload chain for `rule` without touching the record slot,
    /// returning the block images a create command carries.
    pub fn plan_payload(&self, rule: &SchemaRule) -> Result<Vec<DynamicRecord>> {
        self.payloads.plan_chain(&rule.to_bytes())
    }

    /// Applies one after-image from a command: writes the carried payload
    /// block images, then the record slot.
    pub fn apply_record(&self, after: &SchemaRecord, payload_records: &[DynamicRecord]) -> Result<()> {
        for block in payload_records {
            self.payloads.put_record(block)?;
        }
        self.records.put(after)?;
        trace!(id = after.id.0, in_use = after.in_use, "schema.apply_record");
        Ok(())
    }

    /// Whether the slot under `id` is currently marked in use.
    pub fn in_use(&self, id: RecordId) -> Result<bool> {
        self.records.in_use(id)
    }

    /// Releases a dropped record's payload chain and returns its id to the
    /// allocator. The record slot must already be marked not in use.
    pub fn release(&self, id: RecordId, payload_block: Option<BlockId>) -> Result<()> {
        if let Some(first) = payload_block {
            self.payloads.free(first)?;
        }
        self.records.free(id)?;
        trace!(id = id.0, "schema.release");
        Ok(())
    }

    /// Loads every in-use rule, in id order. Used to warm the schema cache.
    pub fn load_all(&self) -> Result<Vec<SchemaRule>> {
        let mut rules = Vec::new();
        let mut ids = Vec::new();
        self.records.scan(|record| {
            ids.push(record.id);
            Ok(())
        })?;
        for id in ids {
            rules.push(self.load_rule(id)?);
        }
        Ok(rules)
    }

    /// The underlying fixed record store.
    pub fn record_store(&self) -> &RecordStore<SchemaRecordFormat> {
        &self.records
    }

    /// Flushes both backing files.
    pub fn sync(&self) -> Result<()> {
        self.records.sync()?;
        self.payloads.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ids::FreeListIds;
    use crate::schema::descriptor::SchemaDescriptor;
    use crate::schema::rule::IndexRule;
    use crate::types::{LabelId, PropId};
    use tempfile::tempdir;

    fn open_store(dir: &std::path::Path) -> Result<SchemaStore> {
        let ids: Arc<dyn IdAllocator> = Arc::new(FreeListIds::new());
        SchemaStore::open(
            dir.join("schema.store"),
            dir.join("schema.payload"),
            &PageFileOptions::default(),
            &DynamicStoreOptions {
                block_size: 64,
                max_chain_hops: 64,
            },
            7,
            8,
            ids,
        )
    }

    fn rule_named(store: &SchemaStore, name: &str) -> Result<SchemaRule> {
        Ok(SchemaRule::Index(IndexRule {
            id: store.allocate()?,
            name: name.into(),
            descriptor: SchemaDescriptor::for_label(LabelId(2), &[PropId(8)]),
        }))
    }

    #[test]
    fn write_then_load_roundtrip() -> Result<()> {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path())?;
        let rule = rule_named(&store, "person_name_idx")?;
        let record = store.write_rule(&rule)?;
        assert!(record.in_use);
        assert_eq!(store.load_rule(rule.id())?, rule);
        Ok(())
    }

    #[test]
    fn rewrite_releases_the_old_payload_chain() -> Result<()> {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path())?;
        let rule = rule_named(&store, "short")?;
        let first = store.write_rule(&rule)?;
        let renamed = match rule {
            SchemaRule::Index(mut r) => {
                r.name = "a much longer rule name spanning several blocks".into();
                SchemaRule::Index(r)
            }
            _ => unreachable!(),
        };
        let second = store.write_rule(&renamed)?;
        assert_eq!(store.load_rule(renamed.id())?, renamed);
        // the first chain is gone
        let old = first.payload_block.expect("first write had a payload");
        assert_ne!(Some(old), second.payload_block);
        assert!(store.payloads.read(old).is_err());
        Ok(())
    }

    #[test]
    fn load_all_returns_every_live_rule() -> Result<()> {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path())?;
        let a = rule_named(&store, "a")?;
        let b = rule_named(&store, "b")?;
        store.write_rule(&a)?;
        store.write_rule(&b)?;
        let mut loaded = store.load_all()?;
        loaded.sort_by_key(|r| r.id().0);
        assert_eq!(loaded, vec![a, b]);
        Ok(())
    }

    #[test]
    fn missing_rule_is_not_found() -> Result<()> {
        let dir = tempdir().unwrap();
        let store = open_store(dir.path())?;
        assert!(matches!(
            store.load_rule(RecordId(12)),
            Err(TesseraError::NotFound)
        ));
        Ok(())
    }
}
