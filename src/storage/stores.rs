//! The full store set of one engine instance.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::primitives::ids::{FreeListIds, IdAllocator, IdKind};
use crate::primitives::pager::PageFileOptions;
use crate::schema::cache::SchemaCache;
use crate::schema::descriptor::TokenNameLookup;
use crate::storage::dynamic::DynamicStoreOptions;
use crate::storage::fixed::RecordStore;
use crate::storage::meta::MetaStore;
use crate::storage::record::{NodeRecordFormat, PropertyRecordFormat};
use crate::storage::schema_store::SchemaStore;
use crate::storage::token::TokenStore;
use crate::types::{LabelId, PropId, RelTypeId, Result};

mod tags {
    pub const LABEL_TOKEN: u8 = 1;
    pub const LABEL_NAME: u8 = 2;
    pub const PROP_KEY_TOKEN: u8 = 3;
    pub const PROP_KEY_NAME: u8 = 4;
    pub const REL_TYPE_TOKEN: u8 = 5;
    pub const REL_TYPE_NAME: u8 = 6;
    pub const SCHEMA: u8 = 7;
    pub const SCHEMA_PAYLOAD: u8 = 8;
    pub const NODE: u8 = 9;
    pub const PROPERTY: u8 = 10;
}

/// Configuration shared by every store file of one instance.
#[derive(Clone, Debug)]
pub struct StoreOptions {
    /// Page size for every store file.
    pub page_size: u32,
    /// Pages cached per store file.
    pub cache_pages: usize,
    /// Block size of the token name stores.
    pub name_block_size: u32,
    /// Block size of the schema payload store.
    pub schema_block_size: u32,
    /// Chain traversal bound for both dynamic stores.
    pub max_chain_hops: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: 8192,
            cache_pages: 128,
            name_block_size: 128,
            schema_block_size: 256,
            max_chain_hops: 4096,
        }
    }
}

/// All stores of one engine instance, opened from one directory.
///
/// The schema cache is scoped to this instance: warmed on open, cleared on
/// drop, never process-global, so separate instances cannot cross-contaminate.
pub struct Stores {
    labels: TokenStore<LabelId>,
    property_keys: TokenStore<PropId>,
    relationship_types: TokenStore<RelTypeId>,
    nodes: RecordStore<NodeRecordFormat>,
    properties: RecordStore<PropertyRecordFormat>,
    schema: SchemaStore,
    meta: MetaStore,
    schema_cache: SchemaCache,
    ids: Arc<dyn IdAllocator>,
}

impl Stores {
    /// Opens every store file under `dir`, rebuilding allocator state and
    /// warming the token and schema caches.
    pub fn open(dir: impl AsRef<Path>, options: &StoreOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let ids: Arc<dyn IdAllocator> = Arc::new(FreeListIds::new());
        let page = PageFileOptions {
            page_size: options.page_size,
            cache_pages: options.cache_pages,
        };
        let names = DynamicStoreOptions {
            block_size: options.name_block_size,
            max_chain_hops: options.max_chain_hops,
        };
        let payloads = DynamicStoreOptions {
            block_size: options.schema_block_size,
            max_chain_hops: options.max_chain_hops,
        };

        let labels = TokenStore::open(
            dir.join("labels.store"),
            dir.join("labels.names"),
            &page,
            &names,
            tags::LABEL_TOKEN,
            tags::LABEL_NAME,
            Arc::clone(&ids),
            IdKind::LabelToken,
            IdKind::LabelTokenName,
        )?;
        let property_keys = TokenStore::open(
            dir.join("propkeys.store"),
            dir.join("propkeys.names"),
            &page,
            &names,
            tags::PROP_KEY_TOKEN,
            tags::PROP_KEY_NAME,
            Arc::clone(&ids),
            IdKind::PropertyKeyToken,
            IdKind::PropertyKeyTokenName,
        )?;
        let relationship_types = TokenStore::open(
            dir.join("reltypes.store"),
            dir.join("reltypes.names"),
            &page,
            &names,
            tags::REL_TYPE_TOKEN,
            tags::REL_TYPE_NAME,
            Arc::clone(&ids),
            IdKind::RelTypeToken,
            IdKind::RelTypeTokenName,
        )?;
        let nodes = RecordStore::open(
            dir.join("nodes.store"),
            &page,
            tags::NODE,
            Arc::clone(&ids),
            IdKind::NodeRecord,
        )?;
        let properties = RecordStore::open(
            dir.join("props.store"),
            &page,
            tags::PROPERTY,
            Arc::clone(&ids),
            IdKind::PropertyRecord,
        )?;
        let schema = SchemaStore::open(
            dir.join("schema.store"),
            dir.join("schema.payload"),
            &page,
            &payloads,
            tags::SCHEMA,
            tags::SCHEMA_PAYLOAD,
            Arc::clone(&ids),
        )?;

        let schema_cache = SchemaCache::new();
        let rules = schema.load_all()?;
        debug!(rules = rules.len(), "stores.open.schema_cache_warm");
        schema_cache.load(rules);

        Ok(Self {
            labels,
            property_keys,
            relationship_types,
            nodes,
            properties,
            schema,
            meta: MetaStore::new(),
            schema_cache,
            ids,
        })
    }

    /// Label token store.
    pub fn labels(&self) -> &TokenStore<LabelId> {
        &self.labels
    }

    /// Property key token store.
    pub fn property_keys(&self) -> &TokenStore<PropId> {
        &self.property_keys
    }

    /// Relationship type token store.
    pub fn relationship_types(&self) -> &TokenStore<RelTypeId> {
        &self.relationship_types
    }

    /// Node record store.
    pub fn nodes(&self) -> &RecordStore<NodeRecordFormat> {
        &self.nodes
    }

    /// Property record store.
    pub fn properties(&self) -> &RecordStore<PropertyRecordFormat> {
        &self.properties
    }

    /// Schema store.
    pub fn schema(&self) -> &SchemaStore {
        &self.schema
    }

    /// Store-wide metadata tracker.
    pub fn meta(&self) -> &MetaStore {
        &self.meta
    }

    /// This instance's schema rule cache.
    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    /// The shared id allocator.
    pub fn ids(&self) -> &Arc<dyn IdAllocator> {
        &self.ids
    }

    /// Flushes every store file.
    pub fn sync(&self) -> Result<()> {
        self.labels.sync()?;
        self.property_keys.sync()?;
        self.relationship_types.sync()?;
        self.nodes.sync()?;
        self.properties.sync()?;
        self.schema.sync()
    }
}

impl Drop for Stores {
    fn drop(&mut self) {
        self.schema_cache.clear();
    }
}

impl TokenNameLookup for Stores {
    fn label_name(&self, id: LabelId) -> String {
        match self.labels.name(id) {
            Ok(Some(name)) => name,
            _ => format!("label[{}]", id.0),
        }
    }

    fn relationship_type_name(&self, id: RelTypeId) -> String {
        match self.relationship_types.name(id) {
            Ok(Some(name)) => name,
            _ => format!("type[{}]", id.0),
        }
    }

    fn property_key_name(&self, id: PropId) -> String {
        match self.property_keys.name(id) {
            Ok(Some(name)) => name,
            _ => format!("property[{}]", id.0),
        }
    }
}
