//! Token store: small integer ids for human-readable names.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::primitives::ids::{IdAllocator, IdKind};
use crate::primitives::pager::PageFileOptions;
use crate::storage::dynamic::{DynamicStore, DynamicStoreOptions};
use crate::storage::fixed::RecordStore;
use crate::storage::record::{TokenRecord, TokenRecordFormat};
use crate::tx::command::TokenCommand;
use crate::types::{RecordId, Result, TesseraError, TokenKey};

#[derive(Default)]
struct TokenCache {
    by_id: FxHashMap<u32, Option<String>>,
    by_name: FxHashMap<String, u32>,
}

/// Fixed store of token records layered over a dynamic name store, with an
/// eager two-way in-memory cache.
///
/// The cache is kept coherent because every mutation flows through this
/// component, either via the direct `create*` methods or via the applier
/// path ([`TokenStore::apply_command`]); no external writer may bypass it.
/// Name uniqueness is the caller's invariant, not the store's.
pub struct TokenStore<K: TokenKey> {
    records: RecordStore<TokenRecordFormat>,
    names: DynamicStore,
    cache: RwLock<TokenCache>,
    _key: PhantomData<K>,
}

impl<K: TokenKey> TokenStore<K> {
    /// Opens the record and name files and warms the cache from them.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        record_path: impl AsRef<Path>,
        name_path: impl AsRef<Path>,
        page_options: &PageFileOptions,
        name_options: &DynamicStoreOptions,
        record_tag: u8,
        name_tag: u8,
        ids: Arc<dyn IdAllocator>,
        record_kind: IdKind,
        name_kind: IdKind,
    ) -> Result<Self> {
        let records = RecordStore::open(
            record_path,
            page_options,
            record_tag,
            Arc::clone(&ids),
            record_kind,
        )?;
        let names = DynamicStore::open(name_path, page_options, name_options, name_tag, ids, name_kind)?;
        let store = Self {
            records,
            names,
            cache: RwLock::new(TokenCache::default()),
            _key: PhantomData,
        };
        store.warm_cache()?;
        Ok(store)
    }

    /// Creates a named token: allocates a record, writes the name chain,
    /// marks the record in use.
    pub fn create(&self, name: &str) -> Result<K> {
        let id = self.allocate_token_id()?;
        let name_block = self.names.write(name.as_bytes())?;
        let record = TokenRecord {
            id: RecordId(id as u64),
            in_use: true,
            internal: false,
            name_block: Some(name_block),
        };
        self.records.put(&record)?;
        let mut cache = self.cache.write();
        cache.by_id.insert(id, Some(name.to_string()));
        cache.by_name.insert(name.to_string(), id);
        trace!(id, name, "token.create");
        Ok(K::from_raw(id))
    }

    /// Creates an internal placeholder token carrying no name.
    pub fn create_internal(&self) -> Result<K> {
        let id = self.allocate_token_id()?;
        let record = TokenRecord {
            id: RecordId(id as u64),
            in_use: true,
            internal: true,
            name_block: None,
        };
        self.records.put(&record)?;
        self.cache.write().by_id.insert(id, None);
        trace!(id, "token.create_internal");
        Ok(K::from_raw(id))
    }

    /// Resolves a token id to its name.
    ///
    /// `Ok(None)` is the sentinel for internal tokens that carry no name;
    /// a token that does not exist is [`TesseraError::NotFound`].
    pub fn name(&self, id: K) -> Result<Option<String>> {
        if let Some(cached) = self.cache.read().by_id.get(&id.raw()) {
            trace!(id = id.raw(), "token.name.hit");
            return Ok(cached.clone());
        }
        let record = self.records.get(RecordId(id.raw() as u64))?;
        let name = self.read_name(&record)?;
        let mut cache = self.cache.write();
        cache.by_id.insert(id.raw(), name.clone());
        if let Some(ref name) = name {
            cache.by_name.insert(name.clone(), id.raw());
        }
        trace!(id = id.raw(), "token.name.miss");
        Ok(name)
    }

    /// Cache-assisted reverse lookup; `None` when no token carries `name`.
    pub fn id_by_name(&self, name: &str) -> Option<K> {
        self.cache.read().by_name.get(name).map(|&id| K::from_raw(id))
    }

    /// Applies one decoded token command: writes the carried name block
    /// images, writes the after record, and refreshes the cache.
    pub fn apply_command(&self, command: &TokenCommand) -> Result<()> {
        for block in &command.name_records {
            self.names.put_record(block)?;
        }
        self.records.put(&command.after)?;
        let raw = command.after.id.0 as u32;
        let mut cache = self.cache.write();
        let stale = cache.by_id.get(&raw).and_then(|name| name.clone());
        if let Some(stale) = stale {
            cache.by_name.remove(&stale);
        }
        if command.after.in_use {
            let name = self.read_name(&command.after)?;
            cache.by_id.insert(raw, name.clone());
            if let Some(name) = name {
                cache.by_name.insert(name, raw);
            }
        } else {
            cache.by_id.remove(&raw);
        }
        trace!(id = raw, in_use = command.after.in_use, "token.apply");
        Ok(())
    }

    /// Visits every in-use token record.
    pub fn scan(&self, visit: impl FnMut(TokenRecord) -> Result<()>) -> Result<()> {
        self.records.scan(visit)
    }

    /// Highest token id in use.
    pub fn high_id(&self) -> u64 {
        self.records.high_id()
    }

    /// The companion dynamic store holding names. Transactions use it to
    /// stage name chains for commands.
    pub fn name_store(&self) -> &DynamicStore {
        &self.names
    }

    /// The underlying fixed record store.
    pub fn record_store(&self) -> &RecordStore<TokenRecordFormat> {
        &self.records
    }

    /// Flushes both backing files.
    pub fn sync(&self) -> Result<()> {
        self.records.sync()?;
        self.names.sync()
    }

    fn allocate_token_id(&self) -> Result<u32> {
        let raw = self.records.allocate()?;
        u32::try_from(raw.0).map_err(|_| TesseraError::IdExhausted("token id beyond u32 range"))
    }

    fn read_name(&self, record: &TokenRecord) -> Result<Option<String>> {
        match record.name_block {
            Some(first) => {
                let bytes = self.names.read(first)?;
                let name = String::from_utf8(bytes)
                    .map_err(|_| TesseraError::Corruption("token name not valid UTF-8"))?;
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    fn warm_cache(&self) -> Result<()> {
        let mut by_id = FxHashMap::default();
        let mut by_name = FxHashMap::default();
        self.records.scan(|record| {
            let raw = record.id.0 as u32;
            let name = self.read_name(&record)?;
            if let Some(ref name) = name {
                by_name.insert(name.clone(), raw);
            }
            by_id.insert(raw, name);
            Ok(())
        })?;
        let mut cache = self.cache.write();
        cache.by_id = by_id;
        cache.by_name = by_name;
        Ok(())
    }
}
