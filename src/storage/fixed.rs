//! Generic fixed-slot record store.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::primitives::ids::{IdAllocator, IdKind};
use crate::primitives::pager::{PageFile, PageFileOptions};
use crate::storage::record::{slot_in_use, RecordFormat};
use crate::types::{RecordId, Result, TesseraError};

/// Paged store of fixed-size records addressed by integer id.
///
/// `get` and `put` are O(1) slot operations; overflow content never extends a
/// record and must go through a dynamic store referenced by pointer. Id
/// allocation is delegated to the shared [`IdAllocator`].
pub struct RecordStore<F: RecordFormat> {
    file: PageFile,
    ids: Arc<dyn IdAllocator>,
    id_kind: IdKind,
    _format: PhantomData<F>,
}

impl<F: RecordFormat> RecordStore<F> {
    /// Opens the store file and rebuilds the id allocator's view of it.
    pub fn open(
        path: impl AsRef<Path>,
        options: &PageFileOptions,
        kind_tag: u8,
        ids: Arc<dyn IdAllocator>,
        id_kind: IdKind,
    ) -> Result<Self> {
        let file = PageFile::open(path, options, kind_tag, F::SLOT_SIZE as u32)?;
        let store = Self {
            file,
            ids,
            id_kind,
            _format: PhantomData,
        };
        store.rebuild_ids()?;
        Ok(store)
    }

    /// Reads the record at `id`.
    ///
    /// An id beyond the high water mark or a slot not marked in use is
    /// [`TesseraError::NotFound`]; a slot that fails structural validation
    /// propagates as corruption.
    pub fn get(&self, id: RecordId) -> Result<F::Record> {
        let mut buf = vec![0u8; F::SLOT_SIZE];
        if !self.file.read_slot(id.0, &mut buf)? {
            return Err(TesseraError::NotFound);
        }
        if !slot_in_use(&buf) {
            return Err(TesseraError::NotFound);
        }
        F::decode(id, &buf)
    }

    /// Returns whether the slot at `id` is currently marked in use.
    pub fn in_use(&self, id: RecordId) -> Result<bool> {
        let mut buf = vec![0u8; F::SLOT_SIZE];
        if !self.file.read_slot(id.0, &mut buf)? {
            return Ok(false);
        }
        Ok(slot_in_use(&buf))
    }

    /// Writes the record into its slot. Writing the image a slot already
    /// holds is a no-op in effect, which is what replay relies on.
    pub fn put(&self, record: &F::Record) -> Result<()> {
        let id = F::id_of(record);
        let mut buf = vec![0u8; F::SLOT_SIZE];
        F::encode(record, &mut buf)?;
        self.file.write_slot(id.0, &buf)?;
        if F::in_use(record) {
            self.ids.note_highest_id(self.id_kind, id.0);
        }
        trace!(id = id.0, in_use = F::in_use(record), "store.put");
        Ok(())
    }

    /// Allocates a fresh record id from the allocator.
    pub fn allocate(&self) -> Result<RecordId> {
        Ok(RecordId(self.ids.allocate(self.id_kind)?))
    }

    /// Returns `id` to the allocator. The slot must already be marked not in
    /// use; freeing a live record is refused.
    pub fn free(&self, id: RecordId) -> Result<()> {
        if self.in_use(id)? {
            return Err(TesseraError::Invalid("record still in use"));
        }
        self.ids.free(self.id_kind, id.0)
    }

    /// Highest id the allocator considers in use for this store.
    pub fn high_id(&self) -> u64 {
        self.ids.highest_id_in_use(self.id_kind)
    }

    /// Visits every in-use record in id order. Corruption propagates;
    /// not-in-use slots are skipped.
    pub fn scan(&self, mut visit: impl FnMut(F::Record) -> Result<()>) -> Result<()> {
        let bound = self.file.slot_bound();
        let mut buf = vec![0u8; F::SLOT_SIZE];
        for raw in 0..bound {
            if !self.file.read_slot(raw, &mut buf)? {
                break;
            }
            if !slot_in_use(&buf) {
                continue;
            }
            visit(F::decode(RecordId(raw), &buf)?)?;
        }
        Ok(())
    }

    /// Flushes the backing file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    fn rebuild_ids(&self) -> Result<()> {
        let bound = self.file.slot_bound();
        let mut buf = vec![0u8; F::SLOT_SIZE];
        let mut high: Option<u64> = None;
        let mut gaps = Vec::new();
        for raw in 0..bound {
            if !self.file.read_slot(raw, &mut buf)? {
                break;
            }
            if slot_in_use(&buf) {
                high = Some(raw);
            } else {
                gaps.push(raw);
            }
        }
        if let Some(high) = high {
            self.ids.note_highest_id(self.id_kind, high);
            for gap in gaps.into_iter().filter(|&g| g < high) {
                self.ids.free(self.id_kind, gap)?;
            }
        }
        Ok(())
    }
}
