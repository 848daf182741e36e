#![forbid(unsafe_code)]

//! Identifier allocation.
//!
//! Stores never invent record ids themselves; they ask an [`IdAllocator`]
//! keyed by [`IdKind`]. The default [`FreeListIds`] implementation reuses
//! freed ids before extending the high water mark and enforces a per-kind
//! capacity bound.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::types::{Result, TesseraError};

/// The identifier spaces managed by the allocator.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum IdKind {
    /// Node records.
    NodeRecord,
    /// Property records.
    PropertyRecord,
    /// Label token records.
    LabelToken,
    /// Property key token records.
    PropertyKeyToken,
    /// Relationship type token records.
    RelTypeToken,
    /// Schema rule records.
    SchemaRecord,
    /// Dynamic blocks holding label names.
    LabelTokenName,
    /// Dynamic blocks holding property key names.
    PropertyKeyTokenName,
    /// Dynamic blocks holding relationship type names.
    RelTypeTokenName,
    /// Dynamic blocks holding serialized schema rules.
    SchemaBlock,
}

impl IdKind {
    /// First id ever handed out for this kind. Block kinds start at 1 so
    /// that block id 0 stays available as the "no block" sentinel.
    pub fn first_id(self) -> u64 {
        match self {
            IdKind::LabelTokenName
            | IdKind::PropertyKeyTokenName
            | IdKind::RelTypeTokenName
            | IdKind::SchemaBlock => 1,
            _ => 0,
        }
    }

    /// Highest id this kind may ever hand out.
    pub fn max_id(self) -> u64 {
        match self {
            IdKind::LabelToken | IdKind::PropertyKeyToken | IdKind::RelTypeToken => {
                u32::MAX as u64 - 1
            }
            _ => u64::MAX >> 8,
        }
    }

    fn name(self) -> &'static str {
        match self {
            IdKind::NodeRecord => "node records",
            IdKind::PropertyRecord => "property records",
            IdKind::LabelToken => "label tokens",
            IdKind::PropertyKeyToken => "property key tokens",
            IdKind::RelTypeToken => "relationship type tokens",
            IdKind::SchemaRecord => "schema records",
            IdKind::LabelTokenName => "label name blocks",
            IdKind::PropertyKeyTokenName => "property key name blocks",
            IdKind::RelTypeTokenName => "relationship type name blocks",
            IdKind::SchemaBlock => "schema blocks",
        }
    }
}

/// Contract for the identifier allocator collaborator.
pub trait IdAllocator: Send + Sync {
    /// Hands out an unused id, preferring previously freed ones.
    fn allocate(&self, kind: IdKind) -> Result<u64>;
    /// Returns an id to the free pool.
    fn free(&self, kind: IdKind, id: u64) -> Result<()>;
    /// Highest id ever observed in use for this kind.
    fn highest_id_in_use(&self, kind: IdKind) -> u64;
    /// Informs the allocator that `id` is in use, bumping the high water
    /// mark past it. Used when replay writes records it never allocated.
    fn note_highest_id(&self, kind: IdKind, id: u64);
}

#[derive(Default)]
struct IdSpace {
    next: u64,
    free: Vec<u64>,
}

/// In-memory free-list allocator, rebuilt from the stores on open.
pub struct FreeListIds {
    spaces: Mutex<FxHashMap<IdKind, IdSpace>>,
}

impl FreeListIds {
    /// Creates an empty allocator; every kind starts at its first id.
    pub fn new() -> Self {
        Self {
            spaces: Mutex::new(FxHashMap::default()),
        }
    }
}

impl Default for FreeListIds {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for FreeListIds {
    fn allocate(&self, kind: IdKind) -> Result<u64> {
        let mut spaces = self.spaces.lock();
        let space = spaces.entry(kind).or_default();
        if let Some(id) = space.free.pop() {
            trace!(kind = kind.name(), id, "ids.allocate.reused");
            return Ok(id);
        }
        let id = space.next.max(kind.first_id());
        if id > kind.max_id() {
            return Err(TesseraError::IdExhausted(kind.name()));
        }
        space.next = id + 1;
        trace!(kind = kind.name(), id, "ids.allocate.fresh");
        Ok(id)
    }

    fn free(&self, kind: IdKind, id: u64) -> Result<()> {
        let mut spaces = self.spaces.lock();
        let space = spaces.entry(kind).or_default();
        if id >= space.next.max(kind.first_id()) {
            return Err(TesseraError::Invalid("freeing an id that was never allocated"));
        }
        space.free.push(id);
        trace!(kind = kind.name(), id, "ids.free");
        Ok(())
    }

    fn highest_id_in_use(&self, kind: IdKind) -> u64 {
        let spaces = self.spaces.lock();
        spaces
            .get(&kind)
            .map(|space| space.next.max(kind.first_id()))
            .unwrap_or_else(|| kind.first_id())
    }

    fn note_highest_id(&self, kind: IdKind, id: u64) {
        let mut spaces = self.spaces.lock();
        let space = spaces.entry(kind).or_default();
        if id + 1 > space.next {
            space.next = id + 1;
        }
    }
}
