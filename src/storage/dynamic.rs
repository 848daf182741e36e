//! Dynamic store: variable-length payloads as chains of fixed-size blocks.

use std::path::Path;
use std::sync::Arc;

use tracing::trace;

use crate::primitives::ids::{IdAllocator, IdKind};
use crate::primitives::pager::{PageFile, PageFileOptions};
use crate::storage::record::DynamicRecord;
use crate::types::{BlockId, Result, TesseraError};

const BLOCK_HEADER_LEN: usize = 16;
const BLOCK_FLAG_IN_USE: u8 = 0x01;
const BLOCK_FLAG_LAST: u8 = 0x02;

/// Configuration for opening a [`DynamicStore`].
#[derive(Clone, Debug)]
pub struct DynamicStoreOptions {
    /// Total block size in bytes, header included.
    pub block_size: u32,
    /// Upper bound on chain traversal, guarding against cyclic corruption.
    pub max_chain_hops: u32,
}

impl Default for DynamicStoreOptions {
    fn default() -> Self {
        Self {
            block_size: 128,
            max_chain_hops: 4096,
        }
    }
}

/// Store of ordered byte sequences split across fixed-size blocks.
///
/// Chains are append-consistent: every non-last block is filled to capacity.
/// Traversal is bounded by `max_chain_hops`; exceeding the bound is a
/// [`TesseraError::BrokenChain`], never an unbounded loop.
pub struct DynamicStore {
    file: PageFile,
    ids: Arc<dyn IdAllocator>,
    id_kind: IdKind,
    data_capacity: usize,
    max_hops: u32,
}

impl DynamicStore {
    /// Opens the store file and rebuilds the id allocator's view of it.
    pub fn open(
        path: impl AsRef<Path>,
        page_options: &PageFileOptions,
        options: &DynamicStoreOptions,
        kind_tag: u8,
        ids: Arc<dyn IdAllocator>,
        id_kind: IdKind,
    ) -> Result<Self> {
        if (options.block_size as usize) <= BLOCK_HEADER_LEN {
            return Err(TesseraError::Invalid("block size too small for payload"));
        }
        let file = PageFile::open(path, page_options, kind_tag, options.block_size)?;
        let store = Self {
            file,
            ids,
            id_kind,
            data_capacity: options.block_size as usize - BLOCK_HEADER_LEN,
            max_hops: options.max_chain_hops,
        };
        store.rebuild_ids()?;
        Ok(store)
    }

    /// Payload bytes one block can hold.
    pub fn data_capacity(&self) -> usize {
        self.data_capacity
    }

    /// Allocates block ids for `bytes` and returns the chain's block images
    /// without writing them. This is how transactions stage name and payload
    /// chains that later ride inside log commands.
    pub fn plan_chain(&self, bytes: &[u8]) -> Result<Vec<DynamicRecord>> {
        let needed = ((bytes.len() + self.data_capacity - 1) / self.data_capacity).max(1);
        if needed > self.max_hops as usize {
            return Err(TesseraError::Invalid("payload exceeds maximum chain length"));
        }
        let mut block_ids = Vec::with_capacity(needed);
        for _ in 0..needed {
            block_ids.push(BlockId(self.ids.allocate(self.id_kind)?));
        }
        let mut records = Vec::with_capacity(needed);
        for (i, &id) in block_ids.iter().enumerate() {
            let last = i + 1 == needed;
            let start = i * self.data_capacity;
            let end = if last {
                bytes.len()
            } else {
                start + self.data_capacity
            };
            records.push(DynamicRecord {
                id,
                in_use: true,
                last,
                next: if last { BlockId(0) } else { block_ids[i + 1] },
                payload: bytes[start..end].to_vec(),
            });
        }
        Ok(records)
    }

    /// Writes `bytes` as a fresh chain, returning the first block id.
    pub fn write(&self, bytes: &[u8]) -> Result<BlockId> {
        let records = self.plan_chain(bytes)?;
        for record in &records {
            self.put_record(record)?;
        }
        trace!(blocks = records.len(), len = bytes.len(), "dynamic.write");
        Ok(records[0].id)
    }

    /// Writes a single block image into its slot. Used both by [`write`] and
    /// by command replay, which carries block images inside the command.
    ///
    /// [`write`]: DynamicStore::write
    pub fn put_record(&self, record: &DynamicRecord) -> Result<()> {
        record.check()?;
        if record.payload.len() > self.data_capacity {
            return Err(TesseraError::Invalid("payload exceeds block capacity"));
        }
        if record.in_use && !record.last && record.payload.len() != self.data_capacity {
            return Err(TesseraError::Invalid("non-last block must be filled to capacity"));
        }
        let mut buf = vec![0u8; BLOCK_HEADER_LEN + self.data_capacity];
        if record.in_use {
            let mut flags = BLOCK_FLAG_IN_USE;
            if record.last {
                flags |= BLOCK_FLAG_LAST;
            }
            buf[0] = flags;
            buf[2..4].copy_from_slice(&(record.payload.len() as u16).to_be_bytes());
            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&record.payload);
            buf[4..8].copy_from_slice(&hasher.finalize().to_be_bytes());
            buf[8..16].copy_from_slice(&record.next.0.to_be_bytes());
            buf[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + record.payload.len()]
                .copy_from_slice(&record.payload);
            self.ids.note_highest_id(self.id_kind, record.id.0);
        }
        self.file.write_slot(record.id.0, &buf)
    }

    /// Reads one block image; [`TesseraError::NotFound`] for slots beyond the
    /// store or not in use.
    pub fn get_record(&self, id: BlockId) -> Result<DynamicRecord> {
        match self.read_block(id)? {
            Some(record) => Ok(record),
            None => Err(TesseraError::NotFound),
        }
    }

    /// Reads a whole chain starting at `first`, concatenating payloads.
    pub fn read(&self, first: BlockId) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut current = first;
        for hop in 0..self.max_hops {
            let record = match self.read_block(current)? {
                Some(record) => record,
                None if hop == 0 => return Err(TesseraError::NotFound),
                None => return Err(TesseraError::BrokenChain("chain block not in use")),
            };
            if !record.last && record.payload.len() != self.data_capacity {
                return Err(TesseraError::Corruption("non-last block under-filled"));
            }
            out.extend_from_slice(&record.payload);
            if record.last {
                trace!(first = first.0, hops = hop + 1, len = out.len(), "dynamic.read");
                return Ok(out);
            }
            current = record.next;
        }
        Err(TesseraError::BrokenChain("chain exceeds hop bound"))
    }

    /// Walks the chain starting at `first`, clearing every block and
    /// returning its id to the allocator.
    pub fn free(&self, first: BlockId) -> Result<()> {
        let mut current = first;
        for hop in 0..self.max_hops {
            let record = match self.read_block(current)? {
                Some(record) => record,
                None if hop == 0 => return Err(TesseraError::NotFound),
                None => return Err(TesseraError::BrokenChain("free chain block not in use")),
            };
            let cleared = vec![0u8; BLOCK_HEADER_LEN + self.data_capacity];
            self.file.write_slot(current.0, &cleared)?;
            self.ids.free(self.id_kind, current.0)?;
            if record.last {
                trace!(first = first.0, hops = hop + 1, "dynamic.free");
                return Ok(());
            }
            current = record.next;
        }
        Err(TesseraError::BrokenChain("free chain exceeds hop bound"))
    }

    /// Flushes the backing file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync()
    }

    fn read_block(&self, id: BlockId) -> Result<Option<DynamicRecord>> {
        if id.0 == 0 {
            return Err(TesseraError::Corruption("chain points at the zero sentinel"));
        }
        let mut buf = vec![0u8; BLOCK_HEADER_LEN + self.data_capacity];
        if !self.file.read_slot(id.0, &mut buf)? {
            return Ok(None);
        }
        let flags = buf[0];
        if flags & BLOCK_FLAG_IN_USE == 0 {
            return Ok(None);
        }
        if flags & !(BLOCK_FLAG_IN_USE | BLOCK_FLAG_LAST) != 0 {
            return Err(TesseraError::Corruption("unknown dynamic block flags"));
        }
        if buf[1] != 0 {
            return Err(TesseraError::Corruption("dynamic block reserved byte non-zero"));
        }
        let used = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if used > self.data_capacity {
            return Err(TesseraError::Corruption("dynamic block used bytes exceed capacity"));
        }
        let stored_crc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let next = u64::from_be_bytes(buf[8..16].try_into().expect("slice has 8 bytes"));
        let payload = buf[BLOCK_HEADER_LEN..BLOCK_HEADER_LEN + used].to_vec();
        if buf[BLOCK_HEADER_LEN + used..].iter().any(|&b| b != 0) {
            return Err(TesseraError::Corruption("dynamic block tail not zeroed"));
        }
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != stored_crc {
            return Err(TesseraError::Corruption("dynamic block payload crc mismatch"));
        }
        let last = flags & BLOCK_FLAG_LAST != 0;
        if last && next != 0 {
            return Err(TesseraError::Corruption("last dynamic block has next pointer"));
        }
        if !last && next == 0 {
            return Err(TesseraError::Corruption("non-last dynamic block lacks next pointer"));
        }
        Ok(Some(DynamicRecord {
            id,
            in_use: true,
            last,
            next: BlockId(next),
            payload,
        }))
    }

    fn rebuild_ids(&self) -> Result<()> {
        let bound = self.file.slot_bound();
        let mut buf = vec![0u8; BLOCK_HEADER_LEN + self.data_capacity];
        let mut high: Option<u64> = None;
        let mut gaps = Vec::new();
        for raw in 1..bound {
            if !self.file.read_slot(raw, &mut buf)? {
                break;
            }
            if buf[0] & BLOCK_FLAG_IN_USE != 0 {
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
