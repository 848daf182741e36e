#![forbid(unsafe_code)]

//! Fixed-page, slot-addressed byte storage over a [`FileIo`] backend.
//!
//! Every store file starts with one header page carrying magic, format
//! version, the store kind tag and the slot width; data pages follow. A slot
//! never straddles a page boundary, so slot reads and writes are single-page
//! operations. All access is serialized under one lock, which is what gives
//! the record stores their atomic single-record read/write guarantee.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{Result, TesseraError};

const FILE_MAGIC: [u8; 8] = *b"TESSERA\0";
const FILE_FORMAT_VERSION: u16 = 1;
const HEADER_LEN: usize = 32;

/// Configuration for opening a [`PageFile`].
#[derive(Clone, Debug)]
pub struct PageFileOptions {
    /// Size of each page in bytes.
    pub page_size: u32,
    /// Number of pages kept in the in-memory cache.
    pub cache_pages: usize,
}

impl Default for PageFileOptions {
    fn default() -> Self {
        Self {
            page_size: 8192,
            cache_pages: 128,
        }
    }
}

struct FileHeader {
    kind: u8,
    page_size: u32,
    slot_size: u32,
}

impl FileHeader {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..8].copy_from_slice(&FILE_MAGIC);
        buf[8..10].copy_from_slice(&FILE_FORMAT_VERSION.to_be_bytes());
        buf[10] = self.kind;
        buf[11] = 0;
        buf[12..16].copy_from_slice(&self.page_size.to_be_bytes());
        buf[16..20].copy_from_slice(&self.slot_size.to_be_bytes());
        let mut crc_buf = buf;
        crc_buf[28..32].fill(0);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&crc_buf);
        buf[28..32].copy_from_slice(&hasher.finalize().to_be_bytes());
        buf
    }

    fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < HEADER_LEN {
            return Err(TesseraError::Corruption("store header truncated"));
        }
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&src[..HEADER_LEN]);
        if header[0..8] != FILE_MAGIC {
            return Err(TesseraError::Corruption("store magic mismatch"));
        }
        let version = u16::from_be_bytes([header[8], header[9]]);
        if version != FILE_FORMAT_VERSION {
            return Err(TesseraError::Corruption("store format version mismatch"));
        }
        if header[11] != 0 || header[20..28] != [0; 8] {
            return Err(TesseraError::Corruption("store header reserved bytes non-zero"));
        }
        let stored_crc = u32::from_be_bytes([header[28], header[29], header[30], header[31]]);
        header[28..32].fill(0);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        if hasher.finalize() != stored_crc {
            return Err(TesseraError::Corruption("store header crc mismatch"));
        }
        let page_size = u32::from_be_bytes([src[12], src[13], src[14], src[15]]);
        let slot_size = u32::from_be_bytes([src[16], src[17], src[18], src[19]]);
        Ok(Self {
            kind: src[10],
            page_size,
            slot_size,
        })
    }
}

struct PageState {
    cache: LruCache<u64, Box<[u8]>>,
    len: u64,
}

/// Paged store file addressed by fixed-width slot index.
pub struct PageFile {
    io: Arc<dyn FileIo>,
    page_size: usize,
    slot_size: usize,
    slots_per_page: u64,
    state: Mutex<PageState>,
}

impl PageFile {
    /// Opens or creates a store file, validating the header against the
    /// expected kind tag and slot width.
    pub fn open(
        path: impl AsRef<Path>,
        options: &PageFileOptions,
        kind: u8,
        slot_size: u32,
    ) -> Result<Self> {
        let io: Arc<dyn FileIo> = Arc::new(StdFileIo::open_rw(path)?);
        Self::open_with_io(io, options, kind, slot_size)
    }

    /// Opens a store file over an existing I/O backend.
    pub fn open_with_io(
        io: Arc<dyn FileIo>,
        options: &PageFileOptions,
        kind: u8,
        slot_size: u32,
    ) -> Result<Self> {
        let page_size = options.page_size as usize;
        if page_size < HEADER_LEN {
            return Err(TesseraError::Invalid("page size smaller than store header"));
        }
        if slot_size == 0 || slot_size as usize > page_size {
            return Err(TesseraError::Invalid("slot size must fit inside one page"));
        }
        let len = io.len()?;
        if len < options.page_size as u64 {
            let header = FileHeader {
                kind,
                page_size: options.page_size,
                slot_size,
            };
            let mut page = vec![0u8; page_size];
            page[..HEADER_LEN].copy_from_slice(&header.encode());
            io.write_at(0, &page)?;
        } else {
            let mut buf = vec![0u8; HEADER_LEN];
            io.read_at(0, &mut buf)?;
            let header = FileHeader::decode(&buf)?;
            if header.kind != kind {
                return Err(TesseraError::Corruption("store kind mismatch"));
            }
            if header.page_size != options.page_size {
                return Err(TesseraError::Corruption("store page size mismatch"));
            }
            if header.slot_size != slot_size {
                return Err(TesseraError::Corruption("store slot size mismatch"));
            }
        }
        let cache_pages = NonZeroUsize::new(options.cache_pages.max(1))
            .ok_or(TesseraError::Invalid("cache must hold at least one page"))?;
        let len = io.len()?;
        Ok(Self {
            io,
            page_size,
            slot_size: slot_size as usize,
            slots_per_page: (page_size / slot_size as usize) as u64,
            state: Mutex::new(PageState {
                cache: LruCache::new(cache_pages),
                len,
            }),
        })
    }

    /// Width of one slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Index of the first slot at or beyond the end of the file; slots below
    /// this bound have backing pages, slots at or above it were never written.
    pub fn slot_bound(&self) -> u64 {
        let len = self.state.lock().len;
        let data_pages = (len / self.page_size as u64).saturating_sub(1);
        data_pages * self.slots_per_page
    }

    /// Reads one slot into `dst`. Returns `Ok(false)` when the slot lies
    /// beyond the end of the file.
    pub fn read_slot(&self, slot: u64, dst: &mut [u8]) -> Result<bool> {
        if dst.len() != self.slot_size {
            return Err(TesseraError::Invalid("slot buffer width mismatch"));
        }
        let (page_no, offset) = self.locate(slot);
        let mut state = self.state.lock();
        if (page_no + 1) * self.page_size as u64 > state.len {
            return Ok(false);
        }
        let page = self.load_page(&mut state, page_no)?;
        dst.copy_from_slice(&page[offset..offset + self.slot_size]);
        Ok(true)
    }

    /// Writes one slot, extending the file with zeroed pages as needed.
    pub fn write_slot(&self, slot: u64, src: &[u8]) -> Result<()> {
        if src.len() != self.slot_size {
            return Err(TesseraError::Invalid("slot buffer width mismatch"));
        }
        let (page_no, offset) = self.locate(slot);
        let mut state = self.state.lock();
        let mut page = if (page_no + 1) * self.page_size as u64 > state.len {
            vec![0u8; self.page_size].into_boxed_slice()
        } else {
            self.load_page(&mut state, page_no)?
        };
        page[offset..offset + self.slot_size].copy_from_slice(src);
        let page_off = page_no * self.page_size as u64;
        self.io.write_at(page_off, &page)?;
        state.len = state.len.max(page_off + self.page_size as u64);
        state.cache.put(page_no, page);
        trace!(slot, page = page_no, "pagefile.write_slot");
        Ok(())
    }

    /// Flushes file contents and metadata to disk.
    pub fn sync(&self) -> Result<()> {
        self.io.sync_all()
    }

    fn locate(&self, slot: u64) -> (u64, usize) {
        let page_no = 1 + slot / self.slots_per_page;
        let offset = (slot % self.slots_per_page) as usize * self.slot_size;
        (page_no, offset)
    }

    fn load_page(&self, state: &mut PageState, page_no: u64) -> Result<Box<[u8]>> {
        if let Some(page) = state.cache.get(&page_no) {
            return Ok(page.clone());
        }
        let mut page = vec![0u8; self.page_size].into_boxed_slice();
        self.io.read_at(page_no * self.page_size as u64, &mut page)?;
        state.cache.put(page_no, page.clone());
        Ok(page)
    }
}
