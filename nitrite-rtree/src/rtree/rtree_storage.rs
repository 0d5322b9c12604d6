//! Byte-oriented page backends.
//!
//! A [`PageBackend`] stores opaque byte records keyed by page id, plus one
//! header record. It knows nothing about nodes; encoding is done by the
//! cached page store. The only contract is that a page id resolves to the
//! bytes last written under it until the page is freed.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::rtree_constants::{PAGE_RECORD_OVERHEAD, PAGE_SIZE};
use super::rtree_types::{NodeId, SpatialError, SpatialResult};

/// Page ID - pages are addressed by the id of the node they hold
pub type PageId = NodeId;

/// Slow storage behind a cached page store.
pub trait PageBackend {
    /// Reads the header record, `None` if it was never written.
    fn read_header(&mut self) -> SpatialResult<Option<Vec<u8>>>;

    fn write_header(&mut self, bytes: &[u8]) -> SpatialResult<()>;

    /// Reads a page record, `None` if it was never written or was freed.
    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Option<Vec<u8>>>;

    fn write_page(&mut self, page_id: PageId, bytes: &[u8]) -> SpatialResult<()>;

    fn free_page(&mut self, page_id: PageId) -> SpatialResult<()>;

    /// Largest record a single page accepts, if bounded.
    fn max_record_size(&self) -> Option<usize> {
        None
    }

    fn sync(&mut self) -> SpatialResult<()> {
        Ok(())
    }

    fn close(&mut self) -> SpatialResult<()>;

    /// Deletes every stored page and the header.
    fn destroy(&mut self) -> SpatialResult<()>;
}

// ============================================================================
// Memory Backend
// ============================================================================

/// Backend keeping page records in a map. It counts reads and writes, which
/// makes flush behaviour observable.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    header: Option<Vec<u8>>,
    pages: HashMap<PageId, Vec<u8>>,
    reads: u64,
    writes: u64,
    closed: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(&self, page_id: PageId) -> Option<&[u8]> {
        self.pages.get(&page_id).map(|bytes| bytes.as_slice())
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn reads(&self) -> u64 {
        self.reads
    }

    pub fn writes(&self) -> u64 {
        self.writes
    }

    fn check_closed(&self) -> SpatialResult<()> {
        if self.closed {
            Err(SpatialError::StoreClosed)
        } else {
            Ok(())
        }
    }
}

impl PageBackend for MemoryBackend {
    fn read_header(&mut self) -> SpatialResult<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.header.clone())
    }

    fn write_header(&mut self, bytes: &[u8]) -> SpatialResult<()> {
        self.check_closed()?;
        self.header = Some(bytes.to_vec());
        Ok(())
    }

    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Option<Vec<u8>>> {
        self.check_closed()?;
        self.reads += 1;
        Ok(self.pages.get(&page_id).cloned())
    }

    fn write_page(&mut self, page_id: PageId, bytes: &[u8]) -> SpatialResult<()> {
        self.check_closed()?;
        self.writes += 1;
        self.pages.insert(page_id, bytes.to_vec());
        Ok(())
    }

    fn free_page(&mut self, page_id: PageId) -> SpatialResult<()> {
        self.check_closed()?;
        self.pages.remove(&page_id);
        Ok(())
    }

    fn close(&mut self) -> SpatialResult<()> {
        self.closed = true;
        Ok(())
    }

    fn destroy(&mut self) -> SpatialResult<()> {
        self.header = None;
        self.pages.clear();
        self.closed = true;
        Ok(())
    }
}

// ============================================================================
// File Backend
// ============================================================================

const TAG_FREE: u8 = 0;
const TAG_LIVE: u8 = 1;

/// Handles reading/writing individual pages of a file.
///
/// The file is a sequence of fixed-size pages; page 0 holds the header and
/// page `n` holds the record of node `n`. Each page starts with a one byte
/// tag and a little-endian `u32` length, followed by the record and zero
/// padding. Every read is exactly one seek plus one read of one page.
pub struct FileBackend {
    file: Option<File>,
    path: PathBuf,
    page_size: usize,
}

impl FileBackend {
    /// Create (or truncate) a backing file
    pub fn create(path: &Path) -> SpatialResult<Self> {
        Self::create_with_page_size(path, PAGE_SIZE)
    }

    pub fn create_with_page_size(path: &Path, page_size: usize) -> SpatialResult<Self> {
        if page_size <= PAGE_RECORD_OVERHEAD {
            return Err(SpatialError::TreeConfiguration(format!(
                "page size {} is too small",
                page_size
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            page_size,
        })
    }

    /// Open an existing backing file
    pub fn open(path: &Path) -> SpatialResult<Self> {
        Self::open_with_page_size(path, PAGE_SIZE)
    }

    pub fn open_with_page_size(path: &Path, page_size: usize) -> SpatialResult<Self> {
        if page_size <= PAGE_RECORD_OVERHEAD {
            return Err(SpatialError::TreeConfiguration(format!(
                "page size {} is too small",
                page_size
            )));
        }
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            page_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn file(&mut self) -> SpatialResult<&mut File> {
        self.file.as_mut().ok_or(SpatialError::StoreClosed)
    }

    fn read_slot(&mut self, slot: u64) -> SpatialResult<Option<Vec<u8>>> {
        let page_size = self.page_size;
        let offset = slot * page_size as u64;
        let file = self.file()?;
        if offset + page_size as u64 > file.metadata()?.len() {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; page_size];
        file.read_exact(&mut buffer)?;

        if buffer[0] != TAG_LIVE {
            return Ok(None);
        }
        let mut length = [0u8; 4];
        length.copy_from_slice(&buffer[1..PAGE_RECORD_OVERHEAD]);
        let length = u32::from_le_bytes(length) as usize;
        if length > page_size - PAGE_RECORD_OVERHEAD {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Page {} declares {} bytes (max {})", slot, length, page_size),
            )));
        }
        Ok(Some(
            buffer[PAGE_RECORD_OVERHEAD..PAGE_RECORD_OVERHEAD + length].to_vec(),
        ))
    }

    fn write_slot(&mut self, slot: u64, tag: u8, bytes: &[u8]) -> SpatialResult<()> {
        let page_size = self.page_size;
        if bytes.len() > page_size - PAGE_RECORD_OVERHEAD {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "Record too large: {} bytes (max {})",
                    bytes.len(),
                    page_size - PAGE_RECORD_OVERHEAD
                ),
            )));
        }

        let mut padded = Vec::with_capacity(page_size);
        padded.push(tag);
        padded.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        padded.extend_from_slice(bytes);
        padded.resize(page_size, 0);

        let offset = slot * page_size as u64;
        let file = self.file()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&padded)?;
        Ok(())
    }

    fn check_page_id(page_id: PageId) -> SpatialResult<()> {
        if page_id == 0 {
            return Err(SpatialError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Page 0 is reserved for the header",
            )));
        }
        Ok(())
    }
}

impl PageBackend for FileBackend {
    fn read_header(&mut self) -> SpatialResult<Option<Vec<u8>>> {
        self.read_slot(0)
    }

    fn write_header(&mut self, bytes: &[u8]) -> SpatialResult<()> {
        self.write_slot(0, TAG_LIVE, bytes)
    }

    fn read_page(&mut self, page_id: PageId) -> SpatialResult<Option<Vec<u8>>> {
        Self::check_page_id(page_id)?;
        self.read_slot(page_id)
    }

    fn write_page(&mut self, page_id: PageId, bytes: &[u8]) -> SpatialResult<()> {
        Self::check_page_id(page_id)?;
        self.write_slot(page_id, TAG_LIVE, bytes)
    }

    fn free_page(&mut self, page_id: PageId) -> SpatialResult<()> {
        Self::check_page_id(page_id)?;
        self.write_slot(page_id, TAG_FREE, &[])
    }

    fn max_record_size(&self) -> Option<usize> {
        Some(self.page_size - PAGE_RECORD_OVERHEAD)
    }

    fn sync(&mut self) -> SpatialResult<()> {
        self.file()?.sync_all()?;
        Ok(())
    }

    fn close(&mut self) -> SpatialResult<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn destroy(&mut self) -> SpatialResult<()> {
        // The file stays on disk, emptied
        if let Some(file) = self.file.take() {
            file.set_len(0)?;
        } else {
            OpenOptions::new().write(true).open(&self.path)?.set_len(0)?;
        }
        Ok(())
    }
}
