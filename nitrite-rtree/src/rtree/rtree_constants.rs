//! Constants for the R-Tree and its page stores.

/// Default page size (16KB) for file-backed stores
pub const PAGE_SIZE: usize = 16384;

/// Default maximum number of entries per node
pub const DEFAULT_MAX_NODE_ENTRIES: usize = 16;

/// Default minimum entries before underflow
pub const DEFAULT_MIN_NODE_ENTRIES: usize = 6;

/// Default number of dimensions of indexed boxes
pub const DEFAULT_DIMENSIONS: usize = 2;

/// Default cache size in number of nodes
pub const DEFAULT_CACHE_NODES: usize = 1024;

/// Magic number for store header identification
pub const MAGIC: u32 = 0x4E525054; // "NRPT" - Nitrite R-Tree Page sTore

/// Store header format version
pub const VERSION: u32 = 1;

/// Bytes reserved in each page for the record tag and length prefix
pub const PAGE_RECORD_OVERHEAD: usize = 5;

/// Freed node ids remembered for reuse; beyond this, freed pages are leaked
/// so the header stays within one page
pub const MAX_FREE_LIST_ENTRIES: usize = 1024;
