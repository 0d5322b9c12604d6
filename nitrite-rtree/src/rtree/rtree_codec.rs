//! Encoding of nodes and store headers into page records.
//!
//! Records are bincode-encoded and wrapped with a CRC32 checksum so a
//! damaged page is reported instead of decoded into a wrong node.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::rtree_config::TreeConfig;
use super::rtree_constants::{MAGIC, VERSION};
use super::rtree_types::{Node, NodeId, SpatialError, SpatialResult};

/// Metadata record stored in the header page of a cached store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreHeader {
    pub magic: u32,
    pub version: u32,
    pub root: Option<NodeId>,
    pub next_node_id: NodeId,
    pub entry_count: u64,
    pub free_list: Vec<NodeId>,
    pub config: TreeConfig,
}

impl StoreHeader {
    pub fn new(config: TreeConfig) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            root: None,
            // Id 0 addresses the header page
            next_node_id: 1,
            entry_count: 0,
            free_list: Vec::new(),
            config,
        }
    }

    pub fn validate(&self) -> SpatialResult<()> {
        if self.magic != MAGIC {
            return Err(SpatialError::InvalidOperation(
                "Invalid store format (bad magic)".into(),
            ));
        }
        if self.version != VERSION {
            return Err(SpatialError::InvalidOperation(format!(
                "Unsupported store format version {}",
                self.version
            )));
        }
        self.config.validate()
    }
}

/// A record wrapped with the CRC32 of its encoded payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Checksummed {
    checksum: u32,
    payload: Vec<u8>,
}

fn encode<T: Serialize>(value: &T) -> SpatialResult<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(value, bincode::config::legacy())
        .map_err(|e| SpatialError::Serialization(e.to_string()))?;
    let record = Checksummed {
        checksum: crc32fast::hash(&payload),
        payload,
    };
    bincode::serde::encode_to_vec(&record, bincode::config::legacy())
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> SpatialResult<T> {
    let record: Checksummed = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())
        .map(|(record, _)| record)
        .map_err(|e| SpatialError::Serialization(e.to_string()))?;

    let actual = crc32fast::hash(&record.payload);
    if actual != record.checksum {
        return Err(SpatialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "Page checksum mismatch - possible corruption (expected: {:x}, got: {:x})",
                record.checksum, actual
            ),
        )));
    }

    bincode::serde::decode_from_slice(&record.payload, bincode::config::legacy())
        .map(|(value, _)| value)
        .map_err(|e| SpatialError::Serialization(e.to_string()))
}

pub fn encode_node(node: &Node) -> SpatialResult<Vec<u8>> {
    encode(node)
}

pub fn decode_node(bytes: &[u8]) -> SpatialResult<Node> {
    decode(bytes)
}

pub fn encode_header(header: &StoreHeader) -> SpatialResult<Vec<u8>> {
    encode(header)
}

pub fn decode_header(bytes: &[u8]) -> SpatialResult<StoreHeader> {
    let header: StoreHeader = decode(bytes)?;
    header.validate()?;
    Ok(header)
}

/// Upper bound of the encoded size of a node holding `entries` entries of
/// `dimensions`-dimensional boxes.
pub fn max_node_record_size(entries: usize, dimensions: usize) -> usize {
    // bincode legacy: u64 lengths, u32 enum tags, f64 coordinates
    let bbox = 2 * (8 + 8 * dimensions);
    let entry = bbox + 4 + 8;
    let node = 8 + 1 + 8 + entries * entry + 1 + 8;
    // Checksummed wrapper: checksum plus payload length
    node + 4 + 8
}
