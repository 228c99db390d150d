//! Storage collaborator seen from the Pregel core
//!
//! The storage engine is external. The core only needs to resolve
//! collections to shard counts, check access, read the documents of one
//! shard, and write results back.
//!
//! Documents are addressed as `collection/key`. A vertex lives in the shard
//! picked by [`shard_for_key`] on its key; an edge lives in the shard of its
//! `_from` vertex, so every edge is local to the worker owning its source.

pub mod memory;

use serde::Deserialize;
use serde_json::Value;

pub use memory::MemoryGraphStore;

pub const KEY_FIELD: &str = "_key";
pub const ID_FIELD: &str = "_id";
pub const FROM_FIELD: &str = "_from";
pub const TO_FIELD: &str = "_to";

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("shard {shard} out of range for collection {collection}")]
    ShardOutOfRange { collection: String, shard: usize },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("duplicate key {key} in collection {collection}")]
    DuplicateKey { collection: String, key: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Document,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub kind: CollectionKind,
    pub shard_count: usize,
}

/// A vertex as loaded from storage
#[derive(Debug, Clone, PartialEq)]
pub struct VertexDocument {
    /// `collection/key`
    pub id: String,
    pub key: String,
    pub collection: String,
    pub data: Value,
}

/// An edge as loaded from storage
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDocument {
    pub from: String,
    pub to: String,
    pub data: Value,
}

impl EdgeDocument {
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }
}

pub trait GraphStore: Send + Sync {
    fn collection_info(&self, name: &str) -> Result<CollectionInfo, StorageError>;

    fn can_access(&self, collection: &str, mode: AccessMode) -> bool;

    fn load_vertices(&self, collection: &str, shard: usize)
        -> Result<Vec<VertexDocument>, StorageError>;

    fn load_edges(&self, collection: &str, shard: usize) -> Result<Vec<EdgeDocument>, StorageError>;

    /// Write `field = value` into each `(key, value)` document of one shard
    fn store_results(
        &self,
        collection: &str,
        shard: usize,
        field: &str,
        results: Vec<(String, Value)>,
    ) -> Result<(), StorageError>;
}

/// Stable FNV-1a routing of a document key to a shard
pub fn shard_for_key(key: &str, shard_count: usize) -> usize {
    if shard_count <= 1 {
        return 0;
    }
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash % shard_count as u64) as usize
}

/// Split `collection/key` into its parts
pub fn split_document_id(id: &str) -> Option<(&str, &str)> {
    let (collection, key) = id.split_once('/')?;
    if collection.is_empty() || key.is_empty() {
        return None;
    }
    Some((collection, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_for_key_is_stable_and_in_range() {
        for key in ["a", "b", "vertex-17", "ü"] {
            let shard = shard_for_key(key, 4);
            assert!(shard < 4);
            assert_eq!(shard, shard_for_key(key, 4));
        }
        assert_eq!(shard_for_key("anything", 1), 0);
        assert_eq!(shard_for_key("anything", 0), 0);
    }

    #[test]
    fn test_shard_for_key_spreads_keys() {
        let shards: std::collections::HashSet<usize> =
            (0..64).map(|i| shard_for_key(&format!("k{i}"), 4)).collect();
        assert_eq!(shards.len(), 4);
    }

    #[test]
    fn test_split_document_id() {
        assert_eq!(split_document_id("persons/alice"), Some(("persons", "alice")));
        assert_eq!(split_document_id("persons/a/b"), Some(("persons", "a/b")));
        assert_eq!(split_document_id("alice"), None);
        assert_eq!(split_document_id("/alice"), None);
        assert_eq!(split_document_id("persons/"), None);
    }
}
