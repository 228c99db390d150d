//! In-memory `GraphStore` used by tests and the CLI
//!
//! Collections keep one ordered map per shard. Documents are routed the same
//! way a sharded storage engine would: vertices by `_key`, edges by the key
//! of their `_from` vertex.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;

use super::{
    shard_for_key, split_document_id, AccessMode, CollectionInfo, CollectionKind, EdgeDocument,
    GraphStore, StorageError, VertexDocument, FROM_FIELD, ID_FIELD, KEY_FIELD, TO_FIELD,
};

struct MemoryCollection {
    kind: CollectionKind,
    shards: Vec<BTreeMap<String, Value>>,
    next_key: u64,
}

/// Graph description accepted by [`MemoryGraphStore::from_graph_document`]
#[derive(Debug, Deserialize)]
struct GraphFile {
    collections: Vec<CollectionSpec>,
}

#[derive(Debug, Deserialize)]
struct CollectionSpec {
    name: String,
    #[serde(rename = "type")]
    kind: CollectionKind,
    #[serde(default = "default_shards")]
    shards: usize,
    #[serde(default)]
    documents: Vec<Value>,
}

fn default_shards() -> usize {
    1
}

#[derive(Default)]
pub struct MemoryGraphStore {
    collections: RwLock<HashMap<String, MemoryCollection>>,
    /// Missing entry means full access
    access: RwLock<HashMap<String, Option<AccessMode>>>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from `{"collections": [{"name", "type", "shards", "documents"}]}`
    pub fn from_graph_document(document: &Value) -> Result<Self, StorageError> {
        let file: GraphFile = serde_json::from_value(document.clone())
            .map_err(|e| StorageError::InvalidDocument(e.to_string()))?;

        let store = Self::new();
        for spec in &file.collections {
            store.create_collection(&spec.name, spec.kind, spec.shards)?;
        }
        for spec in file.collections {
            for doc in spec.documents {
                store.insert(&spec.name, doc)?;
            }
        }
        Ok(store)
    }

    /// Read a graph document from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Unavailable(format!("{}: {e}", path.display())))?;
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| StorageError::InvalidDocument(format!("{}: {e}", path.display())))?;
        Self::from_graph_document(&document)
    }

    /// Names of all collections of `kind`, sorted
    pub fn collection_names(&self, kind: CollectionKind) -> Vec<String> {
        let mut names: Vec<String> = self
            .collections
            .read()
            .iter()
            .filter(|(_, c)| c.kind == kind)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn create_collection(
        &self,
        name: &str,
        kind: CollectionKind,
        shard_count: usize,
    ) -> Result<(), StorageError> {
        let mut collections = self.collections.write();
        if collections.contains_key(name) {
            return Err(StorageError::InvalidDocument(format!(
                "collection {name} already exists"
            )));
        }
        collections.insert(
            name.to_string(),
            MemoryCollection {
                kind,
                shards: vec![BTreeMap::new(); shard_count.max(1)],
                next_key: 0,
            },
        );
        Ok(())
    }

    /// Insert a document and return its `collection/key` id
    pub fn insert(&self, collection: &str, document: Value) -> Result<String, StorageError> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;
        let Value::Object(mut fields) = document else {
            return Err(StorageError::InvalidDocument(format!(
                "document for {collection} must be an object"
            )));
        };

        let key = match fields.get(KEY_FIELD) {
            Some(Value::String(key)) if !key.is_empty() => key.clone(),
            Some(other) => {
                return Err(StorageError::InvalidDocument(format!(
                    "invalid {KEY_FIELD} {other} in {collection}"
                )))
            }
            None if target.kind == CollectionKind::Edge => {
                target.next_key += 1;
                format!("e{}", target.next_key)
            }
            None => {
                return Err(StorageError::InvalidDocument(format!(
                    "vertex in {collection} without {KEY_FIELD}"
                )))
            }
        };

        let routing_key = match target.kind {
            CollectionKind::Document => key.clone(),
            CollectionKind::Edge => {
                let from = edge_endpoint(&fields, FROM_FIELD, collection)?;
                edge_endpoint(&fields, TO_FIELD, collection)?;
                split_document_id(&from)
                    .map(|(_, from_key)| from_key.to_string())
                    .ok_or_else(|| {
                        StorageError::InvalidDocument(format!("invalid {FROM_FIELD} {from}"))
                    })?
            }
        };

        let shard = shard_for_key(&routing_key, target.shards.len());
        if target.shards[shard].contains_key(&key) {
            return Err(StorageError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }

        let id = format!("{collection}/{key}");
        fields.insert(KEY_FIELD.to_string(), Value::String(key.clone()));
        fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        target.shards[shard].insert(key, Value::Object(fields));
        Ok(id)
    }

    /// Look a document up by key across all shards
    pub fn document(&self, collection: &str, key: &str) -> Option<Value> {
        let collections = self.collections.read();
        collections
            .get(collection)?
            .shards
            .iter()
            .find_map(|shard| shard.get(key).cloned())
    }

    /// Restrict access to a collection; `None` removes all access
    pub fn set_access(&self, collection: &str, mode: Option<AccessMode>) {
        self.access.write().insert(collection.to_string(), mode);
    }

    fn with_shard<R>(
        &self,
        collection: &str,
        shard: usize,
        f: impl FnOnce(CollectionKind, &BTreeMap<String, Value>) -> R,
    ) -> Result<R, StorageError> {
        let collections = self.collections.read();
        let target = collections
            .get(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;
        let docs = target
            .shards
            .get(shard)
            .ok_or_else(|| StorageError::ShardOutOfRange {
                collection: collection.to_string(),
                shard,
            })?;
        Ok(f(target.kind, docs))
    }
}

fn edge_endpoint(
    fields: &serde_json::Map<String, Value>,
    name: &str,
    collection: &str,
) -> Result<String, StorageError> {
    match fields.get(name) {
        Some(Value::String(id)) if split_document_id(id).is_some() => Ok(id.clone()),
        _ => Err(StorageError::InvalidDocument(format!(
            "edge in {collection} needs a collection/key {name}"
        ))),
    }
}

impl GraphStore for MemoryGraphStore {
    fn collection_info(&self, name: &str) -> Result<CollectionInfo, StorageError> {
        let collections = self.collections.read();
        let collection = collections
            .get(name)
            .ok_or_else(|| StorageError::CollectionNotFound(name.to_string()))?;
        Ok(CollectionInfo {
            name: name.to_string(),
            kind: collection.kind,
            shard_count: collection.shards.len(),
        })
    }

    fn can_access(&self, collection: &str, mode: AccessMode) -> bool {
        match self.access.read().get(collection) {
            None => true,
            Some(None) => false,
            Some(Some(granted)) => *granted >= mode,
        }
    }

    fn load_vertices(
        &self,
        collection: &str,
        shard: usize,
    ) -> Result<Vec<VertexDocument>, StorageError> {
        self.with_shard(collection, shard, |_, docs| {
            docs.iter()
                .map(|(key, data)| VertexDocument {
                    id: format!("{collection}/{key}"),
                    key: key.clone(),
                    collection: collection.to_string(),
                    data: data.clone(),
                })
                .collect()
        })
    }

    fn load_edges(&self, collection: &str, shard: usize) -> Result<Vec<EdgeDocument>, StorageError> {
        self.with_shard(collection, shard, |kind, docs| {
            if kind != CollectionKind::Edge {
                return Err(StorageError::InvalidDocument(format!(
                    "{collection} is not an edge collection"
                )));
            }
            docs.values()
                .map(|data| {
                    let from = data.get(FROM_FIELD).and_then(Value::as_str);
                    let to = data.get(TO_FIELD).and_then(Value::as_str);
                    match (from, to) {
                        (Some(from), Some(to)) => Ok(EdgeDocument {
                            from: from.to_string(),
                            to: to.to_string(),
                            data: data.clone(),
                        }),
                        _ => Err(StorageError::InvalidDocument(format!(
                            "edge in {collection} without endpoints"
                        ))),
                    }
                })
                .collect()
        })?
    }

    fn store_results(
        &self,
        collection: &str,
        shard: usize,
        field: &str,
        results: Vec<(String, Value)>,
    ) -> Result<(), StorageError> {
        let mut collections = self.collections.write();
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| StorageError::CollectionNotFound(collection.to_string()))?;
        let docs = target
            .shards
            .get_mut(shard)
            .ok_or_else(|| StorageError::ShardOutOfRange {
                collection: collection.to_string(),
                shard,
            })?;

        for (key, value) in results {
            let fields = docs
                .get_mut(&key)
                .and_then(Value::as_object_mut)
                .ok_or_else(|| {
                    StorageError::InvalidDocument(format!("{collection}/{key} not found"))
                })?;
            fields.insert(field.to_string(), value);
        }
        Ok(())
    }
}
