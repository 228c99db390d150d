//! In-memory vertex store of one worker

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::algorithm::Algorithm;
use crate::storage::{EdgeDocument, GraphStore, StorageError, VertexDocument, ID_FIELD, KEY_FIELD};

#[derive(Debug, Clone)]
pub struct VertexEntry {
    pub document: VertexDocument,
    pub partition: usize,
    pub value: Value,
    pub active: bool,
    pub edges: Vec<EdgeDocument>,
}

/// Vertices and outbound edges of the partitions placed on one worker
#[derive(Debug, Default)]
pub struct ShardGraph {
    vertices: Vec<VertexEntry>,
    index: HashMap<String, usize>,
    edge_count: u64,
}

impl ShardGraph {
    /// Load the given partitions of every collection.
    ///
    /// Edges are attached to their `_from` vertex, which lives in the same
    /// partition. Edges whose source is not one of the loaded vertices are
    /// skipped.
    pub fn load(
        store: &dyn GraphStore,
        algorithm: &dyn Algorithm,
        vertex_collections: &[String],
        edge_collections: &[String],
        partitions: &[usize],
    ) -> Result<Self, StorageError> {
        let mut graph = Self::default();

        for &partition in partitions {
            for collection in vertex_collections {
                for document in store.load_vertices(collection, partition)? {
                    let value = algorithm.initial_value(&document);
                    graph.insert(VertexEntry {
                        document,
                        partition,
                        value,
                        active: true,
                        edges: Vec::new(),
                    });
                }
            }
        }

        let mut skipped = 0u64;
        for &partition in partitions {
            for collection in edge_collections {
                for edge in store.load_edges(collection, partition)? {
                    match graph.index.get(&edge.from) {
                        Some(&slot) => {
                            graph.vertices[slot].edges.push(edge);
                            graph.edge_count += 1;
                        }
                        None => skipped += 1,
                    }
                }
            }
        }
        if skipped > 0 {
            tracing::debug!(skipped, "Skipped edges without a loaded source vertex");
        }

        Ok(graph)
    }

    fn insert(&mut self, entry: VertexEntry) {
        self.index
            .insert(entry.document.id.clone(), self.vertices.len());
        self.vertices.push(entry);
    }

    pub fn contains(&self, vertex_id: &str) -> bool {
        self.index.contains_key(vertex_id)
    }

    pub fn vertex(&self, vertex_id: &str) -> Option<&VertexEntry> {
        self.index.get(vertex_id).map(|&slot| &self.vertices[slot])
    }

    pub fn vertices_mut(&mut self) -> impl Iterator<Item = &mut VertexEntry> {
        self.vertices.iter_mut()
    }

    pub fn vertex_count(&self) -> u64 {
        self.vertices.len() as u64
    }

    pub fn edge_count(&self) -> u64 {
        self.edge_count
    }

    pub fn active_count(&self) -> u64 {
        self.vertices.iter().filter(|v| v.active).count() as u64
    }

    /// `{"_id", "_key", <field>: value}` for every vertex
    pub fn results(&self, field: &str) -> Vec<Value> {
        self.vertices
            .iter()
            .map(|v| {
                let mut doc = Map::new();
                doc.insert(ID_FIELD.to_string(), Value::String(v.document.id.clone()));
                doc.insert(KEY_FIELD.to_string(), Value::String(v.document.key.clone()));
                doc.insert(field.to_string(), v.value.clone());
                Value::Object(doc)
            })
            .collect()
    }

    /// `(key, value)` pairs grouped by collection and shard, ready for
    /// `GraphStore::store_results`
    pub fn results_by_shard(&self) -> BTreeMap<(String, usize), Vec<(String, Value)>> {
        let mut grouped: BTreeMap<(String, usize), Vec<(String, Value)>> = BTreeMap::new();
        for v in &self.vertices {
            grouped
                .entry((v.document.collection.clone(), v.partition))
                .or_default()
                .push((v.document.key.clone(), v.value.clone()));
        }
        grouped
    }
}
