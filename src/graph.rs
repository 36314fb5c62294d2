use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::util::id::{GraphId, GraphNodeId};
use crate::util::resource_set::Sliver;

/// Field changes between two slivers, keyed by top-level property name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliverDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl SliverDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// Narrow access to resource graphs. The kernel treats graphs and slivers as
/// opaque values; this is the only surface through which they are read or
/// edited. Implementations may sit on a property-graph database or hold
/// everything in process.
pub trait GraphService: Send + Sync {
    /// Loads a whole graph as an opaque value.
    fn load(&self, graph_id: &GraphId) -> Result<Value>;

    fn serialize(&self, graph_id: &GraphId) -> Result<String>;

    /// Extracts the sliver attached to one node.
    fn node_sliver(&self, graph_id: &GraphId, node_id: &GraphNodeId) -> Result<Sliver>;

    /// Replaces the sliver attached to one node. This is the single
    /// update-in-place operation; everything else about a graph is
    /// immutable through this interface.
    fn update_node_sliver(&self, graph_id: &GraphId, node_id: &GraphNodeId, sliver: Sliver) -> Result<()>;

    /// Splits an aggregate model into one advertised delegation model per
    /// site, returning the new graph ids keyed by site name.
    fn generate_adms(&self, arm_id: &GraphId) -> Result<BTreeMap<String, GraphId>>;

    /// Structural diff of two slivers over their top-level fields.
    fn diff_slivers(&self, left: &Sliver, right: &Sliver) -> SliverDiff;
}

/// In-process graph service over JSON documents shaped as
/// `{"nodes": {"<node-id>": {..sliver.., "site": "<name>"}}}`.
#[derive(Default)]
pub struct MemGraphService {
    graphs: Arc<RwLock<HashMap<GraphId, Value>>>,
}

impl MemGraphService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, graph_id: GraphId, graph: Value) {
        self.graphs.write().insert(graph_id, graph);
    }

    fn with_graph<T>(&self, graph_id: &GraphId, f: impl FnOnce(&Value) -> Result<T>) -> Result<T> {
        let graphs = self.graphs.read();
        let graph = graphs.get(graph_id).ok_or_else(|| Error::NotFound(format!("graph {}", graph_id)))?;
        f(graph)
    }
}

impl GraphService for MemGraphService {
    fn load(&self, graph_id: &GraphId) -> Result<Value> {
        self.with_graph(graph_id, |g| Ok(g.clone()))
    }

    fn serialize(&self, graph_id: &GraphId) -> Result<String> {
        self.with_graph(graph_id, |g| serde_json::to_string(g).map_err(Error::DeserializationError))
    }

    fn node_sliver(&self, graph_id: &GraphId, node_id: &GraphNodeId) -> Result<Sliver> {
        self.with_graph(graph_id, |g| {
            g.get("nodes")
                .and_then(|nodes| nodes.get(node_id.as_str()))
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("node {} in graph {}", node_id, graph_id)))
        })
    }

    fn update_node_sliver(&self, graph_id: &GraphId, node_id: &GraphNodeId, sliver: Sliver) -> Result<()> {
        let mut graphs = self.graphs.write();
        let graph = graphs.get_mut(graph_id).ok_or_else(|| Error::NotFound(format!("graph {}", graph_id)))?;

        let nodes = graph
            .get_mut("nodes")
            .and_then(|n| n.as_object_mut())
            .ok_or_else(|| Error::InvalidState(format!("graph {} has no node map", graph_id)))?;

        if !nodes.contains_key(node_id.as_str()) {
            return Err(Error::NotFound(format!("node {} in graph {}", node_id, graph_id)));
        }
        nodes.insert(node_id.as_str().to_string(), sliver);
        Ok(())
    }

    fn generate_adms(&self, arm_id: &GraphId) -> Result<BTreeMap<String, GraphId>> {
        let arm = self.load(arm_id)?;
        let nodes = arm
            .get("nodes")
            .and_then(|n| n.as_object())
            .ok_or_else(|| Error::InvalidState(format!("graph {} has no node map", arm_id)))?;

        let mut per_site: BTreeMap<String, serde_json::Map<String, Value>> = BTreeMap::new();
        for (node_id, sliver) in nodes {
            let site = sliver.get("site").and_then(|s| s.as_str()).unwrap_or("default").to_string();
            per_site.entry(site).or_default().insert(node_id.clone(), sliver.clone());
        }

        let mut adms = BTreeMap::new();
        for (site, nodes) in per_site {
            let adm_id = GraphId::generate();
            self.insert(adm_id.clone(), serde_json::json!({ "nodes": Value::Object(nodes) }));
            adms.insert(site, adm_id);
        }
        Ok(adms)
    }

    fn diff_slivers(&self, left: &Sliver, right: &Sliver) -> SliverDiff {
        let mut diff = SliverDiff::default();

        let empty = serde_json::Map::new();
        let left_map = left.as_object().unwrap_or(&empty);
        let right_map = right.as_object().unwrap_or(&empty);

        for key in left_map.keys() {
            match right_map.get(key) {
                None => diff.removed.push(key.clone()),
                Some(value) if value != &left_map[key] => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        for key in right_map.keys() {
            if !left_map.contains_key(key) {
                diff.added.push(key.clone());
            }
        }
        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn adm_generation_splits_by_site() {
        let service = MemGraphService::new();
        let arm_id = GraphId::new("arm");
        service.insert(
            arm_id.clone(),
            json!({"nodes": {
                "n1": {"site": "east", "core": 4},
                "n2": {"site": "west", "core": 8},
                "n3": {"site": "east", "core": 2},
            }}),
        );

        let adms = service.generate_adms(&arm_id).unwrap();
        assert_eq!(adms.len(), 2);

        let east = service.load(adms.get("east").unwrap()).unwrap();
        assert_eq!(east["nodes"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn sliver_diff_reports_field_changes() {
        let service = MemGraphService::new();
        let left = json!({"core": 2, "ram": 8});
        let right = json!({"core": 4, "disk": 100, "ram": 8});

        let diff = service.diff_slivers(&left, &right);
        assert_eq!(diff.changed, vec!["core"]);
        assert_eq!(diff.added, vec!["disk"]);
        assert!(diff.removed.is_empty());
    }

    #[test]
    fn update_in_place_replaces_node_sliver() {
        let service = MemGraphService::new();
        let gid = GraphId::new("g");
        service.insert(gid.clone(), json!({"nodes": {"n1": {"core": 2}}}));

        let node = GraphNodeId::new("n1");
        service.update_node_sliver(&gid, &node, json!({"core": 16})).unwrap();
        assert_eq!(service.node_sliver(&gid, &node).unwrap(), json!({"core": 16}));
    }
}
