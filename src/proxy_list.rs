//! A delegating view over a reference-list feature that presents every
//! element as a façade.
//!
//! Comparison code iterating a model-side reference list should see façades,
//! not raw model nodes; code writing façades into the list should store the
//! underlying nodes. This view performs both translations at the feature
//! boundary so neither side needs to know about the other's representation.

use crate::facade::{facade_for, underlying_or_self};
#[cfg(test)]
use crate::facade::FacadeObject;
use crate::object::{NodeId, ObjectGraph, Value};

/// An ordered view over one node's reference-list feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacadeList {
    owner: NodeId,
    feature: String,
}

impl FacadeList {
    pub fn new(owner: NodeId, feature: impl Into<String>) -> FacadeList {
        FacadeList {
            owner,
            feature: feature.into(),
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    /// The raw reference ids as stored on the owner.
    pub fn raw(&self, graph: &ObjectGraph) -> Vec<NodeId> {
        graph
            .get(self.owner)
            .and_then(|node| node.property(&self.feature))
            .and_then(Value::as_ref_list)
            .map(|ids| ids.to_vec())
            .unwrap_or_default()
    }

    pub fn len(&self, graph: &ObjectGraph) -> usize {
        self.raw(graph).len()
    }

    pub fn is_empty(&self, graph: &ObjectGraph) -> bool {
        self.raw(graph).is_empty()
    }

    /// The element at `index`, presented as its façade. Synthesizes a proxy
    /// if the element has no linked façade yet.
    pub fn get(&self, graph: &mut ObjectGraph, index: usize) -> Option<NodeId> {
        let id = self.raw(graph).get(index).copied()?;
        facade_for(graph, id).ok()
    }

    /// Every element presented as its façade, in list order.
    pub fn resolved(&self, graph: &mut ObjectGraph) -> Vec<NodeId> {
        self.raw(graph)
            .into_iter()
            .filter_map(|id| facade_for(graph, id).ok())
            .collect()
    }

    /// Whether the list contains the node in either presentation.
    pub fn contains(&self, graph: &ObjectGraph, node: NodeId) -> bool {
        let unwrapped = underlying_or_self(graph, node);
        self.raw(graph)
            .iter()
            .any(|&id| id == node || id == unwrapped)
    }

    /// Appends a node, storing its underlying element when the node is a
    /// façade. Writes go through the graph so the owner's adapters observe
    /// the change.
    pub fn push(&self, graph: &mut ObjectGraph, node: NodeId) {
        let mut ids = self.raw(graph);
        ids.push(underlying_or_self(graph, node));
        graph.set_property(self.owner, &self.feature, Value::ref_list(ids));
    }

    pub fn insert(&self, graph: &mut ObjectGraph, index: usize, node: NodeId) {
        let mut ids = self.raw(graph);
        let index = index.min(ids.len());
        ids.insert(index, underlying_or_self(graph, node));
        graph.set_property(self.owner, &self.feature, Value::ref_list(ids));
    }

    /// Removes a node given in either presentation. Returns whether anything
    /// was removed.
    pub fn remove(&self, graph: &mut ObjectGraph, node: NodeId) -> bool {
        let unwrapped = underlying_or_self(graph, node);
        let mut ids = self.raw(graph);

        match ids.iter().position(|&id| id == node || id == unwrapped) {
            Some(index) => {
                ids.remove(index);
                graph.set_property(self.owner, &self.feature, Value::ref_list(ids));
                true
            }
            None => false,
        }
    }
}
