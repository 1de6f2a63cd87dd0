use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    same_adapter, Adapter, ClassRegistry, Notification, NotificationKind, Value,
    CHILDREN_FEATURE, NAME_FEATURE,
};

/// Unique identifier for a node in an [`ObjectGraph`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(Uuid);

impl NodeId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> NodeId {
        NodeId(Uuid::new_v4())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// Unique identifier for a document (the resource a subtree is persisted in).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DocumentId(Uuid);

impl DocumentId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> DocumentId {
        DocumentId(Uuid::new_v4())
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

/// The inputs needed to create a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeProperties {
    pub name: String,
    pub class_name: String,
    pub properties: HashMap<String, Value>,
}

pub struct Node {
    id: NodeId,
    name: String,
    class_name: String,
    properties: HashMap<String, Value>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    document: Option<DocumentId>,
    adapters: Vec<Arc<dyn Adapter>>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn properties(&self) -> &HashMap<String, Value> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// The document this node is directly assigned to, not counting
    /// containment. See [`ObjectGraph::document_of`] for the effective one.
    pub fn document(&self) -> Option<DocumentId> {
        self.document
    }

    pub fn adapters(&self) -> &[Arc<dyn Adapter>] {
        &self.adapters
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("class_name", &self.class_name)
            .field("properties", &self.properties)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("document", &self.document)
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: DocumentId,
    uri: String,
}

impl Document {
    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// An id-addressed graph of nodes with containment, documents, and adapter
/// attachment. All mutation goes through graph methods, which broadcast a
/// notification to the mutated node's adapters after the mutation completes.
pub struct ObjectGraph {
    classes: Arc<ClassRegistry>,
    nodes: HashMap<NodeId, Node>,
    documents: HashMap<DocumentId, Document>,
}

impl ObjectGraph {
    pub fn new(classes: Arc<ClassRegistry>) -> ObjectGraph {
        ObjectGraph {
            classes,
            nodes: HashMap::new(),
            documents: HashMap::new(),
        }
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn insert_node(&mut self, properties: NodeProperties, parent: Option<NodeId>) -> NodeId {
        let id = NodeId::new();

        if self.classes.get(&properties.class_name).is_none() {
            log::warn!(
                "inserting node {} with unregistered class '{}'",
                id,
                properties.class_name
            );
        }

        let parent = parent.filter(|parent_id| {
            let exists = self.nodes.contains_key(parent_id);
            if !exists {
                log::warn!(
                    "parent {} does not exist; node {} inserted as a root",
                    parent_id,
                    id
                );
            }
            exists
        });

        let node = Node {
            id,
            name: properties.name,
            class_name: properties.class_name,
            properties: properties.properties,
            parent,
            children: Vec::new(),
            document: None,
            adapters: Vec::new(),
        };
        self.nodes.insert(id, node);

        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.children.push(id);
            }

            self.broadcast(Notification {
                node: parent_id,
                kind: NotificationKind::Insert,
                feature: Some(CHILDREN_FEATURE.to_owned()),
                old: None,
                new: Some(Value::reference(Some(id))),
            });
        }

        id
    }

    /// Removes a node and its entire subtree. Every removed node's adapters
    /// receive `unset_target` so they can release their references.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if !self.nodes.contains_key(&id) {
            return false;
        }

        let parent = self.nodes[&id].parent;
        if let Some(parent_id) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent_id) {
                parent_node.children.retain(|child| *child != id);
            }

            self.broadcast(Notification {
                node: parent_id,
                kind: NotificationKind::Remove,
                feature: Some(CHILDREN_FEATURE.to_owned()),
                old: Some(Value::reference(Some(id))),
                new: None,
            });
        }

        let mut stack = vec![id];
        let mut removed = Vec::new();
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.remove(&current) {
                stack.extend(node.children.iter().copied());
                removed.push((current, node.adapters));
            }
        }

        for (node_id, adapters) in removed {
            for adapter in adapters {
                adapter.unset_target(self, node_id);
            }
        }

        true
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        let name = name.into();

        let old = match self.nodes.get_mut(&id) {
            Some(node) => std::mem::replace(&mut node.name, name.clone()),
            None => {
                log::warn!("cannot rename missing node {}", id);
                return;
            }
        };

        self.broadcast(Notification {
            node: id,
            kind: NotificationKind::Set,
            feature: Some(NAME_FEATURE.to_owned()),
            old: Some(Value::string(old)),
            new: Some(Value::string(name)),
        });
    }

    pub fn set_property(&mut self, id: NodeId, key: &str, value: Value) {
        let old = match self.nodes.get_mut(&id) {
            Some(node) => node.properties.insert(key.to_owned(), value.clone()),
            None => {
                log::warn!("cannot set property '{}' on missing node {}", key, id);
                return;
            }
        };

        self.broadcast(Notification {
            node: id,
            kind: NotificationKind::Set,
            feature: Some(key.to_owned()),
            old,
            new: Some(value),
        });
    }

    pub fn remove_property(&mut self, id: NodeId, key: &str) {
        let old = match self.nodes.get_mut(&id) {
            Some(node) => node.properties.remove(key),
            None => {
                log::warn!("cannot remove property '{}' on missing node {}", key, id);
                return;
            }
        };

        if let Some(old) = old {
            self.broadcast(Notification {
                node: id,
                kind: NotificationKind::Set,
                feature: Some(key.to_owned()),
                old: Some(old),
                new: None,
            });
        }
    }

    pub fn create_document(&mut self, uri: impl Into<String>) -> DocumentId {
        let id = DocumentId::new();
        self.documents.insert(
            id,
            Document {
                id,
                uri: uri.into(),
            },
        );
        id
    }

    pub fn document(&self, id: DocumentId) -> Option<&Document> {
        self.documents.get(&id)
    }

    pub fn assign_document(&mut self, node: NodeId, document: Option<DocumentId>) {
        match self.nodes.get_mut(&node) {
            Some(found) => found.document = document,
            None => log::warn!("cannot assign document to missing node {}", node),
        }
    }

    /// The effective document of a node: its own direct assignment, or the
    /// first one found walking up the containment chain.
    pub fn document_of(&self, id: NodeId) -> Option<DocumentId> {
        let mut current = Some(id);

        while let Some(node_id) = current {
            let node = self.nodes.get(&node_id)?;

            if let Some(document) = node.document {
                return Some(document);
            }

            current = node.parent;
        }

        None
    }

    /// Attaches an adapter to a node. Attachment is idempotent: attaching the
    /// same adapter instance twice leaves a single attachment.
    pub fn attach_adapter(&mut self, id: NodeId, adapter: Arc<dyn Adapter>) -> bool {
        let node = match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => {
                log::warn!("cannot attach adapter to missing node {}", id);
                return false;
            }
        };

        for existing in &node.adapters {
            if same_adapter(existing, &adapter) {
                return false;
            }
        }

        node.adapters.push(adapter);
        true
    }

    pub fn detach_adapter(&mut self, id: NodeId, adapter: &Arc<dyn Adapter>) -> bool {
        self.detach_adapters(id, |candidate| {
            std::ptr::eq(
                candidate as *const dyn Adapter as *const (),
                Arc::as_ptr(adapter) as *const (),
            )
        }) > 0
    }

    /// Detaches every adapter matching the predicate. Returns how many were
    /// detached. Missing nodes detach nothing.
    pub fn detach_adapters(
        &mut self,
        id: NodeId,
        predicate: impl Fn(&dyn Adapter) -> bool,
    ) -> usize {
        let node = match self.nodes.get_mut(&id) {
            Some(node) => node,
            None => return 0,
        };

        let before = node.adapters.len();
        node.adapters.retain(|adapter| !predicate(adapter.as_ref()));
        before - node.adapters.len()
    }

    /// Finds an already-attached adapter of a concrete type.
    pub fn adapter_of<T: Adapter + 'static>(&self, id: NodeId) -> Option<Arc<T>> {
        let node = self.nodes.get(&id)?;

        node.adapters.iter().find_map(|adapter| {
            if adapter.as_any().is::<T>() {
                Arc::clone(adapter).as_any_arc().downcast::<T>().ok()
            } else {
                None
            }
        })
    }

    pub fn describe(&self, id: NodeId) -> String {
        match self.nodes.get(&id) {
            Some(node) => format!("{} '{}' ({})", node.class_name, node.name, id),
            None => format!("<missing node {}>", id),
        }
    }

    /// Delivers a notification to the adapters of the mutated node. The
    /// adapter list is snapshotted first so listeners may attach and detach
    /// adapters while the event is being dispatched.
    fn broadcast(&mut self, event: Notification) {
        let adapters = match self.nodes.get(&event.node) {
            Some(node) => node.adapters.clone(),
            None => return,
        };

        for adapter in adapters {
            adapter.notify_changed(self, &event);
        }
    }
}

impl fmt::Debug for ObjectGraph {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ObjectGraph")
            .field("nodes", &self.nodes)
            .field("documents", &self.documents)
            .finish()
    }
}
