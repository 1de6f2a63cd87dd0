//! The façade capability and the synthesized proxy for domain types that do
//! not carry it natively.
//!
//! A node is façade-shaped when it can report the underlying element it
//! stands in for. Domain classes that declare the façade capability do this
//! through their [`crate::link::FacadeLink`]; any other node can be wrapped
//! in a [`FacadeProxy`], a delegating stand-in with its own identity that is
//! synthesized at most once per underlying node.

use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

use crate::link::FacadeLink;
use crate::object::{
    Adapter, ClassRegistry, DocumentId, NodeId, NodeProperties, ObjectGraph, Value,
    BASE_CAPABILITY, FACADE_CAPABILITY,
};
use crate::synchronizer::SyncRuntime;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("underlying node {0} does not exist in the graph")]
    MissingUnderlying(NodeId),
}

/// The capability every façade-shaped handle exposes: report the underlying
/// element and the link maintaining it.
pub trait FacadeObject {
    fn node(&self) -> NodeId;

    fn underlying_element(&self, graph: &ObjectGraph) -> Option<NodeId>;

    fn facade_link(&self, graph: &ObjectGraph) -> Option<Arc<FacadeLink>>;
}

/// Handle over a node whose class natively declares the façade capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFacade {
    node: NodeId,
}

impl NativeFacade {
    /// Wraps a node, or refuses if its class does not declare the façade
    /// capability.
    pub fn new(graph: &ObjectGraph, node: NodeId) -> Option<NativeFacade> {
        let class_name = graph.get(node)?.class_name();

        if graph
            .classes()
            .capabilities(class_name)
            .iter()
            .any(|capability| capability == FACADE_CAPABILITY)
        {
            Some(NativeFacade { node })
        } else {
            None
        }
    }
}

impl FacadeObject for NativeFacade {
    fn node(&self) -> NodeId {
        self.node
    }

    fn underlying_element(&self, graph: &ObjectGraph) -> Option<NodeId> {
        self.facade_link(graph).map(|link| link.model())
    }

    fn facade_link(&self, graph: &ObjectGraph) -> Option<Arc<FacadeLink>> {
        FacadeLink::for_node(graph, self.node).filter(|link| link.facade() == self.node)
    }
}

/// Records the single proxy synthesized for an underlying node, making proxy
/// creation idempotent.
#[derive(Debug)]
struct ProxyRecord {
    proxy: NodeId,
}

impl Adapter for ProxyRecord {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Attached to a proxy node; points back at the underlying node.
#[derive(Debug)]
struct ProxyBacking {
    underlying: NodeId,
}

impl Adapter for ProxyBacking {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A synthesized façade: a stand-in node delegating reads to the underlying
/// node while keeping its own identity.
///
/// Graph algorithms that rely on object identity (visited-sets and the like)
/// can hold proxy node ids safely: the same underlying node always resolves
/// to the same proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacadeProxy {
    node: NodeId,
    underlying: NodeId,
}

impl FacadeProxy {
    /// The proxy for an underlying node, synthesizing it on first request.
    pub fn of(graph: &mut ObjectGraph, underlying: NodeId) -> Result<FacadeProxy, ProxyError> {
        if let Some(record) = graph.adapter_of::<ProxyRecord>(underlying) {
            return Ok(FacadeProxy {
                node: record.proxy,
                underlying,
            });
        }

        let (name, class_name) = match graph.get(underlying) {
            Some(node) => (node.name().to_owned(), node.class_name().to_owned()),
            None => return Err(ProxyError::MissingUnderlying(underlying)),
        };

        let proxy = graph.insert_node(
            NodeProperties {
                name,
                class_name,
                properties: Default::default(),
            },
            None,
        );

        graph.attach_adapter(underlying, Arc::new(ProxyRecord { proxy }));
        graph.attach_adapter(proxy, Arc::new(ProxyBacking { underlying }));

        log::trace!(
            "synthesized proxy {} for {}",
            proxy,
            graph.describe(underlying),
        );

        Ok(FacadeProxy {
            node: proxy,
            underlying,
        })
    }

    /// Re-wraps an existing proxy node, if the node is one.
    pub fn from_node(graph: &ObjectGraph, node: NodeId) -> Option<FacadeProxy> {
        let backing = graph.adapter_of::<ProxyBacking>(node)?;
        Some(FacadeProxy {
            node,
            underlying: backing.underlying,
        })
    }

    pub fn underlying(&self) -> NodeId {
        self.underlying
    }

    /// The proxy's document: its own directly-assigned or
    /// containment-reachable document when it has one, the underlying
    /// node's otherwise. A proxy floating free of any document therefore
    /// still resolves to where its underlying element is persisted.
    pub fn document(&self, graph: &ObjectGraph) -> Option<DocumentId> {
        graph
            .document_of(self.node)
            .or_else(|| graph.document_of(self.underlying))
    }

    /// Delegated read of the underlying node's name.
    pub fn name<'a>(&self, graph: &'a ObjectGraph) -> Option<&'a str> {
        graph.get(self.underlying).map(|node| node.name())
    }

    pub fn class_name<'a>(&self, graph: &'a ObjectGraph) -> Option<&'a str> {
        graph.get(self.underlying).map(|node| node.class_name())
    }

    /// Delegated read of one of the underlying node's properties.
    pub fn property<'a>(&self, graph: &'a ObjectGraph, feature: &str) -> Option<&'a Value> {
        graph.get(self.underlying)?.property(feature)
    }

    pub fn children<'a>(&self, graph: &'a ObjectGraph) -> &'a [NodeId] {
        graph
            .get(self.underlying)
            .map(|node| node.children())
            .unwrap_or(&[])
    }

    /// The capability set this proxy presents: everything its underlying
    /// class presents except the base object capability, plus the façade
    /// capability. Cached per class.
    pub fn capabilities(
        &self,
        graph: &ObjectGraph,
        runtime: &SyncRuntime,
    ) -> Arc<Vec<String>> {
        let class_name = match graph.get(self.underlying) {
            Some(node) => node.class_name().to_owned(),
            None => return Arc::new(vec![FACADE_CAPABILITY.to_owned()]),
        };

        proxy_capabilities(runtime, graph.classes(), &class_name)
    }

    /// Renders the underlying node, not the proxy. Identity comparisons stay
    /// on the proxy's own node id.
    pub fn describe(&self, graph: &ObjectGraph) -> String {
        graph.describe(self.underlying)
    }
}

impl FacadeObject for FacadeProxy {
    fn node(&self) -> NodeId {
        self.node
    }

    fn underlying_element(&self, _graph: &ObjectGraph) -> Option<NodeId> {
        Some(self.underlying)
    }

    fn facade_link(&self, graph: &ObjectGraph) -> Option<Arc<FacadeLink>> {
        FacadeLink::for_node(graph, self.underlying)
            .filter(|link| link.model() == self.underlying)
    }
}

/// The capability set a proxy over the given class presents. Computed once
/// per class; class metadata is static for the process lifetime.
pub fn proxy_capabilities(
    runtime: &SyncRuntime,
    classes: &ClassRegistry,
    class_name: &str,
) -> Arc<Vec<String>> {
    if let Some(cached) = runtime.proxy_capabilities.get(class_name) {
        return cached.clone();
    }

    let mut capabilities: Vec<String> = classes
        .capabilities(class_name)
        .into_iter()
        .filter(|capability| capability != BASE_CAPABILITY)
        .collect();

    if !capabilities.iter().any(|c| c == FACADE_CAPABILITY) {
        capabilities.push(FACADE_CAPABILITY.to_owned());
    }

    let capabilities = Arc::new(capabilities);
    runtime
        .proxy_capabilities
        .insert(class_name.to_owned(), capabilities.clone());
    capabilities
}

/// Whether a node is façade-shaped, natively or as a synthesized proxy.
pub fn is_facade(graph: &ObjectGraph, node: NodeId) -> bool {
    FacadeProxy::from_node(graph, node).is_some() || NativeFacade::new(graph, node).is_some()
}

/// The underlying element of a façade-shaped node, native or synthesized.
pub fn underlying_of(graph: &ObjectGraph, node: NodeId) -> Option<NodeId> {
    if let Some(proxy) = FacadeProxy::from_node(graph, node) {
        return Some(proxy.underlying());
    }

    NativeFacade::new(graph, node).and_then(|facade| facade.underlying_element(graph))
}

/// Unwraps a façade back to its underlying element, or returns the node
/// itself when it is not façade-shaped.
pub fn underlying_or_self(graph: &ObjectGraph, node: NodeId) -> NodeId {
    underlying_of(graph, node).unwrap_or(node)
}

/// The façade presentation of an underlying node: the façade its link
/// already provides when there is one, a synthesized proxy otherwise.
/// Nodes that are themselves façade-shaped pass through unchanged.
pub fn facade_for(graph: &mut ObjectGraph, node: NodeId) -> Result<NodeId, ProxyError> {
    if is_facade(graph, node) {
        return Ok(node);
    }

    if let Some(link) = FacadeLink::for_node(graph, node) {
        if link.model() == node {
            return Ok(link.facade());
        }
    }

    FacadeProxy::of(graph, node).map(|proxy| proxy.node)
}
