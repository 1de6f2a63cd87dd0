//! The stateful link that keeps one façade node and one model node
//! consistent.
//!
//! A [`FacadeLink`] is attached as an adapter to both of its nodes. Change
//! notifications from either side are answered by resolving and running the
//! matching synchronizer against the counterpart, while a re-entrancy latch
//! suppresses the secondary notifications that the counterpart mutation
//! fires back at the link.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::dispatch::{Direction, HandlerTable};
use crate::object::{Adapter, NodeId, Notification, ObjectGraph};
use crate::synchronizer::SyncRuntime;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("facade node {0} does not exist in the graph")]
    MissingFacade(NodeId),

    #[error("model node {0} does not exist in the graph")]
    MissingModel(NodeId),
}

/// Links a façade node to the model node it stands in for.
///
/// At most one link of a given handler-table type exists per model node;
/// [`FacadeLink::connect`] enforces this by looking up the existing adapter
/// before creating a new one.
pub struct FacadeLink {
    facade: NodeId,
    model: NodeId,
    table: Arc<HandlerTable>,
    runtime: Arc<SyncRuntime>,

    /// The re-entrancy latch. True only while a synchronizer resolved by
    /// this link is running. Guarded writes save and restore the previous
    /// value so nested bulk-then-incremental sequences unwind correctly.
    synchronizing: AtomicBool,
}

/// Saves the latch state on entry and restores it on every exit path.
struct SyncGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl<'a> SyncGuard<'a> {
    fn enter(flag: &'a AtomicBool) -> SyncGuard<'a> {
        let previous = flag.swap(true, Ordering::SeqCst);
        SyncGuard { flag, previous }
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::SeqCst);
    }
}

impl FacadeLink {
    /// Associates a façade with a model node, reusing an existing link where
    /// possible.
    ///
    /// If a link of the same table type is already attached to `model` but
    /// references a different façade, it is disposed and replaced. Missing
    /// nodes fail fast, naming the offending argument.
    pub fn connect(
        graph: &mut ObjectGraph,
        facade: NodeId,
        model: NodeId,
        table: Arc<HandlerTable>,
        runtime: Arc<SyncRuntime>,
    ) -> Result<Arc<FacadeLink>, LinkError> {
        if !graph.contains(facade) {
            return Err(LinkError::MissingFacade(facade));
        }
        if !graph.contains(model) {
            return Err(LinkError::MissingModel(model));
        }

        if let Some(existing) = Self::existing_link(graph, model, table.name()) {
            if existing.facade == facade {
                return Ok(existing);
            }

            log::trace!(
                "replacing link on {} referencing stale facade {}",
                graph.describe(model),
                existing.facade,
            );
            existing.dispose(graph);
        }

        let link = Arc::new(FacadeLink {
            facade,
            model,
            table,
            runtime,
            synchronizing: AtomicBool::new(false),
        });

        let adapter: Arc<dyn Adapter> = link.clone();
        graph.attach_adapter(facade, adapter.clone());
        graph.attach_adapter(model, adapter);

        log::trace!(
            "connected facade {} to model {}",
            graph.describe(facade),
            graph.describe(model),
        );

        Ok(link)
    }

    /// The link attached to a node, whichever side the node is.
    pub fn for_node(graph: &ObjectGraph, node: NodeId) -> Option<Arc<FacadeLink>> {
        graph.adapter_of::<FacadeLink>(node)
    }

    /// The link of a specific table type attached to a model node. A node
    /// can carry links of several types at once; `connect` only replaces
    /// the one whose type it was asked for.
    fn existing_link(
        graph: &ObjectGraph,
        model: NodeId,
        table_name: &str,
    ) -> Option<Arc<FacadeLink>> {
        let node = graph.get(model)?;

        node.adapters().iter().find_map(|adapter| {
            if !adapter.as_any().is::<FacadeLink>() {
                return None;
            }

            let link = Arc::clone(adapter)
                .as_any_arc()
                .downcast::<FacadeLink>()
                .ok()?;

            if link.table.name() == table_name {
                Some(link)
            } else {
                None
            }
        })
    }

    pub fn facade(&self) -> NodeId {
        self.facade
    }

    pub fn model(&self) -> NodeId {
        self.model
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    pub fn is_synchronizing(&self) -> bool {
        self.synchronizing.load(Ordering::SeqCst)
    }

    /// Runs one incremental synchronization step for a change notification.
    ///
    /// The synchronizer is resolved before the latch is consulted, so
    /// resolution itself never depends on latch state. If the link is
    /// already synchronizing the request is a silent no-op: a façade→model
    /// write whose model-side notification would otherwise re-trigger
    /// model→façade sync gets suppressed right here.
    pub fn synchronize(
        &self,
        graph: &mut ObjectGraph,
        direction: Direction,
        change: &Notification,
    ) {
        let feature = match &change.feature {
            Some(feature) => feature.clone(),
            None => return,
        };

        let (source, target) = self.endpoints(direction);

        let (source_class, target_class) = match (graph.get(source), graph.get(target)) {
            (Some(source_node), Some(target_node)) => (
                source_node.class_name().to_owned(),
                target_node.class_name().to_owned(),
            ),
            _ => {
                log::warn!(
                    "link between {} and {} fired for a node no longer in the graph",
                    self.facade,
                    self.model,
                );
                return;
            }
        };

        let synchronizer = self.runtime.incremental_synchronizer(
            graph.classes(),
            &self.table,
            &feature,
            direction,
            &source_class,
            &target_class,
        );

        if self.synchronizing.load(Ordering::SeqCst) {
            return;
        }

        let _guard = SyncGuard::enter(&self.synchronizing);
        synchronizer.run(self, graph, source, target, Some(change));
    }

    /// Runs bulk synchronization for a direction, optionally restricted to a
    /// single feature.
    ///
    /// The latch is elevated for the duration so that the mutations the bulk
    /// synchronizer performs do not trigger nested incremental sync, but
    /// unlike [`FacadeLink::synchronize`] there is no early return: a nested
    /// bulk sync requested from within a running synchronizer still runs,
    /// and the guard restores the previous latch value when it finishes.
    pub fn initial_sync(
        &self,
        graph: &mut ObjectGraph,
        direction: Direction,
        feature: Option<&str>,
    ) {
        let (source, target) = self.endpoints(direction);

        let (source_class, target_class) = match (graph.get(source), graph.get(target)) {
            (Some(source_node), Some(target_node)) => (
                source_node.class_name().to_owned(),
                target_node.class_name().to_owned(),
            ),
            _ => {
                log::warn!(
                    "initial sync requested on link between {} and {} with a node missing",
                    self.facade,
                    self.model,
                );
                return;
            }
        };

        let synchronizer = self.runtime.initial_synchronizer(
            graph.classes(),
            &self.table,
            feature,
            direction,
            &source_class,
            &target_class,
        );

        let _guard = SyncGuard::enter(&self.synchronizing);
        synchronizer.run(self, graph, source, target, None);
    }

    /// Detaches the link from both of its nodes.
    pub fn dispose(&self, graph: &mut ObjectGraph) {
        log::trace!("disposing link between {} and {}", self.facade, self.model);

        self.detach_from(graph, self.facade);
        self.detach_from(graph, self.model);
    }

    fn detach_from(&self, graph: &mut ObjectGraph, node: NodeId) {
        graph.detach_adapters(node, |adapter| {
            adapter
                .as_any()
                .downcast_ref::<FacadeLink>()
                .is_some_and(|link| std::ptr::eq(link, self))
        });
    }

    fn endpoints(&self, direction: Direction) -> (NodeId, NodeId) {
        match direction {
            Direction::ToModel => (self.facade, self.model),
            Direction::ToFacade => (self.model, self.facade),
        }
    }
}

impl Adapter for FacadeLink {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn notify_changed(&self, graph: &mut ObjectGraph, event: &Notification) -> bool {
        if event.is_touch() {
            return true;
        }

        if event.node == self.facade {
            self.synchronize(graph, Direction::ToModel, event);
            true
        } else if event.node == self.model {
            self.synchronize(graph, Direction::ToFacade, event);
            true
        } else {
            false
        }
    }

    fn unset_target(&self, graph: &mut ObjectGraph, node: NodeId) {
        if node == self.facade || node == self.model {
            self.dispose(graph);
        }
    }
}

impl fmt::Debug for FacadeLink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("FacadeLink")
            .field("facade", &self.facade)
            .field("model", &self.model)
            .field("table", &self.table.name())
            .field("synchronizing", &self.is_synchronizing())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    use crate::dispatch::SyncHandler;
    use crate::object::{ClassDescriptor, ClassRegistry, NodeProperties, Value};

    fn classes() -> Arc<ClassRegistry> {
        let mut classes = ClassRegistry::new();
        classes.register(ClassDescriptor::new("Element"));
        Arc::new(classes)
    }

    fn element(name: &str) -> NodeProperties {
        NodeProperties {
            name: name.to_owned(),
            class_name: "Element".to_owned(),
            properties: HashMap::new(),
        }
    }

    /// A table that mirrors the name field in both directions and counts how
    /// many times each handler ran.
    fn rename_table(
        to_model_runs: Arc<AtomicUsize>,
        to_facade_runs: Arc<AtomicUsize>,
    ) -> Arc<HandlerTable> {
        let mut table = HandlerTable::new("rename");

        table.register(SyncHandler::new(
            "sync_name_to_model",
            "Name",
            Direction::ToModel,
            "Element",
            "Element",
            move |_, graph, source, target, _| {
                to_model_runs.fetch_add(1, Ordering::SeqCst);
                let name = match graph.get(source) {
                    Some(node) => node.name().to_owned(),
                    None => return Ok(()),
                };
                graph.set_name(target, name);
                Ok(())
            },
        ));

        table.register(SyncHandler::new(
            "sync_name_to_facade",
            "Name",
            Direction::ToFacade,
            "Element",
            "Element",
            move |_, graph, source, target, _| {
                to_facade_runs.fetch_add(1, Ordering::SeqCst);
                let name = match graph.get(source) {
                    Some(node) => node.name().to_owned(),
                    None => return Ok(()),
                };
                graph.set_name(target, name);
                Ok(())
            },
        ));

        Arc::new(table)
    }

    #[test]
    fn connect_is_idempotent_per_pair() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("facade"), None);
        let model = graph.insert_node(element("model"), None);

        let table = Arc::new(HandlerTable::new("rename"));
        let runtime = Arc::new(SyncRuntime::new());

        let first = FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table.clone(),
            runtime.clone(),
        )
        .unwrap();
        let second =
            FacadeLink::connect(&mut graph, facade, model, table, runtime).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(graph.get(facade).unwrap().adapters().len(), 1);
        assert_eq!(graph.get(model).unwrap().adapters().len(), 1);
    }

    #[test]
    fn connect_replaces_a_link_bound_to_a_different_facade() {
        let mut graph = ObjectGraph::new(classes());
        let old_facade = graph.insert_node(element("old"), None);
        let new_facade = graph.insert_node(element("new"), None);
        let model = graph.insert_node(element("model"), None);

        let table = Arc::new(HandlerTable::new("rename"));
        let runtime = Arc::new(SyncRuntime::new());

        let old_link = FacadeLink::connect(
            &mut graph,
            old_facade,
            model,
            table.clone(),
            runtime.clone(),
        )
        .unwrap();
        let new_link =
            FacadeLink::connect(&mut graph, new_facade, model, table, runtime).unwrap();

        assert!(!Arc::ptr_eq(&old_link, &new_link));
        assert_eq!(new_link.facade(), new_facade);

        // The stale link is fully detached.
        assert!(graph.get(old_facade).unwrap().adapters().is_empty());
        assert_eq!(graph.get(model).unwrap().adapters().len(), 1);
        assert!(FacadeLink::for_node(&graph, old_facade).is_none());
    }

    #[test]
    fn connect_fails_fast_on_missing_nodes() {
        let mut graph = ObjectGraph::new(classes());
        let model = graph.insert_node(element("model"), None);
        let missing = NodeId::new();

        let table = Arc::new(HandlerTable::new("rename"));
        let runtime = Arc::new(SyncRuntime::new());

        let err = FacadeLink::connect(
            &mut graph,
            missing,
            model,
            table.clone(),
            runtime.clone(),
        )
        .unwrap_err();
        assert!(matches!(err, LinkError::MissingFacade(id) if id == missing));

        let err =
            FacadeLink::connect(&mut graph, model, missing, table, runtime).unwrap_err();
        assert!(matches!(err, LinkError::MissingModel(id) if id == missing));
    }

    #[test]
    fn feedback_notifications_do_not_re_enter_synchronization() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("facade"), None);
        let model = graph.insert_node(element("model"), None);

        let to_model_runs = Arc::new(AtomicUsize::new(0));
        let to_facade_runs = Arc::new(AtomicUsize::new(0));
        let table = rename_table(to_model_runs.clone(), to_facade_runs.clone());

        FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table,
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        // Renaming the facade propagates to the model. The model-side
        // notification that the propagation fires must not bounce back.
        graph.set_name(facade, "renamed");

        assert_eq!(graph.get(model).unwrap().name(), "renamed");
        assert_eq!(to_model_runs.load(Ordering::SeqCst), 1);
        assert_eq!(to_facade_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn model_changes_propagate_to_the_facade() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("facade"), None);
        let model = graph.insert_node(element("model"), None);

        let to_model_runs = Arc::new(AtomicUsize::new(0));
        let to_facade_runs = Arc::new(AtomicUsize::new(0));
        let table = rename_table(to_model_runs.clone(), to_facade_runs.clone());

        FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table,
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        graph.set_name(model, "from-model");

        assert_eq!(graph.get(facade).unwrap().name(), "from-model");
        assert_eq!(to_facade_runs.load(Ordering::SeqCst), 1);
        assert_eq!(to_model_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn touch_events_are_ignored_but_handled() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("same"), None);
        let model = graph.insert_node(element("model"), None);

        let to_model_runs = Arc::new(AtomicUsize::new(0));
        let to_facade_runs = Arc::new(AtomicUsize::new(0));
        let table = rename_table(to_model_runs.clone(), to_facade_runs.clone());

        let link = FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table,
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        let touch = Notification {
            node: facade,
            kind: crate::object::NotificationKind::Set,
            feature: Some("Name".to_owned()),
            old: Some(Value::string("same")),
            new: Some(Value::string("same")),
        };
        assert!(link.notify_changed(&mut graph, &touch));
        assert_eq!(to_model_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn foreign_notifications_are_not_handled() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("facade"), None);
        let model = graph.insert_node(element("model"), None);
        let bystander = graph.insert_node(element("bystander"), None);

        let table = Arc::new(HandlerTable::new("rename"));
        let link = FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table,
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        let event = Notification {
            node: bystander,
            kind: crate::object::NotificationKind::Set,
            feature: Some("Name".to_owned()),
            old: Some(Value::string("a")),
            new: Some(Value::string("b")),
        };
        assert!(!link.notify_changed(&mut graph, &event));
    }

    #[test]
    fn removing_either_node_disposes_the_link() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("facade"), None);
        let model = graph.insert_node(element("model"), None);

        let table = Arc::new(HandlerTable::new("rename"));
        FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table,
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        graph.remove_node(model);

        assert!(FacadeLink::for_node(&graph, facade).is_none());
        assert!(graph.get(facade).unwrap().adapters().is_empty());
    }

    #[test]
    fn initial_sync_runs_latched_and_restores_the_latch() {
        let mut graph = ObjectGraph::new(classes());
        let facade = graph.insert_node(element("facade"), None);
        let model = graph.insert_node(element("model"), None);

        let to_model_runs = Arc::new(AtomicUsize::new(0));
        let to_facade_runs = Arc::new(AtomicUsize::new(0));
        let table = rename_table(to_model_runs.clone(), to_facade_runs.clone());

        let link = FacadeLink::connect(
            &mut graph,
            facade,
            model,
            table,
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        link.initial_sync(&mut graph, Direction::ToModel, None);

        // The bulk handler renamed the model; the notification that rename
        // fired was suppressed by the elevated latch.
        assert_eq!(graph.get(model).unwrap().name(), "facade");
        assert_eq!(to_model_runs.load(Ordering::SeqCst), 1);
        assert_eq!(to_facade_runs.load(Ordering::SeqCst), 0);
        assert!(!link.is_synchronizing());
    }
}
