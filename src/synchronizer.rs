//! Synchronizer resolution: turning a change event (or a bulk request) into
//! the callback object that performs the synchronization step.
//!
//! Two resolution strategies share the dispatch primitive. Incremental
//! resolution answers a single notification with the most specific handler,
//! trying the change-descriptor-accepting flavor before the plain one.
//! Initial resolution answers a bulk request with every applicable plain
//! handler chained in registration order. Both are memoized per
//! [`SynchronizerCacheKey`] in caches owned by [`SyncRuntime`].

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::dispatch::{safe_invoke, Direction, DispatchCache, HandlerTable, SyncHandler};
use crate::link::FacadeLink;
use crate::object::{ClassRegistry, NodeId, Notification, ObjectGraph};

/// A resolved synchronization step: a function object that mutates the
/// target side of a link to agree with the source side.
#[derive(Debug, Clone)]
pub struct Synchronizer(Inner);

#[derive(Debug, Clone)]
enum Inner {
    Noop,
    Step(SyncHandler),
    Chain(Arc<Synchronizer>, Arc<Synchronizer>),
}

static NOOP: Lazy<Synchronizer> = Lazy::new(|| Synchronizer(Inner::Noop));

impl Synchronizer {
    /// The designated do-nothing synchronizer, shared process-wide.
    pub fn noop() -> Synchronizer {
        NOOP.clone()
    }

    pub fn step(handler: SyncHandler) -> Synchronizer {
        Synchronizer(Inner::Step(handler))
    }

    /// Chains another synchronizer to run after this one with the same
    /// arguments. Both run unconditionally.
    pub fn and_then(self, next: Synchronizer) -> Synchronizer {
        Synchronizer(Inner::Chain(Arc::new(self), Arc::new(next)))
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.0, Inner::Noop)
    }

    /// Runs the step(s). Individual handler failures are logged and
    /// swallowed, so a chain always runs to the end.
    pub fn run(
        &self,
        link: &FacadeLink,
        graph: &mut ObjectGraph,
        source: NodeId,
        target: NodeId,
        change: Option<&Notification>,
    ) {
        match &self.0 {
            Inner::Noop => {}
            Inner::Step(handler) => {
                safe_invoke(handler, link, graph, source, target, change);
            }
            Inner::Chain(first, second) => {
                first.run(link, graph, source, target, change);
                second.run(link, graph, source, target, change);
            }
        }
    }
}

/// Structural key for the two synchronizer caches. A `feature` of `None`
/// means "any feature" and only occurs for initial bulk synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SynchronizerCacheKey {
    pub owner: String,
    pub feature: Option<String>,
    pub direction: Direction,
    pub source_class: String,
    pub target_class: String,
}

/// Process-wide synchronization state: the dispatch resolution cache, the
/// incremental and initial synchronizer caches, and the proxy capability-set
/// cache.
///
/// Owned explicitly and passed to call sites rather than living in a global;
/// all maps tolerate redundant concurrent population of the same key.
#[derive(Debug, Default)]
pub struct SyncRuntime {
    dispatch_cache: DispatchCache,
    incremental: DashMap<SynchronizerCacheKey, Synchronizer>,
    initial: DashMap<SynchronizerCacheKey, Synchronizer>,
    pub(crate) proxy_capabilities: DashMap<String, Arc<Vec<String>>>,
}

impl SyncRuntime {
    pub fn new() -> SyncRuntime {
        SyncRuntime::default()
    }

    /// Resolves the synchronizer for one change notification.
    ///
    /// A change-descriptor-accepting handler always outranks a plain one,
    /// regardless of how specific the plain one's classes are; specificity
    /// only orders handlers within the same arity.
    pub fn incremental_synchronizer(
        &self,
        classes: &ClassRegistry,
        table: &HandlerTable,
        feature: &str,
        direction: Direction,
        source_class: &str,
        target_class: &str,
    ) -> Synchronizer {
        let key = SynchronizerCacheKey {
            owner: table.name().to_owned(),
            feature: Some(feature.to_owned()),
            direction,
            source_class: source_class.to_owned(),
            target_class: target_class.to_owned(),
        };

        let entry = self.incremental.entry(key).or_insert_with(|| {
            let handler = self
                .dispatch_cache
                .resolve(
                    table,
                    classes,
                    feature,
                    direction,
                    true,
                    source_class,
                    target_class,
                )
                .or_else(|| {
                    self.dispatch_cache.resolve(
                        table,
                        classes,
                        feature,
                        direction,
                        false,
                        source_class,
                        target_class,
                    )
                });

            match handler {
                Some(handler) => Synchronizer::step(handler),
                None => Synchronizer::noop(),
            }
        });

        entry.value().clone()
    }

    /// Resolves the bulk synchronizer for a whole-graph or single-feature
    /// initial sync: every applicable plain handler for the direction,
    /// chained in registration order.
    pub fn initial_synchronizer(
        &self,
        classes: &ClassRegistry,
        table: &HandlerTable,
        feature: Option<&str>,
        direction: Direction,
        source_class: &str,
        target_class: &str,
    ) -> Synchronizer {
        let key = SynchronizerCacheKey {
            owner: table.name().to_owned(),
            feature: feature.map(str::to_owned),
            direction,
            source_class: source_class.to_owned(),
            target_class: target_class.to_owned(),
        };

        let entry = self.initial.entry(key).or_insert_with(|| {
            let mut composed: Option<Synchronizer> = None;

            for (_, handler) in table.matching(
                classes,
                feature,
                direction,
                false,
                source_class,
                target_class,
            ) {
                let step = Synchronizer::step(handler.clone());
                composed = Some(match composed {
                    Some(previous) => previous.and_then(step),
                    None => step,
                });
            }

            composed.unwrap_or_else(Synchronizer::noop)
        });

        entry.value().clone()
    }

    #[cfg(test)]
    fn incremental_entry_count(&self) -> usize {
        self.incremental.len()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::object::{ClassDescriptor, NodeProperties};

    fn classes() -> Arc<ClassRegistry> {
        let mut classes = ClassRegistry::new();
        classes.register(ClassDescriptor::new("Element"));
        classes.register(ClassDescriptor::new("Named").superclass("Element"));
        Arc::new(classes)
    }

    fn element(name: &str, class_name: &str) -> NodeProperties {
        NodeProperties {
            name: name.to_owned(),
            class_name: class_name.to_owned(),
            properties: HashMap::new(),
        }
    }

    /// Builds a linked (facade, model) pair over an empty handler table so
    /// synchronizers can be run against real nodes.
    fn linked_pair(
        graph: &mut ObjectGraph,
        table: Arc<HandlerTable>,
        runtime: Arc<SyncRuntime>,
    ) -> (NodeId, NodeId, Arc<FacadeLink>) {
        let facade = graph.insert_node(element("facade", "Element"), None);
        let model = graph.insert_node(element("model", "Element"), None);
        let link = FacadeLink::connect(graph, facade, model, table, runtime).unwrap();
        (facade, model, link)
    }

    fn recording_handler(
        name: &str,
        trace: Arc<Mutex<Vec<String>>>,
    ) -> SyncHandler {
        let label = name.to_owned();
        SyncHandler::new(
            name,
            "Name",
            Direction::ToModel,
            "Element",
            "Element",
            move |_, _, _, _, _| {
                trace.lock().unwrap().push(label.clone());
                Ok(())
            },
        )
    }

    #[test]
    fn missing_handlers_resolve_to_the_noop_singleton() {
        let classes = classes();
        let table = Arc::new(HandlerTable::new("empty"));
        let runtime = Arc::new(SyncRuntime::new());

        let synchronizer = runtime.incremental_synchronizer(
            &classes,
            &table,
            "Name",
            Direction::ToModel,
            "Element",
            "Element",
        );
        assert!(synchronizer.is_noop());

        let mut graph = ObjectGraph::new(classes.clone());
        let (facade, model, link) = linked_pair(&mut graph, table, runtime);

        // Running the no-op has no observable effect.
        synchronizer.run(&link, &mut graph, facade, model, None);
        assert_eq!(graph.get(model).unwrap().name(), "model");
        assert_eq!(graph.get(facade).unwrap().name(), "facade");
    }

    #[test]
    fn descriptor_overload_outranks_more_specific_plain_overload() {
        let classes = classes();
        let runtime = SyncRuntime::new();

        let ran: Arc<Mutex<Vec<String>>> = Default::default();

        // The plain flavor declares *narrower* classes than the descriptor
        // flavor; arity still wins over specificity.
        let mut table = HandlerTable::new("precedence");
        table.register({
            let ran = ran.clone();
            SyncHandler::new(
                "narrow_plain",
                "Name",
                Direction::ToModel,
                "Named",
                "Named",
                move |_, _, _, _, _| {
                    ran.lock().unwrap().push("narrow_plain".to_owned());
                    Ok(())
                },
            )
        });
        table.register(
            SyncHandler::new(
                "broad_descriptor",
                "Name",
                Direction::ToModel,
                "Element",
                "Element",
                {
                    let ran = ran.clone();
                    move |_, _, _, _, change| {
                        assert!(change.is_some());
                        ran.lock().unwrap().push("broad_descriptor".to_owned());
                        Ok(())
                    }
                },
            )
            .with_change(),
        );

        let synchronizer = runtime.incremental_synchronizer(
            &classes,
            &table,
            "Name",
            Direction::ToModel,
            "Named",
            "Named",
        );

        let mut graph = ObjectGraph::new(classes.clone());
        let facade = graph.insert_node(element("facade", "Named"), None);
        let model = graph.insert_node(element("model", "Named"), None);
        let link = FacadeLink::connect(
            &mut graph,
            facade,
            model,
            Arc::new(table),
            Arc::new(SyncRuntime::new()),
        )
        .unwrap();

        let change = Notification {
            node: facade,
            kind: crate::object::NotificationKind::Set,
            feature: Some("Name".to_owned()),
            old: Some(crate::object::Value::string("a")),
            new: Some(crate::object::Value::string("b")),
        };
        synchronizer.run(&link, &mut graph, facade, model, Some(&change));

        assert_eq!(*ran.lock().unwrap(), vec!["broad_descriptor".to_owned()]);
    }

    #[test]
    fn bulk_synchronizer_chains_in_registration_order() {
        let classes = classes();
        let runtime = SyncRuntime::new();

        let trace: Arc<Mutex<Vec<String>>> = Default::default();

        let mut table = HandlerTable::new("bulk");
        table.register(recording_handler("first", trace.clone()));
        table.register({
            let label = "second_feature".to_owned();
            let trace = trace.clone();
            SyncHandler::new(
                "second_feature",
                "Interface",
                Direction::ToModel,
                "Element",
                "Element",
                move |_, _, _, _, _| {
                    trace.lock().unwrap().push(label.clone());
                    Ok(())
                },
            )
        });
        // Descriptor handlers are excluded from bulk sync: there is no
        // triggering event to hand them.
        table.register(recording_handler("with_change", trace.clone()).with_change());
        // Wrong direction is excluded too.
        table.register({
            let trace = trace.clone();
            SyncHandler::new(
                "wrong_direction",
                "Name",
                Direction::ToFacade,
                "Element",
                "Element",
                move |_, _, _, _, _| {
                    trace.lock().unwrap().push("wrong_direction".to_owned());
                    Ok(())
                },
            )
        });

        let synchronizer = runtime.initial_synchronizer(
            &classes,
            &table,
            None,
            Direction::ToModel,
            "Element",
            "Element",
        );
        assert!(!synchronizer.is_noop());

        let mut graph = ObjectGraph::new(classes.clone());
        let (facade, model, link) =
            linked_pair(&mut graph, Arc::new(table), Arc::new(SyncRuntime::new()));

        synchronizer.run(&link, &mut graph, facade, model, None);
        assert_eq!(
            *trace.lock().unwrap(),
            vec!["first".to_owned(), "second_feature".to_owned()]
        );
    }

    #[test]
    fn single_feature_bulk_sync_runs_only_that_feature() {
        let classes = classes();
        let runtime = SyncRuntime::new();

        let trace: Arc<Mutex<Vec<String>>> = Default::default();

        let mut table = HandlerTable::new("bulk");
        table.register(recording_handler("name", trace.clone()));
        table.register({
            let trace = trace.clone();
            SyncHandler::new(
                "interface",
                "Interface",
                Direction::ToModel,
                "Element",
                "Element",
                move |_, _, _, _, _| {
                    trace.lock().unwrap().push("interface".to_owned());
                    Ok(())
                },
            )
        });

        let synchronizer = runtime.initial_synchronizer(
            &classes,
            &table,
            Some("Interface"),
            Direction::ToModel,
            "Element",
            "Element",
        );

        let mut graph = ObjectGraph::new(classes.clone());
        let (facade, model, link) =
            linked_pair(&mut graph, Arc::new(table), Arc::new(SyncRuntime::new()));

        synchronizer.run(&link, &mut graph, facade, model, None);
        assert_eq!(*trace.lock().unwrap(), vec!["interface".to_owned()]);
    }

    #[test]
    fn failing_steps_are_swallowed_and_the_chain_continues() {
        let classes = classes();
        let runtime = SyncRuntime::new();

        let ran = Arc::new(AtomicUsize::new(0));

        let mut table = HandlerTable::new("failing");
        table.register(SyncHandler::new(
            "fails",
            "Name",
            Direction::ToModel,
            "Element",
            "Element",
            |_, _, _, _, _| anyhow::bail!("deliberate failure"),
        ));
        table.register({
            let ran = ran.clone();
            SyncHandler::new(
                "succeeds",
                "Interface",
                Direction::ToModel,
                "Element",
                "Element",
                move |_, _, _, _, _| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            )
        });

        let synchronizer = runtime.initial_synchronizer(
            &classes,
            &table,
            None,
            Direction::ToModel,
            "Element",
            "Element",
        );

        let mut graph = ObjectGraph::new(classes.clone());
        let (facade, model, link) =
            linked_pair(&mut graph, Arc::new(table), Arc::new(SyncRuntime::new()));

        synchronizer.run(&link, &mut graph, facade, model, None);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn incremental_resolution_is_memoized() {
        let classes = classes();
        let runtime = SyncRuntime::new();
        let table = HandlerTable::new("empty");

        for _ in 0..3 {
            runtime.incremental_synchronizer(
                &classes,
                &table,
                "Name",
                Direction::ToModel,
                "Element",
                "Element",
            );
        }
        assert_eq!(runtime.incremental_entry_count(), 1);

        runtime.incremental_synchronizer(
            &classes,
            &table,
            "Name",
            Direction::ToFacade,
            "Element",
            "Element",
        );
        assert_eq!(runtime.incremental_entry_count(), 2);
    }
}
