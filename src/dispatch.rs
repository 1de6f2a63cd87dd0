//! The handler table that stands in for reflective method dispatch.
//!
//! Synchronization callbacks are registered explicitly per adapter type as
//! [`SyncHandler`] entries keyed by feature and direction, with declared
//! source/target classes standing in for parameter types. Resolution picks
//! the most specific applicable handler and memoizes the answer in a
//! process-wide concurrent cache owned by the runtime.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::link::FacadeLink;
use crate::object::{ClassRegistry, NodeId, Notification, ObjectGraph};

/// Which side of a façade link a synchronization step writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ToModel,
    ToFacade,
}

pub type HandlerFn = Arc<
    dyn Fn(
            &FacadeLink,
            &mut ObjectGraph,
            NodeId,
            NodeId,
            Option<&Notification>,
        ) -> anyhow::Result<()>
        + Send
        + Sync,
>;

/// One registered synchronization callback.
///
/// The declared source and target classes play the role of parameter types:
/// a handler applies when the actual node classes are assignable to the
/// declared ones. `wants_change` marks the change-descriptor-accepting
/// flavor, which always outranks the descriptor-less flavor during
/// incremental resolution.
#[derive(Clone)]
pub struct SyncHandler {
    name: String,
    feature: String,
    direction: Direction,
    source_class: String,
    target_class: String,
    wants_change: bool,
    func: HandlerFn,
}

impl SyncHandler {
    pub fn new(
        name: impl Into<String>,
        feature: impl Into<String>,
        direction: Direction,
        source_class: impl Into<String>,
        target_class: impl Into<String>,
        func: impl Fn(
                &FacadeLink,
                &mut ObjectGraph,
                NodeId,
                NodeId,
                Option<&Notification>,
            ) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    ) -> SyncHandler {
        SyncHandler {
            name: name.into(),
            feature: feature.into(),
            direction,
            source_class: source_class.into(),
            target_class: target_class.into(),
            wants_change: false,
            func: Arc::new(func),
        }
    }

    /// Marks this handler as accepting the triggering change descriptor.
    pub fn with_change(self) -> SyncHandler {
        SyncHandler {
            wants_change: true,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn wants_change(&self) -> bool {
        self.wants_change
    }

    fn applies_to(&self, classes: &ClassRegistry, source: &str, target: &str) -> bool {
        classes.is_a(source, &self.source_class) && classes.is_a(target, &self.target_class)
    }

    /// The specificity partial order: this handler is more specific when its
    /// declared classes are assignable to the other's and not vice versa.
    fn more_specific_than(&self, classes: &ClassRegistry, other: &SyncHandler) -> bool {
        let forward = classes.is_a(&self.source_class, &other.source_class)
            && classes.is_a(&self.target_class, &other.target_class);
        let backward = classes.is_a(&other.source_class, &self.source_class)
            && classes.is_a(&other.target_class, &self.target_class);

        forward && !backward
    }

    pub(crate) fn invoke(
        &self,
        link: &FacadeLink,
        graph: &mut ObjectGraph,
        source: NodeId,
        target: NodeId,
        change: Option<&Notification>,
    ) -> anyhow::Result<()> {
        (self.func)(link, graph, source, target, change)
    }
}

impl fmt::Debug for SyncHandler {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncHandler")
            .field("name", &self.name)
            .field("feature", &self.feature)
            .field("direction", &self.direction)
            .field("source_class", &self.source_class)
            .field("target_class", &self.target_class)
            .field("wants_change", &self.wants_change)
            .finish()
    }
}

/// The ordered set of handlers registered for one link type.
///
/// Tables are built up front, then frozen behind an `Arc` before any link
/// uses them; registration order is observable both in specificity ties
/// (first registered wins) and in the order bulk synchronizers compose.
#[derive(Debug)]
pub struct HandlerTable {
    name: String,
    handlers: Vec<SyncHandler>,
}

impl HandlerTable {
    pub fn new(name: impl Into<String>) -> HandlerTable {
        HandlerTable {
            name: name.into(),
            handlers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handlers(&self) -> &[SyncHandler] {
        &self.handlers
    }

    pub fn register(&mut self, handler: SyncHandler) {
        self.handlers.push(handler);
    }

    /// All handlers applicable to the given feature, direction, descriptor
    /// arity, and actual classes, in registration order.
    pub fn matching<'a>(
        &'a self,
        classes: &'a ClassRegistry,
        feature: Option<&'a str>,
        direction: Direction,
        wants_change: bool,
        source_class: &'a str,
        target_class: &'a str,
    ) -> impl Iterator<Item = (usize, &'a SyncHandler)> + 'a {
        self.handlers
            .iter()
            .enumerate()
            .filter(move |(_, handler)| {
                handler.direction == direction
                    && handler.wants_change == wants_change
                    && feature.map_or(true, |feature| handler.feature == feature)
                    && handler.applies_to(classes, source_class, target_class)
            })
    }

    /// Resolves the most specific applicable handler, or None. Incomparable
    /// candidates keep their registration order, so the first registered of a
    /// tie wins.
    pub fn resolve(
        &self,
        classes: &ClassRegistry,
        feature: &str,
        direction: Direction,
        wants_change: bool,
        source_class: &str,
        target_class: &str,
    ) -> Option<usize> {
        let mut candidates: Vec<usize> = self
            .matching(
                classes,
                Some(feature),
                direction,
                wants_change,
                source_class,
                target_class,
            )
            .map(|(index, _)| index)
            .collect();

        candidates.sort_by(|&a, &b| {
            let (first, second) = (&self.handlers[a], &self.handlers[b]);

            if first.more_specific_than(classes, second) {
                Ordering::Less
            } else if second.more_specific_than(classes, first) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        });

        candidates.first().copied()
    }
}

/// Runs a handler, logging and swallowing its failure.
///
/// Synchronization callbacks are best-effort: a failing step must not abort
/// the change-notification dispatch that triggered it. Panics, on the other
/// hand, indicate a logic defect and propagate.
pub fn safe_invoke(
    handler: &SyncHandler,
    link: &FacadeLink,
    graph: &mut ObjectGraph,
    source: NodeId,
    target: NodeId,
    change: Option<&Notification>,
) -> bool {
    log::trace!("invoking sync handler '{}'", handler.name);

    match handler.invoke(link, graph, source, target, change) {
        Ok(()) => true,
        Err(err) => {
            log::error!("sync handler '{}' failed: {:#}", handler.name, err);
            false
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DispatchKey {
    table: String,
    feature: String,
    direction: Direction,
    wants_change: bool,
    source_class: String,
    target_class: String,
}

/// Memoizes handler resolution per (table, feature, direction, arity,
/// classes) tuple. Unbounded: handler tables and class registries are static
/// for the life of the process.
#[derive(Debug, Default)]
pub struct DispatchCache {
    entries: DashMap<DispatchKey, Option<usize>>,
}

impl DispatchCache {
    pub fn resolve(
        &self,
        table: &HandlerTable,
        classes: &ClassRegistry,
        feature: &str,
        direction: Direction,
        wants_change: bool,
        source_class: &str,
        target_class: &str,
    ) -> Option<SyncHandler> {
        let key = DispatchKey {
            table: table.name.clone(),
            feature: feature.to_owned(),
            direction,
            wants_change,
            source_class: source_class.to_owned(),
            target_class: target_class.to_owned(),
        };

        let index = {
            let entry = self.entries.entry(key).or_insert_with(|| {
                table.resolve(
                    classes,
                    feature,
                    direction,
                    wants_change,
                    source_class,
                    target_class,
                )
            });
            *entry.value()
        };

        index.and_then(|index| table.handlers.get(index).cloned())
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.entries.len()
    }
}
