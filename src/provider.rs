//! Ranked, chainable lookup of "given an underlying object, produce (or
//! suppress) its façade".
//!
//! Providers answer with one of three verdicts: a façade, the masking
//! sentinel that removes the object from comparison entirely, or no opinion.
//! Composition falls through to the next provider only on "no opinion"; a
//! mask from an early provider stops the chain.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::object::{DocumentId, NodeId, ObjectGraph};

/// The answer a provider gives for one underlying object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacadeLookup {
    /// The façade standing in for the object.
    Facade(NodeId),

    /// The object is managed elsewhere and must be omitted from comparison.
    /// Distinguishable from having no opinion, and stops chain evaluation.
    Masked,

    /// This provider does not know the object; ask the next one.
    NoOpinion,
}

impl FacadeLookup {
    pub fn facade(self) -> Option<NodeId> {
        match self {
            FacadeLookup::Facade(node) => Some(node),
            _ => None,
        }
    }

    pub fn is_no_opinion(self) -> bool {
        self == FacadeLookup::NoOpinion
    }
}

pub trait FacadeProvider: Send + Sync {
    fn create_facade(&self, graph: &mut ObjectGraph, object: NodeId) -> FacadeLookup;
}

/// Chains two providers: `first` answers unless it has no opinion.
struct Composed {
    first: Arc<dyn FacadeProvider>,
    second: Arc<dyn FacadeProvider>,
}

impl FacadeProvider for Composed {
    fn create_facade(&self, graph: &mut ObjectGraph, object: NodeId) -> FacadeLookup {
        match self.first.create_facade(graph, object) {
            FacadeLookup::NoOpinion => self.second.create_facade(graph, object),
            decided => decided,
        }
    }
}

pub fn compose(
    first: Arc<dyn FacadeProvider>,
    second: Arc<dyn FacadeProvider>,
) -> Arc<dyn FacadeProvider> {
    Arc::new(Composed { first, second })
}

/// The identity of provider composition: never has an opinion.
pub struct NoOpinionProvider;

impl FacadeProvider for NoOpinionProvider {
    fn create_facade(&self, _graph: &mut ObjectGraph, _object: NodeId) -> FacadeLookup {
        FacadeLookup::NoOpinion
    }
}

/// The documents participating in one comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonScope {
    pub left: DocumentId,
    pub right: DocumentId,
    pub origin: Option<DocumentId>,
}

impl ComparisonScope {
    pub fn two_way(left: DocumentId, right: DocumentId) -> ComparisonScope {
        ComparisonScope {
            left,
            right,
            origin: None,
        }
    }

    pub fn three_way(
        left: DocumentId,
        right: DocumentId,
        origin: DocumentId,
    ) -> ComparisonScope {
        ComparisonScope {
            left,
            right,
            origin: Some(origin),
        }
    }

    pub fn is_three_way(&self) -> bool {
        self.origin.is_some()
    }
}

/// Creates providers for comparison scopes it recognizes, with an integer
/// ranking that orders competing factories.
pub trait FacadeProviderFactory: Send + Sync {
    fn ranking(&self) -> i32;

    fn applies_to(&self, scope: &ComparisonScope) -> bool;

    fn create_provider(&self) -> Arc<dyn FacadeProvider>;
}

/// Registry of provider factories. Reads vastly outnumber registrations, so
/// the factory list sits behind a read-write lock.
#[derive(Default)]
pub struct FacadeProviderRegistry {
    factories: RwLock<Vec<Arc<dyn FacadeProviderFactory>>>,
}

impl FacadeProviderRegistry {
    pub fn new() -> FacadeProviderRegistry {
        FacadeProviderRegistry::default()
    }

    pub fn register(&self, factory: Arc<dyn FacadeProviderFactory>) {
        self.factories.write().push(factory);
    }

    pub fn deregister(&self, factory: &Arc<dyn FacadeProviderFactory>) -> bool {
        let mut factories = self.factories.write();
        let before = factories.len();
        factories.retain(|candidate| !Arc::ptr_eq(candidate, factory));
        factories.len() != before
    }

    /// The factories applicable to a scope, highest ranking first. The sort
    /// is stable: equally-ranked factories keep registration order.
    pub fn factories_for(
        &self,
        scope: &ComparisonScope,
    ) -> Vec<Arc<dyn FacadeProviderFactory>> {
        let mut applicable: Vec<Arc<dyn FacadeProviderFactory>> = self
            .factories
            .read()
            .iter()
            .filter(|factory| factory.applies_to(scope))
            .cloned()
            .collect();

        applicable.sort_by_key(|factory| std::cmp::Reverse(factory.ranking()));
        applicable
    }

    /// Folds every applicable factory's provider into a single delegation
    /// chain, highest ranking first.
    pub fn provider_for(&self, scope: &ComparisonScope) -> Arc<dyn FacadeProvider> {
        let mut provider: Arc<dyn FacadeProvider> = Arc::new(NoOpinionProvider);

        for factory in self.factories_for(scope).into_iter().rev() {
            provider = compose(factory.create_provider(), provider);
        }

        provider
    }
}
