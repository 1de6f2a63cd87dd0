//! Veneer keeps a lightweight façade object graph and a verbose underlying
//! model graph consistent under fine-grained mutation from either side.
//!
//! The centerpiece is [`link::FacadeLink`], a stateful adapter attached to
//! both a façade node and its model counterpart. It listens for change
//! notifications on either node, resolves a synchronization callback from a
//! registered handler table, and runs it against the counterpart while a
//! re-entrancy latch suppresses the feedback notifications that the
//! counterpart mutation produces.
//!
//! Comparison engines consume façades through [`provider::FacadeProvider`]
//! lookups and unwrap them again through the [`facade::FacadeObject`]
//! capability.

pub mod dispatch;
pub mod facade;
pub mod link;
pub mod object;
pub mod provider;
pub mod proxy_list;
pub mod synchronizer;

pub use crate::dispatch::{Direction, HandlerTable, SyncHandler};
pub use crate::facade::{FacadeObject, FacadeProxy, NativeFacade};
pub use crate::link::FacadeLink;
pub use crate::object::{
    ClassDescriptor, ClassRegistry, Node, NodeId, NodeProperties, Notification, ObjectGraph,
    Value,
};
pub use crate::provider::{
    ComparisonScope, FacadeLookup, FacadeProvider, FacadeProviderFactory, FacadeProviderRegistry,
};
pub use crate::proxy_list::FacadeList;
pub use crate::synchronizer::{SyncRuntime, Synchronizer};
