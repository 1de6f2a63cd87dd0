use std::any::Any;
use std::sync::Arc;

use super::{NodeId, Notification, ObjectGraph};

/// Attachable per-node metadata that can also observe the node.
///
/// Adapters are held by the node they are attached to and receive each of the
/// node's change notifications right after the mutation completes, with
/// mutable access to the whole graph so they can react by mutating other
/// nodes. Those counter-mutations dispatch recursively on the same call
/// stack.
pub trait Adapter: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Reacts to a change on a node this adapter is attached to. Returns
    /// whether the adapter handled the notification.
    fn notify_changed(&self, _graph: &mut ObjectGraph, _event: &Notification) -> bool {
        false
    }

    /// Called when a node this adapter is attached to is removed from the
    /// graph.
    fn unset_target(&self, _graph: &mut ObjectGraph, _node: NodeId) {}
}

/// Pointer identity for attached adapters. Attachment is idempotent under
/// this relation.
pub fn same_adapter(a: &Arc<dyn Adapter>, b: &Arc<dyn Adapter>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
