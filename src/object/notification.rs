use serde::{Deserialize, Serialize};

use super::{NodeId, Value};

/// Feature name used for notifications about a node's `name` field.
pub const NAME_FEATURE: &str = "Name";

/// Feature name used for notifications about containment changes.
pub const CHILDREN_FEATURE: &str = "Children";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    Set,
    Insert,
    Remove,
}

/// A change event describing one mutation of a node, delivered synchronously
/// to the adapters attached to that node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// The node the mutation happened on.
    pub node: NodeId,

    pub kind: NotificationKind,

    /// The affected structural feature, if the mutation concerns one.
    pub feature: Option<String>,

    pub old: Option<Value>,
    pub new: Option<Value>,
}

impl Notification {
    /// A touch re-announces the current value without changing it. Adapters
    /// that react to real changes skip these.
    pub fn is_touch(&self) -> bool {
        self.kind == NotificationKind::Set && self.old == self.new
    }
}
