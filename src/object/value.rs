use serde::{Deserialize, Serialize};

use super::NodeId;

/// A property value held by a structural feature of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Value {
    String { value: String },
    Bool { value: bool },
    Int { value: i64 },
    Float { value: f64 },
    Ref { value: Option<NodeId> },
    RefList { value: Vec<NodeId> },
}

impl Value {
    pub fn string(value: impl Into<String>) -> Value {
        Value::String {
            value: value.into(),
        }
    }

    pub fn reference(value: Option<NodeId>) -> Value {
        Value::Ref { value }
    }

    pub fn ref_list(value: Vec<NodeId>) -> Value {
        Value::RefList { value }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_ref_list(&self) -> Option<&[NodeId]> {
        match self {
            Value::RefList { value } => Some(value),
            _ => None,
        }
    }
}
