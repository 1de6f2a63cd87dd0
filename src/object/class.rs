use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The capability every node class carries implicitly. Synthesized proxies
/// strip this one from the capability set they present.
pub const BASE_CAPABILITY: &str = "object";

/// The capability that marks a class as façade-shaped.
pub const FACADE_CAPABILITY: &str = "facade";

/// The kind of value a declared structural feature holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    String,
    Bool,
    Int,
    Float,
    Ref,
    RefList,
}

/// A typed structural feature declared by a class.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureDescriptor {
    pub name: String,
    pub kind: ValueKind,
}

/// Static metadata for one node class: its superclass, the capabilities it
/// presents, and the structural features it declares.
#[derive(Debug, Clone)]
pub struct ClassDescriptor {
    name: String,
    superclass: Option<String>,
    capabilities: Vec<String>,
    features: HashMap<String, FeatureDescriptor>,
}

impl ClassDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            capabilities: Vec::new(),
            features: HashMap::new(),
        }
    }

    pub fn superclass(self, superclass: impl Into<String>) -> Self {
        Self {
            superclass: Some(superclass.into()),
            ..self
        }
    }

    pub fn capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn feature(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        self.features.insert(
            name.clone(),
            FeatureDescriptor { name, kind },
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of class descriptors with single inheritance. Built once when the
/// embedding domain is set up, then shared immutably.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: HashMap<String, ClassDescriptor>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: ClassDescriptor) {
        self.classes.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&ClassDescriptor> {
        self.classes.get(name)
    }

    /// Whether `class` is `ancestor` or inherits from it.
    pub fn is_a(&self, class: &str, ancestor: &str) -> bool {
        let mut current = Some(class);

        while let Some(name) = current {
            if name == ancestor {
                return true;
            }

            current = self
                .classes
                .get(name)
                .and_then(|descriptor| descriptor.superclass.as_deref());
        }

        false
    }

    /// All capabilities presented by a class, root-most classes first.
    pub fn capabilities(&self, class: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(class);

        while let Some(name) = current {
            chain.push(name);
            current = self
                .classes
                .get(name)
                .and_then(|descriptor| descriptor.superclass.as_deref());
        }

        let mut capabilities = Vec::new();
        for name in chain.into_iter().rev() {
            if let Some(descriptor) = self.classes.get(name) {
                for capability in &descriptor.capabilities {
                    if !capabilities.contains(capability) {
                        capabilities.push(capability.clone());
                    }
                }
            }
        }

        capabilities
    }

    /// Looks up a feature declared by a class or inherited from an ancestor.
    pub fn feature(&self, class: &str, feature: &str) -> Option<&FeatureDescriptor> {
        let mut current = Some(class);

        while let Some(name) = current {
            let descriptor = self.classes.get(name)?;

            if let Some(found) = descriptor.features.get(feature) {
                return Some(found);
            }

            current = descriptor.superclass.as_deref();
        }

        None
    }
}
