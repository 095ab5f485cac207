//! Runtime scopes: immutable, nested name environments for expressions.
//!
//! A child scope extends its parent and may shadow names or bind `this`.
//! Frames are shared through `Rc` and never mutated after construction, so a
//! scope handed to a subtree cannot be changed by that subtree.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::{Object, Value};

#[derive(Debug, Default)]
struct ScopeFrame {
    parent: Option<RuntimeScope>,
    bindings: Object,
    this_value: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeScope(Rc<ScopeFrame>);

impl RuntimeScope {
    pub fn new(bindings: Object) -> Self {
        Self(Rc::new(ScopeFrame {
            parent: None,
            bindings,
            this_value: None,
        }))
    }

    /// Root scope from a JSON object; non-object JSON yields an empty scope.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match Value::from_json(json) {
            Value::Object(fields) => Self::new(fields.as_ref().clone()),
            _ => Self::default(),
        }
    }

    pub fn child(&self, bindings: Object) -> Self {
        Self(Rc::new(ScopeFrame {
            parent: Some(self.clone()),
            bindings,
            this_value: None,
        }))
    }

    pub fn child_with(&self, name: impl Into<String>, value: Value) -> Self {
        let mut bindings = IndexMap::new();
        bindings.insert(name.into(), value);
        self.child(bindings)
    }

    /// Child scope that binds `this` explicitly.
    pub fn with_this(&self, this_value: Value) -> Self {
        Self(Rc::new(ScopeFrame {
            parent: Some(self.clone()),
            bindings: Object::new(),
            this_value: Some(this_value),
        }))
    }

    /// Child scope for subtree bindings such as loop items or `state`.
    ///
    /// When an object is bound to `this`, the child also sees the bindings as
    /// fields of `this`, so expressions that must go through `this` reach them.
    pub fn extend(&self, bindings: Object) -> Self {
        let this_value = match self.this_value() {
            Some(Value::Object(fields)) => {
                let mut merged = fields.as_ref().clone();
                for (name, value) in &bindings {
                    merged.insert(name.clone(), value.clone());
                }
                Some(Value::Object(Rc::new(merged)))
            }
            _ => None,
        };
        Self(Rc::new(ScopeFrame {
            parent: Some(self.clone()),
            bindings,
            this_value,
        }))
    }

    /// Looks a name up through the chain; nearest frame wins.
    pub fn get(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(value) = scope.0.bindings.get(name) {
                return Some(value.clone());
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    /// Nearest explicit `this` binding.
    pub fn this_value(&self) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(scope) = frame {
            if let Some(value) = &scope.0.this_value {
                return Some(value.clone());
            }
            frame = scope.0.parent.as_ref();
        }
        None
    }

    /// Flattened bindings of the whole chain, outermost first, shadowed names
    /// taking the innermost value.
    pub fn to_object(&self) -> Object {
        let mut frames = Vec::new();
        let mut frame = Some(self);
        while let Some(scope) = frame {
            frames.push(&scope.0.bindings);
            frame = scope.0.parent.as_ref();
        }
        let mut flattened = Object::new();
        for bindings in frames.into_iter().rev() {
            for (name, value) in bindings {
                flattened.insert(name.clone(), value.clone());
            }
        }
        flattened
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
