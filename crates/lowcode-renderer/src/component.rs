//! Component descriptors and the name → component registry.
//!
//! A [`Component`] is what the renderer instantiates for a schema node. It
//! may be derived from a base component with extra options layered on top;
//! option lookup reads the component's own options first, then walks the
//! base chain.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

thread_local! {
    static NEXT_COMPONENT_ID: Cell<u64> = const { Cell::new(0) };
}

impl ComponentId {
    fn next() -> Self {
        NEXT_COMPONENT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Self(id)
        })
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinRenderer {
    Page,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeafMode {
    /// Design-time leaf with inspection hooks.
    Hoc,
    Live,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    /// Host-provided component rendered as a leaf.
    Plain,
    /// Renderer scaffolding; receives the internal contract props.
    Renderer(BuiltinRenderer),
    Leaf(LeafMode),
    Fragment,
}

pub struct Component {
    id: ComponentId,
    name: Rc<str>,
    kind: ComponentKind,
    options: IndexMap<String, Value>,
    base: Option<Rc<Component>>,
}

impl Component {
    pub fn new(name: impl Into<Rc<str>>, kind: ComponentKind) -> Self {
        Self {
            id: ComponentId::next(),
            name: name.into(),
            kind,
            options: IndexMap::new(),
            base: None,
        }
    }

    pub fn plain(name: impl Into<Rc<str>>) -> Rc<Self> {
        Rc::new(Self::new(name, ComponentKind::Plain))
    }

    pub fn with_option(mut self, name: impl Into<String>, value: Value) -> Self {
        self.options.insert(name.into(), value);
        self
    }

    /// A new component on top of `base`; `overrides` shadow the base options.
    pub fn derive(base: &Rc<Component>, overrides: IndexMap<String, Value>) -> Rc<Component> {
        Rc::new(Self {
            id: ComponentId::next(),
            name: base.name.clone(),
            kind: base.kind,
            options: overrides,
            base: Some(base.clone()),
        })
    }

    /// Descriptor from JSON: `{"kind": "plain" | "fragment", "options": {..}}`.
    /// Any other JSON yields a plain component without options.
    pub fn from_json(name: &str, json: &JsonValue) -> Result<Rc<Self>, serde_json::Error> {
        #[derive(Deserialize, Default)]
        #[serde(rename_all = "lowercase")]
        enum Kind {
            #[default]
            Plain,
            Fragment,
        }
        #[derive(Deserialize, Default)]
        struct Descriptor {
            #[serde(default)]
            kind: Kind,
            #[serde(default)]
            options: IndexMap<String, JsonValue>,
        }
        let descriptor = match json {
            JsonValue::Object(_) => Descriptor::deserialize(json)?,
            _ => Descriptor::default(),
        };
        let kind = match descriptor.kind {
            Kind::Plain => ComponentKind::Plain,
            Kind::Fragment => ComponentKind::Fragment,
        };
        let mut component = Self::new(name, kind);
        for (option, value) in &descriptor.options {
            component.options.insert(option.clone(), Value::from_json(value));
        }
        Ok(Rc::new(component))
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ComponentKind {
        self.kind
    }

    pub fn is_renderer(&self) -> bool {
        matches!(self.kind, ComponentKind::Renderer(_))
    }

    pub fn base(&self) -> Option<&Rc<Component>> {
        self.base.as_ref()
    }

    pub fn own_options(&self) -> &IndexMap<String, Value> {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<Value> {
        let mut component = Some(self);
        while let Some(current) = component {
            if let Some(value) = current.options.get(name) {
                return Some(value.clone());
            }
            component = current.base.as_deref();
        }
        None
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("options", &self.options.keys().collect::<Vec<_>>())
            .field("base", &self.base.as_ref().map(|base| base.id))
            .finish()
    }
}

/// Components by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct ComponentRegistry {
    components: IndexMap<String, Rc<Component>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, component: Rc<Component>) -> Self {
        self.insert(component);
        self
    }

    pub fn insert(&mut self, component: Rc<Component>) -> Option<Rc<Component>> {
        self.components.insert(component.name().to_string(), component)
    }

    /// Registers `component` under a name other than its own.
    pub fn insert_as(&mut self, name: impl Into<String>, component: Rc<Component>) {
        self.components.insert(name.into(), component);
    }

    pub fn get(&self, name: &str) -> Option<&Rc<Component>> {
        self.components.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Rc<Component>)> {
        self.components
            .iter()
            .map(|(name, component)| (name.as_str(), component))
    }

    /// `self` with `overrides` layered on top; `overrides` win on collisions.
    pub fn merged(&self, overrides: &ComponentRegistry) -> ComponentRegistry {
        let mut merged = self.clone();
        for (name, component) in &overrides.components {
            merged.components.insert(name.clone(), component.clone());
        }
        merged
    }

    /// Registry from a JSON object of name → descriptor (see [`Component::from_json`]).
    pub fn from_json(json: &JsonValue) -> Result<Self, serde_json::Error> {
        let mut registry = Self::new();
        if let JsonValue::Object(entries) = json {
            for (name, descriptor) in entries {
                registry.insert_as(name.clone(), Component::from_json(name, descriptor)?);
            }
        }
        Ok(registry)
    }

    /// Same names mapped to the same component identities.
    pub fn same_as(&self, other: &ComponentRegistry) -> bool {
        self.components.len() == other.components.len()
            && self
                .components
                .iter()
                .zip(&other.components)
                .all(|((a_name, a), (b_name, b))| a_name == b_name && Rc::ptr_eq(a, b))
    }
}
