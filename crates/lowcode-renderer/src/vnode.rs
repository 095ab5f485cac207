//! Rendered output: a tree of component nodes with resolved props.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue, json};

use crate::component::{Component, ComponentId, ComponentRegistry};
use crate::context::{DesignMode, GetNode, OnCompGetCtx};
use crate::i18n::Messages;
use crate::mount::InstanceHandle;
use crate::parser::SchemaParser;
use crate::schema::SchemaNode;
use crate::scope::RuntimeScope;
use crate::value::{Object, Value};

/// Props every renderer node receives in addition to its user-facing props.
/// Kept apart from [`VNode::props`] so they can never collide with a schema
/// prop of the same name.
#[derive(Clone)]
pub struct RendererInternals {
    pub parser: SchemaParser,
    pub scope: RuntimeScope,
    pub schema: Rc<SchemaNode>,
    pub locale: Option<Rc<str>>,
    pub messages: Rc<Messages>,
    pub components: Rc<ComponentRegistry>,
    pub design_mode: DesignMode,
    pub this_required_in_jse: bool,
    pub get_node: Option<GetNode>,
    pub trigger_comp_get_ctx: OnCompGetCtx,
}

impl RendererInternals {
    pub fn trigger_comp_get_ctx(&self, schema: &SchemaNode, instance: InstanceHandle) {
        (self.trigger_comp_get_ctx)(schema, instance);
    }
}

impl fmt::Debug for RendererInternals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererInternals")
            .field("schema", &self.schema.component_name)
            .field("locale", &self.locale)
            .field("design_mode", &self.design_mode)
            .field("this_required_in_jse", &self.this_required_in_jse)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub params: Vec<String>,
    pub nodes: Vec<VNode>,
}

#[derive(Debug, Clone)]
pub struct VNode {
    pub key: String,
    /// What gets mounted: a renderer, a container or a (wrapped) leaf.
    pub component: Rc<Component>,
    /// The registered component a leaf stands in for.
    pub target: Option<Rc<Component>>,
    pub props: Object,
    pub internals: Option<Rc<RendererInternals>>,
    pub children: Vec<VNode>,
    pub slots: IndexMap<String, Slot>,
    pub schema: Option<Rc<SchemaNode>>,
    /// Whether the mount pass reports this node's instance to the embedder.
    pub reports_instance: bool,
}

impl VNode {
    pub fn new(key: impl Into<String>, component: Rc<Component>) -> Self {
        Self {
            key: key.into(),
            component,
            target: None,
            props: Object::new(),
            internals: None,
            children: Vec::new(),
            slots: IndexMap::new(),
            schema: None,
            reports_instance: false,
        }
    }

    pub fn with_props(mut self, props: Object) -> Self {
        self.props = props;
        self
    }

    pub fn with_children(mut self, children: Vec<VNode>) -> Self {
        self.children = children;
        self
    }

    /// The component whose identity decides instance reuse.
    pub fn identity(&self) -> ComponentId {
        self.target
            .as_ref()
            .map_or_else(|| self.component.id(), |target| target.id())
    }

    pub fn name(&self) -> &str {
        self.target
            .as_ref()
            .map_or_else(|| self.component.name(), |target| target.name())
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.props.get(name)
    }

    pub fn is_renderer(&self) -> bool {
        self.internals.is_some()
    }

    /// Depth-first search by key through children and slots.
    pub fn find(&self, key: &str) -> Option<&VNode> {
        if self.key == key {
            return Some(self);
        }
        self.children
            .iter()
            .chain(self.slots.values().flat_map(|slot| slot.nodes.iter()))
            .find_map(|child| child.find(key))
    }

    pub fn to_json(&self) -> JsonValue {
        let mut node = Map::new();
        node.insert("key".to_string(), json!(self.key));
        node.insert("component".to_string(), json!(self.component.name()));
        if let Some(target) = &self.target {
            node.insert("target".to_string(), json!(target.name()));
        }
        if self.is_renderer() {
            node.insert("renderer".to_string(), json!(true));
        }
        if !self.props.is_empty() {
            node.insert("props".to_string(), Value::Object(Rc::new(self.props.clone())).to_json());
        }
        if !self.children.is_empty() {
            node.insert(
                "children".to_string(),
                JsonValue::Array(self.children.iter().map(Self::to_json).collect()),
            );
        }
        if !self.slots.is_empty() {
            let slots = self
                .slots
                .iter()
                .map(|(name, slot)| {
                    (
                        name.clone(),
                        json!({
                            "params": slot.params,
                            "nodes": slot.nodes.iter().map(Self::to_json).collect::<Vec<_>>(),
                        }),
                    )
                })
                .collect::<Map<_, _>>();
            node.insert("slots".to_string(), JsonValue::Object(slots));
        }
        JsonValue::Object(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentKind;

    #[test]
    fn leaf_identity_is_its_target() {
        let live = Rc::new(Component::new("Live", ComponentKind::Leaf(crate::component::LeafMode::Live)));
        let button = Component::plain("Button");
        let mut node = VNode::new("btn", live.clone());
        assert_eq!(node.identity(), live.id());

        node.target = Some(button.clone());
        assert_eq!(node.identity(), button.id());
        assert_eq!(node.name(), "Button");
    }

    #[test]
    fn json_omits_empty_parts() {
        let text = Component::plain("Text");
        let node = VNode::new("root", Component::plain("Page")).with_children(vec![
            VNode::new("t1", text).with_props(IndexMap::from([("content".to_string(), Value::text("hi"))])),
        ]);

        assert_eq!(
            node.to_json(),
            json!({
                "key": "root",
                "component": "Page",
                "children": [{ "key": "t1", "component": "Text", "props": { "content": "hi" } }]
            })
        );
        assert!(node.find("t1").is_some());
        assert!(node.find("t2").is_none());
    }
}
