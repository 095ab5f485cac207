//! The host document: the editor-side owner of the authoritative schema.
//!
//! The renderer only needs node lookup, schema export and a place to report
//! mounted instances. [`MemoryDocument`] is an in-process host used by the
//! CLI and tests.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::debug;
use ulid::Ulid;

use crate::context::GetNode;
use crate::error::DocumentError;
use crate::mount::InstanceHandle;
use crate::schema::{PropValue, SchemaNode};

/// A node of the host document.
pub trait NodeModel {
    fn id(&self) -> &str;
    /// Fresh snapshot of the node's subtree, or `None` when the host cannot
    /// produce one.
    fn export_schema(&self) -> Option<SchemaNode>;
}

#[derive(Clone)]
pub struct NodeHandle(Rc<dyn NodeModel>);

impl NodeHandle {
    pub fn new(model: impl NodeModel + 'static) -> Self {
        Self(Rc::new(model))
    }

    pub fn id(&self) -> &str {
        self.0.id()
    }

    pub fn export_schema(&self) -> Option<SchemaNode> {
        self.0.export_schema()
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NodeHandle").field(&self.id()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeListenerId(u64);

pub trait DocumentHost {
    fn get_node(&self, id: &str) -> Option<NodeHandle>;
    fn mount_instance(&self, id: &str, instance: InstanceHandle);
    /// Registers a listener called with the id of every changed node.
    fn on_node_change(&self, listener: Rc<dyn Fn(&str)>) -> ChangeListenerId;
    fn off_node_change(&self, listener: ChangeListenerId);
}

struct DocumentState {
    root: SchemaNode,
    listeners: Vec<(ChangeListenerId, Rc<dyn Fn(&str)>)>,
    next_listener: u64,
    instances: IndexMap<String, InstanceHandle>,
    mount_calls: usize,
    exports: usize,
    export_enabled: bool,
}

/// In-memory host document.
#[derive(Clone)]
pub struct MemoryDocument(Rc<RefCell<DocumentState>>);

impl MemoryDocument {
    /// Takes ownership of `root`, giving every node without `id` and
    /// `__ctx` a fresh ULID.
    pub fn new(mut root: SchemaNode) -> Self {
        assign_ids(&mut root);
        Self(Rc::new(RefCell::new(DocumentState {
            root,
            listeners: Vec::new(),
            next_listener: 0,
            instances: IndexMap::new(),
            mount_calls: 0,
            exports: 0,
            export_enabled: true,
        })))
    }

    pub fn from_json(json: &JsonValue) -> Result<Self, DocumentError> {
        Ok(Self::new(SchemaNode::from_json(json)?))
    }

    pub fn root(&self) -> SchemaNode {
        self.0.borrow().root.clone()
    }

    pub fn root_id(&self) -> Option<String> {
        self.0.borrow().root.id.clone()
    }

    pub fn node(&self, id: &str) -> Option<SchemaNode> {
        self.0.borrow().root.find(id)
    }

    /// Edits a node in place and notifies change listeners.
    pub fn update_node(&self, id: &str, edit: impl FnOnce(&mut SchemaNode)) -> Result<(), DocumentError> {
        {
            let mut state = self.0.borrow_mut();
            let node = find_mut(&mut state.root, id).ok_or_else(|| DocumentError::NodeNotFound(id.to_string()))?;
            edit(node);
            for child in &mut node.children {
                assign_ids(child);
            }
        }
        debug!(id, "document node changed");
        self.notify(id);
        Ok(())
    }

    pub fn set_prop(&self, id: &str, prop: &str, value: JsonValue) -> Result<(), DocumentError> {
        self.update_node(id, |node| {
            node.props.insert(prop.to_string(), value);
        })
    }

    fn notify(&self, id: &str) {
        let listeners: Vec<_> = self
            .0
            .borrow()
            .listeners
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(id);
        }
    }

    /// When disabled, exports return `None`.
    pub fn set_export_enabled(&self, enabled: bool) {
        self.0.borrow_mut().export_enabled = enabled;
    }

    pub fn exports(&self) -> usize {
        self.0.borrow().exports
    }

    pub fn instance(&self, id: &str) -> Option<InstanceHandle> {
        self.0.borrow().instances.get(id).copied()
    }

    pub fn mount_calls(&self) -> usize {
        self.0.borrow().mount_calls
    }

    /// `get_node` callback for [`crate::RendererProps`].
    pub fn get_node_fn(&self) -> GetNode {
        let document = Rc::downgrade(&self.0);
        Rc::new(move |id: &str| {
            let document = document.upgrade()?;
            let exists = document.borrow().root.find(id).is_some();
            exists.then(|| {
                NodeHandle::new(MemoryNode {
                    id: id.to_string(),
                    document: Rc::downgrade(&document),
                })
            })
        })
    }
}

impl DocumentHost for MemoryDocument {
    fn get_node(&self, id: &str) -> Option<NodeHandle> {
        (self.get_node_fn())(id)
    }

    fn mount_instance(&self, id: &str, instance: InstanceHandle) {
        let mut state = self.0.borrow_mut();
        state.mount_calls += 1;
        state.instances.insert(id.to_string(), instance);
    }

    fn on_node_change(&self, listener: Rc<dyn Fn(&str)>) -> ChangeListenerId {
        let mut state = self.0.borrow_mut();
        let id = ChangeListenerId(state.next_listener);
        state.next_listener += 1;
        state.listeners.push((id, listener));
        id
    }

    fn off_node_change(&self, listener: ChangeListenerId) {
        self.0
            .borrow_mut()
            .listeners
            .retain(|(id, _)| *id != listener);
    }
}

struct MemoryNode {
    id: String,
    document: Weak<RefCell<DocumentState>>,
}

impl NodeModel for MemoryNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn export_schema(&self) -> Option<SchemaNode> {
        let document = self.document.upgrade()?;
        let mut state = document.borrow_mut();
        state.exports += 1;
        if !state.export_enabled {
            return None;
        }
        state.root.find(&self.id)
    }
}

fn find_mut<'a>(node: &'a mut SchemaNode, id: &str) -> Option<&'a mut SchemaNode> {
    if node.id.as_deref() == Some(id) {
        return Some(node);
    }
    node.children.iter_mut().find_map(|child| find_mut(child, id))
}

fn assign_ids(node: &mut SchemaNode) {
    if node.id.is_none() && node.ctx.is_none() {
        node.id = Some(Ulid::new().to_string());
    }
    for child in &mut node.children {
        assign_ids(child);
    }
    for value in node.props.values_mut() {
        if matches!(PropValue::classify(value), PropValue::Slot(_)) {
            if let Some(content) = value.get_mut("value") {
                assign_slot_ids(content);
            }
        }
    }
}

fn assign_slot_ids(content: &mut JsonValue) {
    match content {
        JsonValue::Array(nodes) => nodes.iter_mut().for_each(assign_slot_ids),
        JsonValue::Object(node) if node.contains_key("componentName") => {
            if !node.contains_key("id") && !node.contains_key("__ctx") {
                node.insert("id".to_string(), JsonValue::String(Ulid::new().to_string()));
            }
            if let Some(children) = node.get_mut("children") {
                assign_slot_ids(children);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> MemoryDocument {
        MemoryDocument::from_json(&json!({
            "id": "page",
            "componentName": "Page",
            "children": [
                { "componentName": "Text", "props": { "content": "a" } },
                { "componentName": "Text", "__ctx": { "lceKey": "k", "idx": 1 } },
                { "componentName": "Table", "props": { "cell": {
                    "type": "JSSlot",
                    "value": [{ "componentName": "Text" }]
                } } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn nodes_without_a_key_get_ulids() {
        let root = document().root();
        let generated = root.children[0].id.as_deref().unwrap();
        assert!(Ulid::from_string(generated).is_ok());
        assert!(root.children[1].id.is_none(), "`__ctx` already keys the node");

        let slot = &root.children[2].slots().unwrap()[0];
        assert!(slot.nodes[0].id.is_some());
    }

    #[test]
    fn edits_notify_listeners() {
        let document = document();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let listener = document.on_node_change(Rc::new(move |id: &str| sink.borrow_mut().push(id.to_string())));

        document.set_prop("page", "title", json!("new")).unwrap();
        assert_eq!(*seen.borrow(), ["page"]);
        assert_eq!(document.node("page").unwrap().props["title"], json!("new"));

        document.off_node_change(listener);
        document.set_prop("page", "title", json!("newer")).unwrap();
        assert_eq!(seen.borrow().len(), 1);
        assert!(matches!(
            document.set_prop("missing", "title", json!(1)),
            Err(DocumentError::NodeNotFound(_))
        ));
    }

    #[test]
    fn exports_go_through_node_handles() {
        let document = document();
        let node = document.get_node("page").unwrap();
        assert_eq!(node.export_schema().unwrap().component_name, "Page");

        document.set_export_enabled(false);
        assert!(node.export_schema().is_none());
        assert_eq!(document.exports(), 2);
        assert!(document.get_node("missing").is_none());
    }
}
