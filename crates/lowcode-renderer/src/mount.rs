//! Instance bookkeeping for rendered trees.
//!
//! Every committed [`VNode`] gets an instance slot. A slot survives a commit
//! when the new tree has a node with the same parent instance, key and
//! component identity; all other slots are freed and their handles go stale.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::component::ComponentId;
use crate::engine::{Arena, SlotId};
use crate::schema::SchemaNode;
use crate::vnode::VNode;

/// Opaque handle to a mounted component instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceHandle(SlotId);

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "instance-{}v{}", self.0.index, self.0.generation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    parent: Option<SlotId>,
    key: String,
    component: ComponentId,
    /// Position among earlier siblings sharing `key` and `component`.
    occurrence: usize,
}

#[derive(Debug)]
struct Instance {
    key: InstanceKey,
    name: String,
    cycle: u64,
}

#[derive(Debug, Default)]
pub struct CommitReport {
    pub mounted: usize,
    pub reused: usize,
    pub unmounted: usize,
    /// Nodes whose instance is reported to the embedder, in render order.
    pub reported: Vec<(Rc<SchemaNode>, InstanceHandle)>,
}

#[derive(Default)]
pub struct MountTree {
    instances: Arena<Instance>,
    index: HashMap<InstanceKey, SlotId>,
    occurrences: HashMap<InstanceKey, usize>,
    cycle: u64,
}

impl MountTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commit(&mut self, root: Option<&VNode>) -> CommitReport {
        self.cycle += 1;
        self.occurrences.clear();
        let mut report = CommitReport::default();
        if let Some(root) = root {
            self.visit(root, None, &mut report);
        }
        let stale: Vec<SlotId> = self
            .instances
            .iter()
            .filter(|(_, instance)| instance.cycle != self.cycle)
            .map(|(slot, _)| slot)
            .collect();
        for slot in stale {
            if let Some(instance) = self.instances.free(slot) {
                trace!(key = instance.key.key, name = instance.name, "instance unmounted");
                if self.index.get(&instance.key) == Some(&slot) {
                    self.index.remove(&instance.key);
                }
                report.unmounted += 1;
            }
        }
        report
    }

    fn visit(&mut self, node: &VNode, parent: Option<SlotId>, report: &mut CommitReport) {
        let mut key = InstanceKey {
            parent,
            key: node.key.clone(),
            component: node.identity(),
            occurrence: 0,
        };
        let seen = self.occurrences.entry(key.clone()).or_insert(0);
        key.occurrence = *seen;
        *seen += 1;
        if key.occurrence > 0 {
            warn!(key = node.key, name = node.name(), "duplicate sibling key");
        }
        let reusable = self
            .index
            .get(&key)
            .copied()
            .filter(|slot| self.instances.get(*slot).is_some_and(|instance| instance.cycle != self.cycle));
        let slot = match reusable {
            Some(slot) => {
                if let Some(instance) = self.instances.get_mut(slot) {
                    instance.cycle = self.cycle;
                }
                report.reused += 1;
                slot
            }
            None => {
                let slot = self.instances.alloc(Instance {
                    key: key.clone(),
                    name: node.name().to_string(),
                    cycle: self.cycle,
                });
                self.index.insert(key, slot);
                report.mounted += 1;
                slot
            }
        };
        if node.reports_instance {
            if let Some(schema) = &node.schema {
                report.reported.push((schema.clone(), InstanceHandle(slot)));
            }
        }
        for child in &node.children {
            self.visit(child, Some(slot), report);
        }
        for slot_content in node.slots.values() {
            for child in &slot_content.nodes {
                self.visit(child, Some(slot), report);
            }
        }
    }

    pub fn is_mounted(&self, handle: InstanceHandle) -> bool {
        self.instances.is_valid(handle.0)
    }

    /// Handles of instances mounted under `key`, in slot order.
    pub fn find(&self, key: &str) -> Vec<InstanceHandle> {
        self.instances
            .iter()
            .filter(|(_, instance)| instance.key.key == key)
            .map(|(slot, _)| InstanceHandle(slot))
            .collect()
    }

    pub fn name(&self, handle: InstanceHandle) -> Option<&str> {
        self.instances.get(handle.0).map(|instance| instance.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Unmounts everything.
    pub fn clear(&mut self) -> usize {
        let count = self.instances.len();
        self.instances.clear();
        self.index.clear();
        self.occurrences.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;

    fn tree(page: &Rc<Component>, child_keys: &[&str], text: &Rc<Component>) -> VNode {
        VNode::new("root", page.clone()).with_children(
            child_keys
                .iter()
                .map(|key| VNode::new(*key, text.clone()))
                .collect(),
        )
    }

    #[test]
    fn same_key_and_component_keep_their_instance() {
        let text = Component::plain("Text");
        let page = Component::plain("Page");
        let mut mount = MountTree::new();
        let first = VNode::new("root", page.clone()).with_children(vec![VNode::new("a", text.clone())]);
        let report = mount.commit(Some(&first));
        assert_eq!((report.mounted, report.reused), (2, 0));
        let a = mount.find("a")[0];

        let second = VNode::new("root", page).with_children(vec![
            VNode::new("a", text.clone()),
            VNode::new("b", text),
        ]);
        let report = mount.commit(Some(&second));
        assert_eq!((report.mounted, report.reused, report.unmounted), (1, 2, 0));
        assert_eq!(mount.find("a"), vec![a]);
        assert!(mount.is_mounted(a));
    }

    #[test]
    fn removed_or_retyped_nodes_are_unmounted() {
        let page = Component::plain("Page");
        let text = Component::plain("Text");
        let mut mount = MountTree::new();
        mount.commit(Some(&tree(&page, &["a", "b"], &text)));
        let b = mount.find("b")[0];

        let report = mount.commit(Some(&tree(&page, &["a"], &Component::plain("Text"))));
        assert_eq!(report.unmounted, 2, "root kept, `a` retyped, `b` removed");
        assert!(!mount.is_mounted(b));
        assert_eq!(mount.len(), 2);

        assert_eq!(mount.commit(None).unmounted, 2);
        assert!(mount.is_empty());
    }

    #[test]
    fn duplicate_sibling_keys_get_separate_instances() {
        let text = Component::plain("Text");
        let mut mount = MountTree::new();
        let report = mount.commit(Some(&tree(&Component::plain("Page"), &["a", "a"], &text)));
        assert_eq!(report.mounted, 3);
        assert_eq!(mount.find("a").len(), 2);
    }

    #[test]
    fn duplicate_sibling_keys_keep_their_instances() {
        let page = Component::plain("Page");
        let text = Component::plain("Text");
        let mut mount = MountTree::new();
        mount.commit(Some(&tree(&page, &["a", "a"], &text)));
        let first = mount.find("a");

        let report = mount.commit(Some(&tree(&page, &["a", "a"], &text)));
        assert_eq!((report.mounted, report.reused, report.unmounted), (0, 3, 0));
        assert_eq!(mount.find("a"), first);

        let report = mount.commit(Some(&tree(&page, &["a"], &text)));
        assert_eq!(report.unmounted, 1);
        assert_eq!(mount.find("a"), vec![first[0]]);
    }

    #[test]
    fn reporting_nodes_are_listed_every_cycle() {
        let mut node = VNode::new("leaf", Component::plain("Text"));
        node.schema = Some(Rc::new(SchemaNode::new("Text").with_id("leaf")));
        node.reports_instance = true;

        let mut mount = MountTree::new();
        let first = mount.commit(Some(&node)).reported;
        let second = mount.commit(Some(&node)).reported;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].1, second[0].1);
        assert_eq!(first[0].0.id.as_deref(), Some("leaf"));
    }
}
