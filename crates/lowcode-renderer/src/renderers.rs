//! Built-in renderers.
//!
//! A renderer node receives the internal contract props and renders its
//! schema's children into a container component. `PageRenderer` uses the
//! registered `Page`, else the built-in page container. `BlockRenderer` uses
//! the registered `Block`, else a fragment; a fragment has no element of its
//! own, so the renderer reports its own instance instead.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::component::{BuiltinRenderer, Component, ComponentKind};
use crate::config;
use crate::error::RenderError;
use crate::node_renderer::render_comp;
use crate::value::Object;
use crate::vnode::{RendererInternals, VNode};

pub struct RendererCall {
    pub key: String,
    pub component: Rc<Component>,
    pub props: Object,
    pub internals: Rc<RendererInternals>,
}

pub fn render(kind: BuiltinRenderer, call: RendererCall) -> Result<VNode, RenderError> {
    match kind {
        BuiltinRenderer::Page => page_renderer(call),
        BuiltinRenderer::Block => block_renderer(call),
    }
}

/// The children of the renderer's schema node, rendered in its scope.
pub fn render_children(internals: &RendererInternals) -> Result<Vec<VNode>, RenderError> {
    let env = internals.env();
    let mut children = Vec::new();
    for child in &internals.schema.children {
        children.extend(render_comp(&env, child, &internals.scope)?);
    }
    Ok(children)
}

fn page_renderer(call: RendererCall) -> Result<VNode, RenderError> {
    let page = container(&call.internals, "Page").unwrap_or_else(|| config::config().page());
    let content = VNode::new(call.key.clone(), page)
        .with_props(call.props.clone())
        .with_children(render_children(&call.internals)?);
    Ok(renderer_node(call, content, false))
}

fn block_renderer(call: RendererCall) -> Result<VNode, RenderError> {
    let block = container(&call.internals, "Block").unwrap_or_else(|| config::config().fragment());
    let is_fragment = block.kind() == ComponentKind::Fragment;
    let content = VNode::new(call.key.clone(), block)
        .with_props(call.props.clone())
        .with_children(render_children(&call.internals)?);
    Ok(renderer_node(call, content, is_fragment))
}

fn container(internals: &RendererInternals, name: &str) -> Option<Rc<Component>> {
    internals
        .components
        .get(name)
        .filter(|component| !component.is_renderer())
        .cloned()
}

fn renderer_node(call: RendererCall, content: VNode, reports_instance: bool) -> VNode {
    VNode {
        key: call.key,
        component: call.component,
        target: None,
        props: call.props,
        schema: Some(call.internals.schema.clone()),
        internals: Some(call.internals),
        children: vec![content],
        slots: IndexMap::new(),
        reports_instance,
    }
}
