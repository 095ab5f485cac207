//! Global renderer configuration.
//!
//! Holds the built-in renderer components, the fallback containers they use,
//! the design and live leaves, an optional config-provider component and the
//! rerender debounce delay. The configuration is per thread; components are
//! created once so their identities stay stable for the life of the thread.

use std::cell::RefCell;
use std::rc::Rc;

use crate::component::{BuiltinRenderer, Component, ComponentKind, ComponentRegistry, LeafMode};
use crate::value::Value;

pub const PAGE_RENDERER: &str = "PageRenderer";
pub const BLOCK_RENDERER: &str = "BlockRenderer";

#[derive(Debug, Clone)]
pub struct RendererConfig {
    renderers: ComponentRegistry,
    page: Rc<Component>,
    fragment: Rc<Component>,
    hoc: Rc<Component>,
    live: Rc<Component>,
    config_provider: Option<Rc<Component>>,
    rerender_delay_ms: u64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let renderers = ComponentRegistry::new()
            .with(Rc::new(Component::new(
                PAGE_RENDERER,
                ComponentKind::Renderer(BuiltinRenderer::Page),
            )))
            .with(Rc::new(Component::new(
                BLOCK_RENDERER,
                ComponentKind::Renderer(BuiltinRenderer::Block),
            )));
        Self {
            renderers,
            page: Rc::new(
                Component::new("Page", ComponentKind::Plain)
                    .with_option("tag", Value::text("div"))
                    .with_option("class", Value::text("lc-page")),
            ),
            fragment: Rc::new(Component::new("Fragment", ComponentKind::Fragment)),
            hoc: Rc::new(Component::new("Hoc", ComponentKind::Leaf(LeafMode::Hoc))),
            live: Rc::new(Component::new("Live", ComponentKind::Leaf(LeafMode::Live))),
            config_provider: None,
            rerender_delay_ms: 0,
        }
    }
}

impl RendererConfig {
    pub fn renderers(&self) -> &ComponentRegistry {
        &self.renderers
    }

    pub fn renderer(&self, name: &str) -> Option<Rc<Component>> {
        self.renderers.get(name).cloned()
    }

    /// Container `PageRenderer` falls back to when no `Page` is registered.
    pub fn page(&self) -> Rc<Component> {
        self.page.clone()
    }

    pub fn fragment(&self) -> Rc<Component> {
        self.fragment.clone()
    }

    pub fn leaf(&self, mode: LeafMode) -> Rc<Component> {
        match mode {
            LeafMode::Hoc => self.hoc.clone(),
            LeafMode::Live => self.live.clone(),
        }
    }

    pub fn config_provider(&self) -> Option<Rc<Component>> {
        self.config_provider.clone()
    }

    pub fn rerender_delay_ms(&self) -> u64 {
        self.rerender_delay_ms
    }
}

thread_local! {
    static CONFIG: RefCell<RendererConfig> = RefCell::new(RendererConfig::default());
}

/// Snapshot of the current configuration.
pub fn config() -> RendererConfig {
    CONFIG.with(|config| config.borrow().clone())
}

pub fn set_config_provider(provider: Option<Rc<Component>>) {
    CONFIG.with(|config| config.borrow_mut().config_provider = provider);
}

pub fn set_rerender_delay_ms(delay_ms: u64) {
    CONFIG.with(|config| config.borrow_mut().rerender_delay_ms = delay_ms);
}

/// Replaces (or adds) a renderer. The component must be renderer-tagged.
pub fn set_renderer(renderer: Rc<Component>) -> bool {
    if !renderer.is_renderer() {
        return false;
    }
    CONFIG.with(|config| config.borrow_mut().renderers.insert(renderer));
    true
}
