//! The rendering context shared by every node of one render root.
//!
//! A render root builds one [`RendererContext`] and provides it for the
//! duration of a render pass; renderers read it back with
//! [`use_renderer_context`]. Each field is its own [`Signal`], so a change to
//! one field does not invalidate values derived from the others.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::component::{Component, ComponentRegistry, LeafMode};
use crate::config;
use crate::engine::{Computed, Observable, Scheduler, Signal, Subscription};
use crate::host::NodeHandle;
use crate::leaf::{Generation, LeafCache};
use crate::mount::InstanceHandle;
use crate::schema::SchemaNode;
use crate::value::Value;

pub type GetNode = Rc<dyn Fn(&str) -> Option<NodeHandle>>;
pub type OnCompGetCtx = Rc<dyn Fn(&SchemaNode, InstanceHandle)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesignMode {
    Design,
    #[default]
    Live,
}

impl DesignMode {
    pub fn leaf_mode(self) -> LeafMode {
        match self {
            Self::Design => LeafMode::Hoc,
            Self::Live => LeafMode::Live,
        }
    }
}

impl FromStr for DesignMode {
    type Err = String;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "design" => Ok(Self::Design),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown design mode `{other}`, expected `design` or `live`")),
        }
    }
}

impl fmt::Display for DesignMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Design => "design",
            Self::Live => "live",
        })
    }
}

/// Which components skip leaf wrapping: all of them, none, or the listed names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisableCompMock {
    All(bool),
    Names(Vec<String>),
}

impl Default for DisableCompMock {
    fn default() -> Self {
        Self::All(false)
    }
}

impl DisableCompMock {
    pub fn excludes(&self, name: &str) -> bool {
        match self {
            Self::All(disabled) => *disabled,
            Self::Names(names) => names.iter().any(|excluded| excluded == name),
        }
    }
}

static PUBLIC_OPTION: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z]+([A-Z][a-z]+)*$"));

/// Plain camelCase option names are public; everything else (`__file`,
/// `__scopeId`, `ssrRender2`) is private.
pub fn is_public_option(name: &str) -> bool {
    match &*PUBLIC_OPTION {
        Ok(pattern) => pattern.is_match(name),
        Err(_) => false,
    }
}

/// Private own options of `component`, in declaration order.
pub fn private_options(component: &Component) -> IndexMap<String, Value> {
    component
        .own_options()
        .iter()
        .filter(|(name, _)| !is_public_option(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

pub struct ContextInit {
    pub components: ComponentRegistry,
    pub design_mode: DesignMode,
    pub get_node: Option<GetNode>,
    pub disable_comp_mock: DisableCompMock,
}

struct ContextInner {
    components: Signal<ComponentRegistry>,
    design_mode: Signal<DesignMode>,
    get_node: Signal<Option<GetNode>>,
    disable_comp_mock: Signal<DisableCompMock>,
    merged_components: Computed<Rc<ComponentRegistry>>,
    leaf_cache: RefCell<LeafCache>,
    on_comp_get_ctx: RefCell<Option<OnCompGetCtx>>,
    rerender: RefCell<Option<Rc<dyn Fn()>>>,
}

#[derive(Clone)]
pub struct RendererContext(Rc<ContextInner>);

impl RendererContext {
    pub fn new(scheduler: &Scheduler, init: ContextInit) -> Self {
        let components = Signal::new(scheduler, init.components);
        let overrides = components.clone();
        let merged_components = Computed::new(
            vec![Rc::new(components.clone()) as Rc<dyn Observable>],
            move || Rc::new(overrides.with(|overrides| config::config().renderers().merged(overrides))),
        );
        Self(Rc::new(ContextInner {
            components,
            design_mode: Signal::new(scheduler, init.design_mode),
            get_node: Signal::new(scheduler, init.get_node),
            disable_comp_mock: Signal::new(scheduler, init.disable_comp_mock),
            merged_components,
            leaf_cache: RefCell::new(LeafCache::new()),
            on_comp_get_ctx: RefCell::new(None),
            rerender: RefCell::new(None),
        }))
    }

    /// Built-in renderers merged with the root's components.
    pub fn components(&self) -> Rc<ComponentRegistry> {
        self.0.merged_components.get()
    }

    pub fn component(&self, name: &str) -> Option<Rc<Component>> {
        self.components().get(name).cloned()
    }

    pub fn components_recomputations(&self) -> usize {
        self.0.merged_components.recomputations()
    }

    pub fn set_components(&self, components: ComponentRegistry) {
        self.0.components.set(components);
    }

    pub fn design_mode(&self) -> DesignMode {
        self.0.design_mode.get()
    }

    pub fn is_design_mode(&self) -> bool {
        self.design_mode() == DesignMode::Design
    }

    pub fn set_design_mode(&self, design_mode: DesignMode) {
        self.0.design_mode.set_if_changed(design_mode);
    }

    pub fn get_node(&self) -> Option<GetNode> {
        self.0.get_node.get()
    }

    pub fn set_get_node(&self, get_node: Option<GetNode>) {
        self.0.get_node.set(get_node);
    }

    pub fn disable_comp_mock(&self) -> DisableCompMock {
        self.0.disable_comp_mock.get()
    }

    pub fn set_disable_comp_mock(&self, policy: DisableCompMock) {
        self.0.disable_comp_mock.set_if_changed(policy);
    }

    pub fn needs_wrap(&self, name: &str) -> bool {
        !self.0.disable_comp_mock.with(|policy| policy.excludes(name))
    }

    /// Runs `listener` whenever any context field changes.
    pub fn observe(&self, listener: impl Fn() + Clone + 'static) -> Vec<Subscription> {
        vec![
            self.0.components.subscribe(listener.clone()),
            self.0.design_mode.subscribe(listener.clone()),
            self.0.get_node.subscribe(listener.clone()),
            self.0.disable_comp_mock.subscribe(listener),
        ]
    }

    /// Leaf to mount for a component named `name` whose descriptor is `source`.
    ///
    /// Returns `leaf` itself when the policy excludes `name` or `source` has no
    /// private options, otherwise a component derived from `leaf` carrying
    /// those options. The result for a `(leaf, source)` pair is cached.
    ///
    /// # Panics
    ///
    /// When called after the owning root unmounted.
    pub fn wrap_leaf_comp(&self, name: &str, source: &Rc<Component>, leaf: &Rc<Component>) -> Rc<Component> {
        let wrap = self.needs_wrap(name);
        let mut cache = self.0.leaf_cache.borrow_mut();
        if cache.is_retired() {
            panic!(
                "wrap_leaf_comp(`{name}`) on render root generation {} after it unmounted",
                cache.generation()
            );
        }
        cache.get_or_insert_with(leaf, source, wrap, || {
            if !wrap {
                return leaf.clone();
            }
            let private = private_options(source);
            if private.is_empty() {
                leaf.clone()
            } else {
                debug!(name, private = private.len(), "derived leaf");
                Component::derive(leaf, private)
            }
        })
    }

    pub fn generation(&self) -> Generation {
        self.0.leaf_cache.borrow().generation()
    }

    pub fn leaf_cache_len(&self) -> usize {
        self.0.leaf_cache.borrow().len()
    }

    pub fn purge_leaf_cache(&self) -> usize {
        self.0.leaf_cache.borrow_mut().purge_dead()
    }

    pub(crate) fn retire(&self) -> usize {
        self.0.leaf_cache.borrow_mut().retire()
    }

    pub fn set_on_comp_get_ctx(&self, callback: Option<OnCompGetCtx>) {
        *self.0.on_comp_get_ctx.borrow_mut() = callback;
    }

    /// Reports a mounted instance to the embedder.
    pub fn trigger_comp_get_ctx(&self, schema: &SchemaNode, instance: InstanceHandle) {
        let callback = self.0.on_comp_get_ctx.borrow().clone();
        if let Some(callback) = callback {
            callback(schema, instance);
        }
    }

    pub(crate) fn set_rerender(&self, rerender: Rc<dyn Fn()>) {
        *self.0.rerender.borrow_mut() = Some(rerender);
    }

    /// Requests a debounced schema refresh from the host document.
    pub fn rerender(&self) {
        let rerender = self.0.rerender.borrow().clone();
        if let Some(rerender) = rerender {
            rerender();
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RendererContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererContext")
            .field("design_mode", &self.design_mode())
            .field("disable_comp_mock", &self.disable_comp_mock())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static PROVIDED: RefCell<Vec<RendererContext>> = const { RefCell::new(Vec::new()) };
}

struct ProvideGuard;

impl Drop for ProvideGuard {
    fn drop(&mut self) {
        PROVIDED.with(|provided| {
            provided.borrow_mut().pop();
        });
    }
}

/// Makes `context` visible to [`use_renderer_context`] while `body` runs.
pub fn provide<R>(context: &RendererContext, body: impl FnOnce() -> R) -> R {
    PROVIDED.with(|provided| provided.borrow_mut().push(context.clone()));
    let _guard = ProvideGuard;
    body()
}

pub fn try_use_renderer_context() -> Option<RendererContext> {
    PROVIDED.with(|provided| provided.borrow().last().cloned())
}

/// The innermost provided context.
///
/// # Panics
///
/// Outside of [`provide`]; rendering without a root is a programming error.
pub fn use_renderer_context() -> RendererContext {
    match try_use_renderer_context() {
        Some(context) => context,
        None => panic!("use_renderer_context called outside of a render root"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TestClock;

    fn context(disable_comp_mock: DisableCompMock) -> RendererContext {
        let scheduler = Scheduler::new(Rc::new(TestClock::new()));
        RendererContext::new(
            &scheduler,
            ContextInit {
                components: ComponentRegistry::new(),
                design_mode: DesignMode::Live,
                get_node: None,
                disable_comp_mock,
            },
        )
    }

    fn scoped_component(name: &str) -> Rc<Component> {
        Rc::new(
            Component::new(name, crate::component::ComponentKind::Plain)
                .with_option("props", Value::list([]))
                .with_option("__scopeId", Value::text("data-v-7")),
        )
    }

    #[test]
    fn option_names_split_on_plain_camel_case() {
        assert!(is_public_option("props"));
        assert!(is_public_option("inheritAttrs"));
        assert!(!is_public_option("__scopeId"));
        assert!(!is_public_option("ssrRender2"));
        assert!(!is_public_option("Name"));
        assert!(!is_public_option(""));
    }

    #[test]
    fn wrapping_carries_only_private_options() {
        let context = context(DisableCompMock::default());
        let leaf = config::config().leaf(LeafMode::Live);
        let source = scoped_component("Button");

        let derived = context.wrap_leaf_comp("Button", &source, &leaf);
        assert!(!Rc::ptr_eq(&derived, &leaf));
        assert!(Rc::ptr_eq(derived.base().unwrap(), &leaf));
        assert_eq!(derived.own_options().len(), 1);
        assert_eq!(derived.option("__scopeId"), Some(Value::text("data-v-7")));
        assert!(Rc::ptr_eq(&context.wrap_leaf_comp("Button", &source, &leaf), &derived));
    }

    #[test]
    fn sources_without_private_options_keep_the_leaf() {
        let context = context(DisableCompMock::default());
        let leaf = config::config().leaf(LeafMode::Live);
        let source = Component::plain("Text");
        assert!(Rc::ptr_eq(&context.wrap_leaf_comp("Text", &source, &leaf), &leaf));
    }

    #[test]
    fn field_changes_do_not_recompute_components() {
        let context = context(DisableCompMock::default());
        context.components();
        context.set_design_mode(DesignMode::Design);
        context.set_disable_comp_mock(DisableCompMock::All(true));
        context.components();
        assert_eq!(context.components_recomputations(), 1);

        context.set_components(ComponentRegistry::new().with(Component::plain("Text")));
        assert!(context.component("Text").is_some());
        assert_eq!(context.components_recomputations(), 2);
    }

    #[test]
    fn provided_context_is_visible_only_inside() {
        let context = context(DisableCompMock::default());
        assert!(try_use_renderer_context().is_none());
        let seen = provide(&context, use_renderer_context);
        assert!(seen.ptr_eq(&context));
        assert!(try_use_renderer_context().is_none());
    }

    #[test]
    #[should_panic(expected = "outside of a render root")]
    fn reading_context_without_a_root_panics() {
        use_renderer_context();
    }
}
