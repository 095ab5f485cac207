//! Render roots: one independently mounted schema renderer.
//!
//! A [`RenderRoot`] owns its inputs as signals, a [`RendererContext`], a
//! parser module, a mount tree and a [`RerenderController`]. Any input change
//! schedules one re-render for the next notification round; several changes
//! in the same round still render once.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::component::{Component, ComponentRegistry};
use crate::config;
use crate::context::{
    ContextInit, DesignMode, DisableCompMock, GetNode, OnCompGetCtx, RendererContext, provide,
};
use crate::engine::{Computed, Observable, Scheduler, Signal, SourceId, Subscription};
use crate::error::RenderError;
use crate::host::{ChangeListenerId, DocumentHost};
use crate::i18n::{Messages, i18n_function};
use crate::leaf::Generation;
use crate::mount::{InstanceHandle, MountTree};
use crate::node_renderer::{RenderEnv, RenderRequest, render_content};
use crate::parser::{ModuleRegistry, RootId, SchemaParser, SchemaParserOptions};
use crate::rerender::RerenderController;
use crate::schema::SchemaNode;
use crate::scope::RuntimeScope;
use crate::value::{Object, Value};
use crate::vnode::VNode;

/// Everything a render root is mounted with.
pub struct RendererProps {
    pub schema: SchemaNode,
    pub components: ComponentRegistry,
    pub scope: Option<RuntimeScope>,
    pub pass_props: Object,
    pub design_mode: DesignMode,
    pub device: Option<String>,
    pub locale: Option<String>,
    pub messages: Messages,
    pub get_node: Option<GetNode>,
    pub on_comp_get_ctx: Option<OnCompGetCtx>,
    pub this_required_in_jse: bool,
    pub disable_comp_mock: DisableCompMock,
    pub fallback: Option<Rc<Component>>,
}

impl RendererProps {
    pub fn new(schema: SchemaNode, components: ComponentRegistry) -> Self {
        Self {
            schema,
            components,
            scope: None,
            pass_props: Object::new(),
            design_mode: DesignMode::Live,
            device: None,
            locale: None,
            messages: Messages::new(),
            get_node: None,
            on_comp_get_ctx: None,
            this_required_in_jse: true,
            disable_comp_mock: DisableCompMock::default(),
            fallback: None,
        }
    }

    pub fn with_scope(mut self, scope: RuntimeScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_pass_props(mut self, pass_props: Object) -> Self {
        self.pass_props = pass_props;
        self
    }

    pub fn with_design_mode(mut self, design_mode: DesignMode) -> Self {
        self.design_mode = design_mode;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_messages(mut self, messages: Messages) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_get_node(mut self, get_node: GetNode) -> Self {
        self.get_node = Some(get_node);
        self
    }

    pub fn with_on_comp_get_ctx(mut self, callback: impl Fn(&SchemaNode, InstanceHandle) + 'static) -> Self {
        self.on_comp_get_ctx = Some(Rc::new(callback));
        self
    }

    pub fn with_this_required_in_jse(mut self, this_required: bool) -> Self {
        self.this_required_in_jse = this_required;
        self
    }

    pub fn with_disable_comp_mock(mut self, policy: DisableCompMock) -> Self {
        self.disable_comp_mock = policy;
        self
    }

    pub fn with_fallback(mut self, fallback: Rc<Component>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

struct AttachedDocument {
    host: Rc<dyn DocumentHost>,
    listener: ChangeListenerId,
}

struct RootInner {
    root_id: RootId,
    scheduler: Scheduler,
    schema: Signal<Rc<SchemaNode>>,
    scope: Signal<RuntimeScope>,
    pass_props: Signal<Object>,
    device: Signal<Option<Rc<str>>>,
    locale: Signal<Option<Rc<str>>>,
    messages: Signal<Rc<Messages>>,
    this_required: Signal<bool>,
    runtime_scope: Computed<RuntimeScope>,
    fallback: Option<Rc<Component>>,
    context: RendererContext,
    on_comp_get_ctx: RefCell<Option<OnCompGetCtx>>,
    rerender: RerenderController,
    tree: RefCell<Option<VNode>>,
    mount: RefCell<MountTree>,
    last_error: RefCell<Option<RenderError>>,
    render_source: SourceId,
    subscriptions: RefCell<Vec<Subscription>>,
    document: RefCell<Option<AttachedDocument>>,
    renders: Cell<usize>,
    propagations: Cell<usize>,
    unmounted: Cell<bool>,
}

impl Drop for RootInner {
    fn drop(&mut self) {
        if !self.unmounted.get() {
            self.context.retire();
            ModuleRegistry::release(self.root_id);
            self.scheduler.release_source(self.render_source);
        }
    }
}

#[derive(Clone)]
pub struct RenderRoot(Rc<RootInner>);

impl RenderRoot {
    /// Builds the root and renders it once.
    pub fn mount(scheduler: &Scheduler, props: RendererProps) -> Result<Self, RenderError> {
        let context = RendererContext::new(
            scheduler,
            ContextInit {
                components: props.components,
                design_mode: props.design_mode,
                get_node: props.get_node,
                disable_comp_mock: props.disable_comp_mock,
            },
        );
        context.set_on_comp_get_ctx(props.on_comp_get_ctx.clone());

        let schema = Signal::new(scheduler, Rc::new(props.schema));
        let scope = Signal::new(scheduler, props.scope.unwrap_or_default());
        let locale = Signal::new(scheduler, props.locale.map(Rc::from));
        let messages = Signal::new(scheduler, Rc::new(props.messages));
        let runtime_scope = {
            let (scope, locale, messages) = (scope.clone(), locale.clone(), messages.clone());
            Computed::new(
                vec![
                    Rc::new(scope.clone()) as Rc<dyn Observable>,
                    Rc::new(locale.clone()) as Rc<dyn Observable>,
                    Rc::new(messages.clone()) as Rc<dyn Observable>,
                ],
                move || {
                    let i18n = i18n_function(locale.get(), messages.get());
                    let base = scope.get();
                    // Expressions read the root scope through `this` unless the caller bound one.
                    let base = match base.this_value() {
                        Some(_) => base,
                        None => base.with_this(Value::Object(Rc::new(base.to_object()))),
                    };
                    base.extend(IndexMap::from([("i18n".to_string(), i18n)]))
                },
            )
        };
        let lookup_context = context.clone();
        let rerender = RerenderController::new(
            scheduler,
            config::config().rerender_delay_ms(),
            schema.clone(),
            move || lookup_context.get_node(),
        );

        let root = Self(Rc::new(RootInner {
            root_id: RootId::next(),
            scheduler: scheduler.clone(),
            schema,
            scope,
            pass_props: Signal::new(scheduler, props.pass_props),
            device: Signal::new(scheduler, props.device.map(Rc::from)),
            locale,
            messages,
            this_required: Signal::new(scheduler, props.this_required_in_jse),
            runtime_scope,
            fallback: props.fallback,
            context,
            on_comp_get_ctx: RefCell::new(props.on_comp_get_ctx),
            rerender,
            tree: RefCell::new(None),
            mount: RefCell::new(MountTree::new()),
            last_error: RefCell::new(None),
            render_source: scheduler.allocate_source(),
            subscriptions: RefCell::new(Vec::new()),
            document: RefCell::new(None),
            renders: Cell::new(0),
            propagations: Cell::new(0),
            unmounted: Cell::new(false),
        }));
        root.connect();
        root.render()?;
        info!(root = root.0.root_id.as_u64(), generation = %root.generation(), "render root mounted");
        Ok(root)
    }

    fn connect(&self) {
        let inner = &self.0;
        let weak = Rc::downgrade(inner);
        let invalidate = {
            let weak = weak.clone();
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.scheduler.notify(inner.render_source);
                }
            }
        };
        let on_schema = {
            let weak = weak.clone();
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.propagations.set(inner.propagations.get() + 1);
                    inner.scheduler.notify(inner.render_source);
                }
            }
        };

        let mut subscriptions = inner.context.observe(invalidate.clone());
        subscriptions.push(inner.schema.subscribe(on_schema));
        subscriptions.push(inner.scope.subscribe(invalidate.clone()));
        subscriptions.push(inner.pass_props.subscribe(invalidate.clone()));
        subscriptions.push(inner.device.subscribe(invalidate.clone()));
        subscriptions.push(inner.locale.subscribe(invalidate.clone()));
        subscriptions.push(inner.messages.subscribe(invalidate.clone()));
        subscriptions.push(inner.this_required.subscribe(invalidate));
        *inner.subscriptions.borrow_mut() = subscriptions;

        let render_weak = weak.clone();
        inner.scheduler.subscribe(inner.render_source, move || {
            if let Some(inner) = render_weak.upgrade() {
                RenderRoot(inner).render_in_tick();
            }
        });

        inner.context.set_rerender(Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.rerender.rerender();
            }
        }));
    }

    fn render_in_tick(&self) {
        if let Err(error) = self.render() {
            warn!(%error, "render failed, keeping the previous tree");
            *self.0.last_error.borrow_mut() = Some(error);
        }
    }

    /// Renders and commits now. On error the previous tree stays mounted.
    pub fn render(&self) -> Result<(), RenderError> {
        let inner = &self.0;
        if inner.unmounted.get() {
            return Ok(());
        }
        let env = RenderEnv {
            parser: SchemaParser::for_root(
                inner.root_id,
                SchemaParserOptions {
                    this_required: inner.this_required.get(),
                },
            ),
            locale: inner.locale.get(),
            messages: inner.messages.get(),
        };
        let schema = inner.schema.get();
        let scope = inner.runtime_scope.get();
        let pass_props = inner.pass_props.get();
        let device = inner.device.get();
        inner.renders.set(inner.renders.get() + 1);
        let tree = provide(&inner.context, || {
            render_content(
                &env,
                RenderRequest {
                    schema: Some(&schema),
                    scope: &scope,
                    pass_props: &pass_props,
                    device: device.as_deref(),
                    fallback: inner.fallback.as_ref(),
                },
            )
        })?;

        let report = inner.mount.borrow_mut().commit(tree.as_ref());
        *inner.tree.borrow_mut() = tree;
        *inner.last_error.borrow_mut() = None;
        debug!(
            mounted = report.mounted,
            reused = report.reused,
            unmounted = report.unmounted,
            "render committed"
        );
        for (schema, instance) in &report.reported {
            inner.context.trigger_comp_get_ctx(schema, *instance);
        }
        Ok(())
    }

    /// Requests a debounced refresh of the schema from the host document.
    pub fn rerender(&self) {
        self.0.rerender.rerender();
    }

    /// The root scope: the caller's scope plus `i18n`.
    pub fn runtime_scope(&self) -> RuntimeScope {
        self.0.runtime_scope.get()
    }

    /// Drops every parser module on this thread.
    pub fn clean_cached_modules() {
        ModuleRegistry::clean_cache_modules();
    }

    /// Wires a host document: its change notifications request rerenders and
    /// reported instances are forwarded to `mount_instance`. Also supplies
    /// `get_node` when none was given.
    pub fn attach_document(&self, host: Rc<dyn DocumentHost>) {
        self.detach_document();
        let inner = &self.0;
        let weak = Rc::downgrade(inner);
        let listener = host.on_node_change(Rc::new(move |id: &str| {
            if let Some(inner) = weak.upgrade() {
                debug!(id, "host node changed");
                inner.rerender.rerender();
            }
        }));
        if inner.context.get_node().is_none() {
            let lookup = host.clone();
            inner
                .context
                .set_get_node(Some(Rc::new(move |id: &str| lookup.get_node(id))));
        }
        *inner.document.borrow_mut() = Some(AttachedDocument {
            host: host.clone(),
            listener,
        });
        self.install_instance_callback();
    }

    pub fn detach_document(&self) {
        let detached = self.0.document.borrow_mut().take();
        if let Some(document) = detached {
            document.host.off_node_change(document.listener);
            self.install_instance_callback();
        }
    }

    fn install_instance_callback(&self) {
        let inner = &self.0;
        let user = inner.on_comp_get_ctx.borrow().clone();
        let host = inner
            .document
            .borrow()
            .as_ref()
            .map(|document| document.host.clone());
        let callback: Option<OnCompGetCtx> = match (user, host) {
            (user, Some(host)) => Some(Rc::new(move |schema: &SchemaNode, instance: InstanceHandle| {
                if let Some(id) = &schema.id {
                    host.mount_instance(id, instance);
                }
                if let Some(user) = &user {
                    user(schema, instance);
                }
            })),
            (user, None) => user,
        };
        inner.context.set_on_comp_get_ctx(callback);
    }

    /// Tears the root down: retires its leaf cache generation, releases its
    /// parser module and unmounts every instance.
    pub fn unmount(&self) {
        let inner = &self.0;
        if inner.unmounted.replace(true) {
            return;
        }
        self.detach_document();
        inner.rerender.cancel();
        inner.subscriptions.borrow_mut().clear();
        inner.scheduler.release_source(inner.render_source);
        let unmounted = inner.mount.borrow_mut().clear();
        *inner.tree.borrow_mut() = None;
        let retired = inner.context.retire();
        ModuleRegistry::release(inner.root_id);
        info!(
            root = inner.root_id.as_u64(),
            unmounted, retired, "render root unmounted"
        );
    }

    pub fn is_unmounted(&self) -> bool {
        self.0.unmounted.get()
    }

    pub fn schema(&self) -> Rc<SchemaNode> {
        self.0.schema.get()
    }

    /// Replaces the schema reference; dependents re-render on the next tick.
    pub fn set_schema(&self, schema: SchemaNode) {
        self.0.schema.set(Rc::new(schema));
    }

    pub fn set_scope(&self, scope: RuntimeScope) {
        self.0.scope.set(scope);
    }

    pub fn set_pass_props(&self, pass_props: Object) {
        self.0.pass_props.set(pass_props);
    }

    pub fn set_components(&self, components: ComponentRegistry) {
        self.0.context.set_components(components);
    }

    pub fn set_design_mode(&self, design_mode: DesignMode) {
        self.0.context.set_design_mode(design_mode);
    }

    pub fn set_disable_comp_mock(&self, policy: DisableCompMock) {
        self.0.context.set_disable_comp_mock(policy);
    }

    pub fn set_device(&self, device: Option<&str>) {
        self.0.device.set_if_changed(device.map(Rc::from));
    }

    pub fn set_locale(&self, locale: Option<&str>) {
        self.0.locale.set_if_changed(locale.map(Rc::from));
    }

    pub fn set_messages(&self, messages: Messages) {
        self.0.messages.set(Rc::new(messages));
    }

    pub fn set_this_required_in_jse(&self, this_required: bool) {
        self.0.this_required.set_if_changed(this_required);
    }

    pub fn set_get_node(&self, get_node: Option<GetNode>) {
        self.0.context.set_get_node(get_node);
    }

    pub fn set_on_comp_get_ctx(&self, callback: Option<OnCompGetCtx>) {
        *self.0.on_comp_get_ctx.borrow_mut() = callback;
        self.install_instance_callback();
    }

    pub fn context(&self) -> &RendererContext {
        &self.0.context
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.0.scheduler
    }

    pub fn root_id(&self) -> RootId {
        self.0.root_id
    }

    pub fn generation(&self) -> Generation {
        self.0.context.generation()
    }

    pub fn with_tree<R>(&self, read: impl FnOnce(Option<&VNode>) -> R) -> R {
        read(self.0.tree.borrow().as_ref())
    }

    pub fn tree(&self) -> Option<VNode> {
        self.0.tree.borrow().clone()
    }

    /// First mounted instance rendered under `key`.
    pub fn instance(&self, key: &str) -> Option<InstanceHandle> {
        self.0.mount.borrow().find(key).first().copied()
    }

    pub fn is_mounted(&self, instance: InstanceHandle) -> bool {
        self.0.mount.borrow().is_mounted(instance)
    }

    /// The error of the last scheduled render, if it failed.
    pub fn take_error(&self) -> Option<RenderError> {
        self.0.last_error.borrow_mut().take()
    }

    pub fn renders(&self) -> usize {
        self.0.renders.get()
    }

    /// How many times a schema change reached the root's dependents.
    pub fn propagations(&self) -> usize {
        self.0.propagations.get()
    }

    /// Schema refreshes actually run by the rerender controller.
    pub fn refreshes(&self) -> usize {
        self.0.rerender.refreshes()
    }

    pub fn downgrade(&self) -> WeakRenderRoot {
        WeakRenderRoot(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for RenderRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderRoot")
            .field("root_id", &self.0.root_id)
            .field("generation", &self.generation())
            .field("renders", &self.renders())
            .field("unmounted", &self.is_unmounted())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct WeakRenderRoot(Weak<RootInner>);

impl WeakRenderRoot {
    pub fn upgrade(&self) -> Option<RenderRoot> {
        self.0.upgrade().map(RenderRoot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TestClock;
    use crate::error::ExpressionError;
    use serde_json::json;

    fn scheduler() -> Scheduler {
        Scheduler::new(Rc::new(TestClock::new()))
    }

    fn page(title: serde_json::Value) -> SchemaNode {
        SchemaNode::new("Page").with_id("page").with_prop("title", title)
    }

    #[test]
    fn input_changes_in_one_round_render_once() {
        let scheduler = scheduler();
        let root = RenderRoot::mount(
            &scheduler,
            RendererProps::new(page(json!("a")), ComponentRegistry::new()),
        )
        .unwrap();
        assert_eq!(root.renders(), 1);

        root.set_schema(page(json!("b")));
        root.set_locale(Some("en-US"));
        root.set_design_mode(DesignMode::Design);
        scheduler.run_until_quiescent(10);

        assert_eq!(root.renders(), 2);
        assert_eq!(root.propagations(), 1);
        root.with_tree(|tree| assert_eq!(tree.unwrap().prop("title"), Some(&Value::text("b"))));
    }

    #[test]
    fn root_scope_carries_i18n() {
        let scheduler = scheduler();
        let messages = Messages::from([(
            "en-US".to_string(),
            IndexMap::from([("hello".to_string(), "Hello {name}".to_string())]),
        )]);
        let schema = page(json!({
            "type": "i18n",
            "key": "hello",
            "params": { "name": "Ada" }
        }));
        let root = RenderRoot::mount(
            &scheduler,
            RendererProps::new(schema, ComponentRegistry::new())
                .with_locale("en-US")
                .with_messages(messages),
        )
        .unwrap();

        assert!(root.runtime_scope().get("i18n").is_some());
        root.with_tree(|tree| {
            assert_eq!(tree.unwrap().prop("title"), Some(&Value::text("Hello Ada")));
        });

        root.set_locale(Some("fr-FR"));
        scheduler.run_until_quiescent(10);
        root.with_tree(|tree| assert_eq!(tree.unwrap().prop("title"), Some(&Value::text("hello"))));
    }

    #[test]
    fn failed_scheduled_render_keeps_the_previous_tree() {
        let scheduler = scheduler();
        let root = RenderRoot::mount(
            &scheduler,
            RendererProps::new(page(json!("ok")), ComponentRegistry::new()),
        )
        .unwrap();

        root.set_schema(page(json!({ "type": "JSExpression", "value": "title" })));
        scheduler.run_until_quiescent(10);

        let error = root.take_error().unwrap();
        assert!(matches!(
            error.expression_error(),
            Some(ExpressionError::UnknownIdentifier { .. })
        ));
        root.with_tree(|tree| assert_eq!(tree.unwrap().prop("title"), Some(&Value::text("ok"))));
    }

    #[test]
    fn root_scope_binds_this_unless_the_caller_did() {
        let scheduler = scheduler();
        let root = RenderRoot::mount(
            &scheduler,
            RendererProps::new(page(json!("a")), ComponentRegistry::new())
                .with_scope(RuntimeScope::from_json(&json!({ "constants": { "title": "T" } }))),
        )
        .unwrap();
        let Some(Value::Object(this)) = root.runtime_scope().this_value() else {
            panic!("expected an object bound to this");
        };
        assert!(this.contains_key("constants"));
        assert!(this.contains_key("i18n"));

        let explicit = RuntimeScope::new(Object::new()).with_this(Value::text("mine"));
        root.set_scope(explicit);
        scheduler.run_until_quiescent(10);
        assert_eq!(root.runtime_scope().this_value(), Some(Value::text("mine")));
    }

    #[test]
    fn mount_surfaces_errors_synchronously() {
        let scheduler = scheduler();
        let result = RenderRoot::mount(
            &scheduler,
            RendererProps::new(SchemaNode::new("Page"), ComponentRegistry::new()),
        );
        assert!(matches!(result, Err(RenderError::MissingRenderKey { .. })));
    }

    #[test]
    fn dropping_a_root_releases_its_module() {
        let scheduler = scheduler();
        let root = RenderRoot::mount(
            &scheduler,
            RendererProps::new(page(json!("a")), ComponentRegistry::new()),
        )
        .unwrap();
        let root_id = root.root_id();
        assert!(ModuleRegistry::is_registered(root_id));
        drop(root);
        assert!(!ModuleRegistry::is_registered(root_id));
    }
}
