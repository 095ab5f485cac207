//! Per-node rendering: component resolution, prop building and subtree
//! expansion (`condition`, `loop`, `state`, slots).
//!
//! Must run inside [`crate::context::provide`]; components, design mode and
//! the leaf cache come from the provided [`RendererContext`].

use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

use crate::component::{Component, ComponentKind, ComponentRegistry};
use crate::config;
use crate::context::{RendererContext, use_renderer_context};
use crate::error::{PropError, RenderError};
use crate::i18n::Messages;
use crate::mount::InstanceHandle;
use crate::parser::SchemaParser;
use crate::renderers::{self, RendererCall};
use crate::schema::{PropValue, SchemaNode};
use crate::scope::RuntimeScope;
use crate::value::{Object, Value};
use crate::vnode::{RendererInternals, Slot, VNode};

/// What every node of one render pass resolves against.
#[derive(Debug, Clone)]
pub struct RenderEnv {
    pub parser: SchemaParser,
    pub locale: Option<Rc<str>>,
    pub messages: Rc<Messages>,
}

pub struct RenderRequest<'a> {
    pub schema: Option<&'a Rc<SchemaNode>>,
    pub scope: &'a RuntimeScope,
    pub pass_props: &'a Object,
    pub device: Option<&'a str>,
    /// Rendered in place of a root whose component cannot be resolved.
    pub fallback: Option<&'a Rc<Component>>,
}

/// `components[name]`, else `components[name + "Renderer"]`; a result that is
/// not renderer-tagged is swapped for the built-in renderer of that name.
pub fn resolve_root_component(components: &ComponentRegistry, name: &str) -> Option<Rc<Component>> {
    let renderer_name = format!("{name}Renderer");
    match components.get(name).or_else(|| components.get(&renderer_name)) {
        Some(component) if component.is_renderer() => Some(component.clone()),
        _ => config::config().renderer(&renderer_name),
    }
}

/// Renders the root node. `Ok(None)` when there is no schema or nothing to
/// render it with.
pub fn render_content(env: &RenderEnv, request: RenderRequest<'_>) -> Result<Option<VNode>, RenderError> {
    let Some(schema) = request.schema else {
        return Ok(None);
    };
    let context = use_renderer_context();
    let components = context.components();
    let Some(component) = resolve_root_component(&components, &schema.component_name) else {
        warn!(component = schema.component_name, "no renderer for root node");
        return Ok(request.fallback.map(|fallback| VNode::new("fallback", fallback.clone())));
    };
    let ComponentKind::Renderer(renderer) = component.kind() else {
        return Ok(None);
    };

    let key = schema.require_render_key()?;
    let scope = node_scope(env, schema, request.scope)?;
    let mut props = request.pass_props.clone();
    props.extend(resolve_schema_props(env, schema, &scope)?);
    let internals = renderer_internals(env, &context, components, schema.clone(), scope);
    let content = renderers::render(
        renderer,
        RendererCall {
            key,
            component,
            props,
            internals,
        },
    )?;

    Ok(Some(match config::config().config_provider() {
        Some(provider) => {
            let mut provider_props = Object::new();
            provider_props.insert("device".to_string(), request.device.map_or(Value::Undefined, Value::text));
            provider_props.insert(
                "locale".to_string(),
                env.locale.clone().map_or(Value::Undefined, Value::Text),
            );
            VNode::new(format!("{}:config", content.key), provider)
                .with_props(provider_props)
                .with_children(vec![content])
        }
        None => content,
    }))
}

/// Renders one child node; loops may expand it to several nodes, a false
/// `condition` or an unknown component to none.
pub fn render_comp(env: &RenderEnv, schema: &SchemaNode, scope: &RuntimeScope) -> Result<Vec<VNode>, RenderError> {
    let Some(raw_loop) = &schema.loop_data else {
        return Ok(render_single(env, schema, scope, None)?.into_iter().collect());
    };
    let items = match env.parser.resolve_value(raw_loop, scope)? {
        Value::List(items) => items,
        Value::Undefined | Value::Null => return Ok(Vec::new()),
        other => {
            return Err(RenderError::LoopNotList {
                component_name: schema.component_name.clone(),
                found: other.type_name(),
            });
        }
    };
    let (item_name, index_name) = schema.loop_bindings();
    let mut nodes = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let item_scope = scope.extend(IndexMap::from([
            (item_name.to_string(), item.clone()),
            (index_name.to_string(), Value::Number(index as f64)),
        ]));
        nodes.extend(render_single(env, schema, &item_scope, Some(index))?);
    }
    Ok(nodes)
}

fn render_single(
    env: &RenderEnv,
    schema: &SchemaNode,
    scope: &RuntimeScope,
    loop_index: Option<usize>,
) -> Result<Option<VNode>, RenderError> {
    if let Some(condition) = &schema.condition {
        if !env.parser.resolve_value(condition, scope)?.is_truthy() {
            trace!(component = schema.component_name, "condition is falsy");
            return Ok(None);
        }
    }

    let context = use_renderer_context();
    let components = context.components();
    let name = schema.component_name.as_str();
    let renderer = components
        .get(name)
        .filter(|component| component.is_renderer())
        .or_else(|| {
            components
                .get(&format!("{name}Renderer"))
                .filter(|component| component.is_renderer())
        })
        .cloned();
    let component = match (&renderer, components.get(name)) {
        (Some(renderer), _) => renderer.clone(),
        (None, Some(component)) => component.clone(),
        (None, None) => {
            warn!(component = name, "component not found, rendering nothing");
            return Ok(None);
        }
    };

    let mut key = schema.require_render_key()?;
    if let Some(index) = loop_index {
        key = format!("{key}_{index}");
    }
    let scope = node_scope(env, schema, scope)?;
    let props = resolve_schema_props(env, schema, &scope)?;

    if let ComponentKind::Renderer(kind) = component.kind() {
        let internals = renderer_internals(env, &context, components, Rc::new(schema.clone()), scope);
        return renderers::render(
            kind,
            RendererCall {
                key,
                component,
                props,
                internals,
            },
        )
        .map(Some);
    }

    let leaf = config::config().leaf(context.design_mode().leaf_mode());
    let wrapped = context.wrap_leaf_comp(name, &component, &leaf);

    let mut children = Vec::new();
    for child in &schema.children {
        children.extend(render_comp(env, child, &scope)?);
    }
    let mut slots = IndexMap::new();
    let slot_schemas = schema.slots().map_err(|source| RenderError::Slot {
        component_name: schema.component_name.clone(),
        source,
    })?;
    for slot in slot_schemas {
        let slot_scope = if slot.params.is_empty() {
            scope.clone()
        } else {
            scope.extend(
                slot.params
                    .iter()
                    .map(|param| (param.clone(), Value::Undefined))
                    .collect(),
            )
        };
        let mut nodes = Vec::new();
        for node in &slot.nodes {
            nodes.extend(render_comp(env, node, &slot_scope)?);
        }
        slots.insert(
            slot.name,
            Slot {
                params: slot.params,
                nodes,
            },
        );
    }

    Ok(Some(VNode {
        key,
        component: wrapped,
        target: Some(component),
        props,
        internals: None,
        children,
        slots,
        schema: Some(Rc::new(schema.without_children())),
        reports_instance: true,
    }))
}

/// `scope`, extended with the node's resolved `state` when it has one.
fn node_scope(env: &RenderEnv, schema: &SchemaNode, scope: &RuntimeScope) -> Result<RuntimeScope, RenderError> {
    if schema.state.is_empty() {
        return Ok(scope.clone());
    }
    let state = env.parser.resolve_props(&schema.state, scope).map_err(|error| {
        RenderError::prop(
            &schema.component_name,
            PropError {
                prop: format!("state.{}", error.prop),
                source: error.source,
            },
        )
    })?;
    Ok(scope.extend(IndexMap::from([(
        "state".to_string(),
        Value::Object(Rc::new(state)),
    )])))
}

/// Resolved props of `schema`; `JSSlot` props are rendered as slots instead.
fn resolve_schema_props(env: &RenderEnv, schema: &SchemaNode, scope: &RuntimeScope) -> Result<Object, RenderError> {
    let is_slot = |value: &JsonValue| matches!(PropValue::classify(value), PropValue::Slot(_));
    let resolved = if schema.props.values().any(is_slot) {
        let raw: IndexMap<String, JsonValue> = schema
            .props
            .iter()
            .filter(|(_, value)| !is_slot(value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        env.parser.resolve_props(&raw, scope)
    } else {
        env.parser.resolve_props(&schema.props, scope)
    };
    resolved.map_err(|error| RenderError::prop(&schema.component_name, error))
}

fn renderer_internals(
    env: &RenderEnv,
    context: &RendererContext,
    components: Rc<ComponentRegistry>,
    schema: Rc<SchemaNode>,
    scope: RuntimeScope,
) -> Rc<RendererInternals> {
    let trigger_context = context.clone();
    Rc::new(RendererInternals {
        parser: env.parser.clone(),
        scope,
        schema,
        locale: env.locale.clone(),
        messages: env.messages.clone(),
        components,
        design_mode: context.design_mode(),
        this_required_in_jse: env.parser.options().this_required,
        get_node: context.get_node(),
        trigger_comp_get_ctx: Rc::new(move |schema: &SchemaNode, instance: InstanceHandle| {
            trigger_context.trigger_comp_get_ctx(schema, instance)
        }),
    })
}

impl RendererInternals {
    pub fn env(&self) -> RenderEnv {
        RenderEnv {
            parser: self.parser.clone(),
            locale: self.locale.clone(),
            messages: self.messages.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextInit, DesignMode, DisableCompMock, provide};
    use crate::engine::{Scheduler, TestClock};
    use crate::parser::SchemaParserOptions;
    use serde_json::json;

    fn components() -> ComponentRegistry {
        ComponentRegistry::new()
            .with(Component::plain("Text"))
            .with(Rc::new(
                Component::new("Button", ComponentKind::Plain).with_option("__scopeId", Value::text("s1")),
            ))
    }

    fn render(schema: serde_json::Value, scope: &RuntimeScope) -> Result<Vec<VNode>, RenderError> {
        let scheduler = Scheduler::new(Rc::new(TestClock::new()));
        let context = RendererContext::new(
            &scheduler,
            ContextInit {
                components: components(),
                design_mode: DesignMode::Live,
                get_node: None,
                disable_comp_mock: DisableCompMock::default(),
            },
        );
        let env = RenderEnv {
            parser: SchemaParser::detached(SchemaParserOptions { this_required: false }),
            locale: None,
            messages: Rc::default(),
        };
        let schema = SchemaNode::from_json(&schema).unwrap();
        provide(&context, || render_comp(&env, &schema, scope))
    }

    fn labels(nodes: &[VNode]) -> Vec<(String, String)> {
        nodes
            .iter()
            .map(|node| (node.key.clone(), node.prop("label").unwrap().to_display_string()))
            .collect()
    }

    #[test]
    fn loops_suffix_keys_and_bind_items() {
        let scope = RuntimeScope::from_json(&json!({ "rows": ["a", "b"] }));
        let nodes = render(
            json!({
                "id": "cell",
                "componentName": "Text",
                "loop": { "type": "JSExpression", "value": "rows" },
                "loopArgs": ["row", ""],
                "props": { "label": { "type": "JSExpression", "value": "row + index" } }
            }),
            &scope,
        )
        .unwrap();
        assert_eq!(
            labels(&nodes),
            [("cell_0".to_string(), "a0".to_string()), ("cell_1".to_string(), "b1".to_string())]
        );
    }

    #[test]
    fn conditions_are_evaluated_per_item() {
        let scope = RuntimeScope::from_json(&json!({ "rows": [1, 2, 3] }));
        let nodes = render(
            json!({
                "id": "cell",
                "componentName": "Text",
                "loop": { "type": "JSExpression", "value": "rows" },
                "condition": { "type": "JSExpression", "value": "item !== 2" },
                "props": { "label": { "type": "JSExpression", "value": "item" } }
            }),
            &scope,
        )
        .unwrap();
        assert_eq!(labels(&nodes).len(), 2);
        assert_eq!(nodes[1].key, "cell_2");
    }

    #[test]
    fn loop_values_must_be_lists() {
        let nullish = render(
            json!({
                "id": "cell",
                "componentName": "Text",
                "loop": { "type": "JSExpression", "value": "rows" }
            }),
            &RuntimeScope::from_json(&json!({ "rows": null })),
        );
        assert!(nullish.unwrap().is_empty());

        let error = render(
            json!({ "id": "cell", "componentName": "Text", "loop": "abc" }),
            &RuntimeScope::default(),
        )
        .unwrap_err();
        assert!(matches!(error, RenderError::LoopNotList { found: "string", .. }));
    }

    #[test]
    fn unknown_components_render_nothing() {
        let nodes = render(
            json!({ "id": "x", "componentName": "Missing" }),
            &RuntimeScope::default(),
        )
        .unwrap();
        assert!(nodes.is_empty());
    }

    #[test]
    fn state_is_visible_to_props_and_children() {
        let nodes = render(
            json!({
                "id": "text",
                "componentName": "Text",
                "state": { "count": 2 },
                "props": { "label": { "type": "JSExpression", "value": "state.count * 2" } },
                "children": [{
                    "id": "inner",
                    "componentName": "Text",
                    "props": { "label": { "type": "JSExpression", "value": "state.count" } }
                }]
            }),
            &RuntimeScope::default(),
        )
        .unwrap();
        assert_eq!(nodes[0].prop("label"), Some(&Value::Number(4.0)));
        assert_eq!(nodes[0].children[0].prop("label"), Some(&Value::Number(2.0)));

        let error = render(
            json!({
                "id": "text",
                "componentName": "Text",
                "state": { "broken": { "type": "JSExpression", "value": "(" } }
            }),
            &RuntimeScope::default(),
        )
        .unwrap_err();
        assert!(matches!(error, RenderError::Prop { ref prop, .. } if prop == "state.broken"));
    }

    #[test]
    fn slots_render_apart_from_props() {
        let nodes = render(
            json!({
                "id": "button",
                "componentName": "Button",
                "props": {
                    "icon": {
                        "type": "JSSlot",
                        "params": ["size"],
                        "value": [{ "id": "icon", "componentName": "Text" }]
                    }
                }
            }),
            &RuntimeScope::default(),
        )
        .unwrap();
        let button = &nodes[0];
        assert!(button.prop("icon").is_none());
        assert_eq!(button.slots["icon"].params, ["size"]);
        assert_eq!(button.slots["icon"].nodes[0].key, "icon");
    }

    #[test]
    fn leaves_carry_the_source_and_a_childless_schema() {
        let nodes = render(
            json!({
                "id": "button",
                "componentName": "Button",
                "children": [{ "id": "label", "componentName": "Text" }]
            }),
            &RuntimeScope::default(),
        )
        .unwrap();
        let button = &nodes[0];
        assert_eq!(button.target.as_ref().unwrap().name(), "Button");
        assert_eq!(button.component.option("__scopeId"), Some(Value::text("s1")));
        assert!(button.reports_instance);
        assert!(button.schema.as_ref().unwrap().children.is_empty());
        assert_eq!(button.children[0].key, "label");
    }

    #[test]
    fn root_resolution_prefers_renderers() {
        let registry = ComponentRegistry::new().with(Component::plain("Page"));
        let resolved = resolve_root_component(&registry, "Page").unwrap();
        assert_eq!(resolved.name(), "PageRenderer");
        assert!(resolve_root_component(&registry, "Text").is_none());
    }
}
