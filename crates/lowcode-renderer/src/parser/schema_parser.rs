//! Schema-level expression handling.
//!
//! Every render root owns a [`ParserModule`], the compiled-expression cache of
//! its schema. Modules live in a thread-local [`ModuleRegistry`] keyed by
//! [`RootId`] so a root can release its module on teardown and an
//! application can drop every module at once.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use super::{CompiledExpression, compile};
use crate::error::{ExpressionError, PropError};
use crate::schema::{PropValue, SchemaNode};
use crate::scope::RuntimeScope;
use crate::value::{Object, Value};

/// Identity of one schema root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RootId(u64);

impl RootId {
    pub fn next() -> Self {
        NEXT_ROOT_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            Self(id)
        })
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Compiled expressions of one schema root, keyed by source text.
#[derive(Debug)]
pub struct ParserModule {
    root: RootId,
    expressions: RefCell<HashMap<Rc<str>, CompiledExpression>>,
    compilations: Cell<usize>,
}

impl ParserModule {
    fn new(root: RootId) -> Self {
        Self {
            root,
            expressions: RefCell::new(HashMap::new()),
            compilations: Cell::new(0),
        }
    }

    pub fn root(&self) -> RootId {
        self.root
    }

    pub fn compile(&self, source: &str) -> Result<CompiledExpression, ExpressionError> {
        if let Some(compiled) = self.expressions.borrow().get(source) {
            trace!(expression = source, "expression cache hit");
            return Ok(compiled.clone());
        }
        let compiled = compile(source)?;
        self.compilations.set(self.compilations.get() + 1);
        self.expressions
            .borrow_mut()
            .insert(source.into(), compiled.clone());
        Ok(compiled)
    }

    pub fn cached_len(&self) -> usize {
        self.expressions.borrow().len()
    }

    /// Number of cache misses that compiled an expression.
    pub fn compilations(&self) -> usize {
        self.compilations.get()
    }

    fn clear(&self) {
        self.expressions.borrow_mut().clear();
    }
}

thread_local! {
    static NEXT_ROOT_ID: Cell<u64> = const { Cell::new(1) };

    static MODULES: RefCell<HashMap<RootId, Rc<ParserModule>>> = RefCell::new(HashMap::new());
}

/// Thread-local registry of parser modules.
pub struct ModuleRegistry;

impl ModuleRegistry {
    /// Returns the module of `root`, creating it on first use.
    pub fn register(root: RootId) -> Rc<ParserModule> {
        MODULES.with(|modules| {
            modules
                .borrow_mut()
                .entry(root)
                .or_insert_with(|| {
                    debug!(root = root.0, "parser module registered");
                    Rc::new(ParserModule::new(root))
                })
                .clone()
        })
    }

    pub fn get(root: RootId) -> Option<Rc<ParserModule>> {
        MODULES.with(|modules| modules.borrow().get(&root).cloned())
    }

    /// Drops the module of `root`; returns whether one was registered.
    pub fn release(root: RootId) -> bool {
        let released = MODULES.with(|modules| modules.borrow_mut().remove(&root));
        match released {
            Some(module) => {
                module.clear();
                debug!(root = root.0, "parser module released");
                true
            }
            None => false,
        }
    }

    /// Drops every module.
    pub fn clean_cache_modules() {
        let released = MODULES.with(|modules| std::mem::take(&mut *modules.borrow_mut()));
        for module in released.values() {
            module.clear();
        }
        debug!(count = released.len(), "all parser modules released");
    }

    pub fn len() -> usize {
        MODULES.with(|modules| modules.borrow().len())
    }

    pub fn is_registered(root: RootId) -> bool {
        MODULES.with(|modules| modules.borrow().contains_key(&root))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaParserOptions {
    /// Whether expressions must reach the scope through an explicit `this`.
    pub this_required: bool,
}

impl Default for SchemaParserOptions {
    fn default() -> Self {
        Self { this_required: true }
    }
}

/// A compile problem found by [`SchemaParser::check`].
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// `componentName#id.props.title`-style location.
    pub location: String,
    pub source: String,
    pub error: ExpressionError,
}

/// Resolves schema values against runtime scopes.
#[derive(Debug, Clone)]
pub struct SchemaParser {
    options: SchemaParserOptions,
    module: Rc<ParserModule>,
}

impl SchemaParser {
    /// Parser bound to `root`'s registered module.
    pub fn for_root(root: RootId, options: SchemaParserOptions) -> Self {
        Self {
            options,
            module: ModuleRegistry::register(root),
        }
    }

    /// Parser with a private, unregistered module.
    pub fn detached(options: SchemaParserOptions) -> Self {
        Self {
            options,
            module: Rc::new(ParserModule::new(RootId::next())),
        }
    }

    pub fn options(&self) -> SchemaParserOptions {
        self.options
    }

    pub fn module(&self) -> &Rc<ParserModule> {
        &self.module
    }

    pub fn evaluate(&self, source: &str, scope: &RuntimeScope) -> Result<Value, ExpressionError> {
        self.module
            .compile(source)?
            .evaluate(scope, self.options.this_required)
    }

    /// Resolves one raw value: markers are evaluated, containers are walked,
    /// everything else is converted unchanged.
    pub fn resolve_value(&self, raw: &JsonValue, scope: &RuntimeScope) -> Result<Value, ExpressionError> {
        match PropValue::classify(raw) {
            PropValue::Expression(source) => self.evaluate(source, scope),
            PropValue::Function(source) => match self.evaluate(source, scope)? {
                function @ Value::Function(_) => Ok(function),
                other => Err(ExpressionError::Type {
                    message: format!("JSFunction `{source}` evaluated to {}", other.type_name()),
                    span: (0..source.len()).into(),
                }),
            },
            PropValue::I18n { key, params } => {
                let params = match params {
                    Some(params) => self.resolve_value(params, scope)?,
                    None => Value::Undefined,
                };
                match scope.get("i18n") {
                    Some(Value::Function(i18n)) => i18n.call(&[Value::text(key), params]),
                    _ => Ok(Value::text(key)),
                }
            }
            PropValue::Slot(slot) => Ok(Value::from_json(slot)),
            PropValue::Literal(JsonValue::Array(items)) => Ok(Value::list(
                items
                    .iter()
                    .map(|item| self.resolve_value(item, scope))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            PropValue::Literal(JsonValue::Object(fields)) => {
                let mut resolved = Vec::with_capacity(fields.len());
                for (key, value) in fields {
                    resolved.push((key.clone(), self.resolve_value(value, scope)?));
                }
                Ok(Value::object(resolved))
            }
            PropValue::Literal(literal) => Ok(Value::from_json(literal)),
        }
    }

    /// Resolves a prop map. The first failing prop aborts resolution.
    pub fn resolve_props(
        &self,
        raw: &IndexMap<String, JsonValue>,
        scope: &RuntimeScope,
    ) -> Result<Object, PropError> {
        let mut resolved = Object::with_capacity(raw.len());
        for (prop, value) in raw {
            let value = self
                .resolve_value(value, scope)
                .map_err(|source| PropError {
                    prop: prop.clone(),
                    source,
                })?;
            resolved.insert(prop.clone(), value);
        }
        Ok(resolved)
    }

    /// Compiles every expression in `schema` without evaluating any.
    pub fn check(&self, schema: &SchemaNode) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        schema.walk(&mut |node| {
            let node_location = match &node.id {
                Some(id) => format!("{}#{id}", node.component_name),
                None => node.component_name.clone(),
            };
            let mut visit = |location: String, value: &JsonValue| {
                self.check_value(&location, value, &mut diagnostics);
            };
            for (prop, value) in &node.props {
                visit(format!("{node_location}.props.{prop}"), value);
            }
            for (name, value) in &node.state {
                visit(format!("{node_location}.state.{name}"), value);
            }
            if let Some(condition) = &node.condition {
                visit(format!("{node_location}.condition"), condition);
            }
            if let Some(loop_data) = &node.loop_data {
                visit(format!("{node_location}.loop"), loop_data);
            }
        });
        diagnostics
    }

    fn check_value(&self, location: &str, value: &JsonValue, diagnostics: &mut Vec<Diagnostic>) {
        match PropValue::classify(value) {
            PropValue::Expression(source) | PropValue::Function(source) => {
                if let Err(error) = self.module.compile(source) {
                    diagnostics.push(Diagnostic {
                        location: location.to_string(),
                        source: source.to_string(),
                        error,
                    });
                }
            }
            PropValue::I18n { params: Some(params), .. } => {
                self.check_value(&format!("{location}.params"), params, diagnostics);
            }
            PropValue::I18n { params: None, .. } | PropValue::Slot(_) => {}
            PropValue::Literal(JsonValue::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    self.check_value(&format!("{location}[{index}]"), item, diagnostics);
                }
            }
            PropValue::Literal(JsonValue::Object(fields)) => {
                for (key, item) in fields {
                    self.check_value(&format!("{location}.{key}"), item, diagnostics);
                }
            }
            PropValue::Literal(_) => {}
        }
    }
}
