//! Tree-walking evaluator for compiled expressions.
//!
//! Two binding modes exist. With `this` required, bare identifiers see only
//! arrow parameters and a few globals, and every scope access goes through an
//! explicit `this`. Otherwise identifiers resolve through the runtime scope
//! and an unbound `this` is the flattened scope itself.

use std::rc::Rc;

use smallvec::SmallVec;

use super::{
    BinaryOperator, CompiledExpression, Expression, Literal, LogicalOperator, Span, Spanned,
    UnaryOperator,
};
use crate::error::{ExpressionBindingError, ExpressionError};
use crate::scope::RuntimeScope;
use crate::value::{Function, Value};

struct Locals {
    parent: Option<Rc<Locals>>,
    bindings: SmallVec<[(Rc<str>, Value); 4]>,
}

impl Locals {
    fn get(self: &Rc<Self>, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(locals) = frame {
            if let Some((_, value)) = locals.bindings.iter().find(|(local, _)| &**local == name) {
                return Some(value.clone());
            }
            frame = locals.parent.as_ref();
        }
        None
    }
}

#[derive(Clone)]
struct Environment {
    scope: RuntimeScope,
    locals: Option<Rc<Locals>>,
    this_required: bool,
    source: Rc<str>,
}

/// Arrow function value; captures its defining environment, `this` included.
pub struct Closure {
    parameters: Vec<Rc<str>>,
    body: Rc<Spanned<Expression>>,
    environment: Environment,
}

impl std::fmt::Debug for Closure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Closure")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl Closure {
    pub fn call(&self, arguments: &[Value]) -> Result<Value, ExpressionError> {
        let bindings = self
            .parameters
            .iter()
            .enumerate()
            .map(|(position, name)| (name.clone(), arguments.get(position).cloned().unwrap_or_default()))
            .collect();
        let environment = Environment {
            locals: Some(Rc::new(Locals {
                parent: self.environment.locals.clone(),
                bindings,
            })),
            ..self.environment.clone()
        };
        environment.evaluate(&self.body)
    }
}

impl CompiledExpression {
    /// Evaluates against `scope`. `this_required` selects the binding mode.
    pub fn evaluate(&self, scope: &RuntimeScope, this_required: bool) -> Result<Value, ExpressionError> {
        Environment {
            scope: scope.clone(),
            locals: None,
            this_required,
            source: self.source.clone(),
        }
        .evaluate(&self.ast)
    }
}

fn type_error(message: impl Into<String>, span: Span) -> ExpressionError {
    ExpressionError::Type {
        message: message.into(),
        span,
    }
}

impl Environment {
    fn slice(&self, span: Span) -> &str {
        self.source.get(span.into_range()).unwrap_or("expression")
    }

    fn evaluate(&self, expression: &Spanned<Expression>) -> Result<Value, ExpressionError> {
        let span = expression.span;
        match &expression.node {
            Expression::Literal(literal) => Ok(match literal {
                Literal::Number(number) => Value::Number(*number),
                Literal::Text(text) => Value::Text(text.clone()),
                Literal::Bool(value) => Value::Bool(*value),
                Literal::Null => Value::Null,
            }),
            Expression::Identifier(name) => self.identifier(name, span),
            Expression::This => self.this_value(span),
            Expression::Array { items } => Ok(Value::list(
                items
                    .iter()
                    .map(|item| self.evaluate(item))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Expression::Object { entries } => {
                let mut fields = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    fields.push((key.to_string(), self.evaluate(value)?));
                }
                Ok(Value::object(fields))
            }
            Expression::Member {
                object,
                property,
                optional,
            } => {
                let target = self.evaluate(object)?;
                self.member(&target, property, *optional, span)
            }
            Expression::Index { object, index } => {
                let target = self.evaluate(object)?;
                let key = self.evaluate(index)?;
                if target.is_nullish() {
                    return Err(type_error(
                        format!(
                            "cannot read properties of {} (reading '{}')",
                            target.type_name(),
                            key.to_display_string()
                        ),
                        span,
                    ));
                }
                Ok(target.property(&key.to_display_string()))
            }
            Expression::Call { callee, arguments } => self.call(callee, arguments, span),
            Expression::Unary { operator, operand } => {
                let value = self.evaluate(operand)?;
                Ok(match operator {
                    UnaryOperator::Not => Value::Bool(!value.is_truthy()),
                    UnaryOperator::Negate => Value::Number(-value.to_number()),
                    UnaryOperator::Plus => Value::Number(value.to_number()),
                })
            }
            Expression::Binary {
                operator,
                operand_a,
                operand_b,
            } => {
                let a = self.evaluate(operand_a)?;
                let b = self.evaluate(operand_b)?;
                Ok(binary(*operator, &a, &b))
            }
            Expression::Logical {
                operator,
                operand_a,
                operand_b,
            } => {
                let a = self.evaluate(operand_a)?;
                let short_circuits = match operator {
                    LogicalOperator::And => !a.is_truthy(),
                    LogicalOperator::Or => a.is_truthy(),
                    LogicalOperator::Nullish => !a.is_nullish(),
                };
                if short_circuits {
                    Ok(a)
                } else {
                    self.evaluate(operand_b)
                }
            }
            Expression::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.evaluate(test)?.is_truthy() {
                    self.evaluate(consequent)
                } else {
                    self.evaluate(alternate)
                }
            }
            Expression::Arrow { parameters, body } => {
                Ok(Value::Function(Function::Closure(Rc::new(Closure {
                    parameters: parameters.clone(),
                    body: body.clone(),
                    environment: self.clone(),
                }))))
            }
        }
    }

    fn identifier(&self, name: &str, span: Span) -> Result<Value, ExpressionError> {
        if let Some(value) = self.locals.as_ref().and_then(|locals| locals.get(name)) {
            return Ok(value);
        }
        if !self.this_required {
            if let Some(value) = self.scope.get(name) {
                return Ok(value);
            }
        }
        match name {
            "undefined" => Ok(Value::Undefined),
            "NaN" => Ok(Value::Number(f64::NAN)),
            "Infinity" => Ok(Value::Number(f64::INFINITY)),
            _ => Err(ExpressionError::UnknownIdentifier {
                name: name.to_string(),
                span,
            }),
        }
    }

    fn this_value(&self, span: Span) -> Result<Value, ExpressionError> {
        match self.scope.this_value() {
            Some(value) => Ok(value),
            None if self.this_required => Err(ExpressionBindingError {
                expression: self.source.to_string(),
                span,
            }
            .into()),
            None => Ok(Value::Object(Rc::new(self.scope.to_object()))),
        }
    }

    fn member(&self, target: &Value, property: &str, optional: bool, span: Span) -> Result<Value, ExpressionError> {
        if target.is_nullish() {
            if optional {
                return Ok(Value::Undefined);
            }
            return Err(type_error(
                format!(
                    "cannot read properties of {} (reading '{property}')",
                    target.type_name()
                ),
                span,
            ));
        }
        Ok(target.property(property))
    }

    fn call(
        &self,
        callee: &Spanned<Expression>,
        arguments: &[Spanned<Expression>],
        span: Span,
    ) -> Result<Value, ExpressionError> {
        let arguments = arguments
            .iter()
            .map(|argument| self.evaluate(argument))
            .collect::<Result<Vec<_>, _>>()?;

        if let Expression::Member {
            object,
            property,
            optional,
        } = &callee.node
        {
            let receiver = self.evaluate(object)?;
            if receiver.is_nullish() && *optional {
                return Ok(Value::Undefined);
            }
            let own = self.member(&receiver, property, *optional, callee.span)?;
            if let Value::Function(function) = own {
                return function.call(&arguments);
            }
            if matches!(own, Value::Undefined) {
                if let Some(result) = builtin_method(&receiver, property, &arguments, span)? {
                    return Ok(result);
                }
            }
            return Err(ExpressionError::NotCallable {
                callee: self.slice(callee.span).to_string(),
                span: callee.span,
            });
        }

        match self.evaluate(callee)? {
            Value::Function(function) => function.call(&arguments),
            _ => Err(ExpressionError::NotCallable {
                callee: self.slice(callee.span).to_string(),
                span: callee.span,
            }),
        }
    }
}

fn binary(operator: BinaryOperator, a: &Value, b: &Value) -> Value {
    let numeric = |f: fn(f64, f64) -> f64| Value::Number(f(a.to_number(), b.to_number()));
    match operator {
        BinaryOperator::Add => {
            let is_textual = |value: &Value| {
                matches!(value, Value::Text(_) | Value::List(_) | Value::Object(_) | Value::Function(_))
            };
            if is_textual(a) || is_textual(b) {
                Value::text(format!("{}{}", a.to_display_string(), b.to_display_string()))
            } else {
                numeric(|x, y| x + y)
            }
        }
        BinaryOperator::Subtract => numeric(|x, y| x - y),
        BinaryOperator::Multiply => numeric(|x, y| x * y),
        BinaryOperator::Divide => numeric(|x, y| x / y),
        BinaryOperator::Remainder => numeric(|x, y| x % y),
        BinaryOperator::StrictEqual => Value::Bool(a.strict_eq(b)),
        BinaryOperator::StrictNotEqual => Value::Bool(!a.strict_eq(b)),
        BinaryOperator::Equal => Value::Bool(a.loose_eq(b)),
        BinaryOperator::NotEqual => Value::Bool(!a.loose_eq(b)),
        BinaryOperator::Less
        | BinaryOperator::LessOrEqual
        | BinaryOperator::Greater
        | BinaryOperator::GreaterOrEqual => {
            let ordering = match (a, b) {
                (Value::Text(x), Value::Text(y)) => Some(x.cmp(y)),
                _ => a.to_number().partial_cmp(&b.to_number()),
            };
            let Some(ordering) = ordering else {
                return Value::Bool(false);
            };
            Value::Bool(match operator {
                BinaryOperator::Less => ordering.is_lt(),
                BinaryOperator::LessOrEqual => ordering.is_le(),
                BinaryOperator::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

fn callback<'a>(arguments: &'a [Value], method: &str, span: Span) -> Result<&'a Function, ExpressionError> {
    arguments
        .first()
        .and_then(Value::as_function)
        .ok_or_else(|| type_error(format!("{method} expects a function argument"), span))
}

/// Built-in methods of strings, arrays and every value (`toString`).
fn builtin_method(
    receiver: &Value,
    method: &str,
    arguments: &[Value],
    span: Span,
) -> Result<Option<Value>, ExpressionError> {
    let first = arguments.first().cloned().unwrap_or_default();
    let result = match (receiver, method) {
        (_, "toString") => Value::text(receiver.to_display_string()),
        (Value::Text(text), "includes") => Value::Bool(text.contains(&*first.to_display_string())),
        (Value::Text(text), "toUpperCase") => Value::text(text.to_uppercase()),
        (Value::Text(text), "toLowerCase") => Value::text(text.to_lowercase()),
        (Value::Text(text), "trim") => Value::text(text.trim()),
        (Value::List(items), "includes") => Value::Bool(items.iter().any(|item| item.strict_eq(&first))),
        (Value::List(items), "join") => {
            let separator = match &first {
                Value::Undefined => ",".to_string(),
                other => other.to_display_string(),
            };
            Value::text(
                items
                    .iter()
                    .map(|item| {
                        if item.is_nullish() {
                            String::new()
                        } else {
                            item.to_display_string()
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(&separator),
            )
        }
        (Value::List(items), "map") => {
            let function = callback(arguments, "map", span)?;
            let mut mapped = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                mapped.push(function.call(&[item.clone(), Value::Number(index as f64)])?);
            }
            Value::list(mapped)
        }
        (Value::List(items), "filter") => {
            let function = callback(arguments, "filter", span)?;
            let mut kept = Vec::new();
            for (index, item) in items.iter().enumerate() {
                if function
                    .call(&[item.clone(), Value::Number(index as f64)])?
                    .is_truthy()
                {
                    kept.push(item.clone());
                }
            }
            Value::list(kept)
        }
        _ => return Ok(None),
    };
    Ok(Some(result))
}

#[cfg(test)]
mod tests {
    use super::super::compile;
    use super::*;
    use indexmap::IndexMap;

    fn scope() -> RuntimeScope {
        RuntimeScope::new(IndexMap::from([
            ("title".to_string(), Value::text("Hello")),
            (
                "items".to_string(),
                Value::list([Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]),
            ),
        ]))
    }

    fn lenient(source: &str) -> Result<Value, ExpressionError> {
        compile(source)?.evaluate(&scope(), false)
    }

    fn strict(source: &str, scope: &RuntimeScope) -> Result<Value, ExpressionError> {
        compile(source)?.evaluate(scope, true)
    }

    #[test]
    fn test_strict_this_without_binding_is_a_binding_error() {
        let error = strict("this.title", &scope()).unwrap_err();
        let ExpressionError::Binding(binding) = error else {
            panic!("expected binding error, got {error:?}");
        };
        assert_eq!(binding.expression, "this.title");
        assert_eq!(binding.span.into_range(), 0..4);
    }

    #[test]
    fn test_lenient_this_is_the_ambient_scope() {
        assert_eq!(lenient("this.title").unwrap(), Value::text("Hello"));
        assert_eq!(lenient("title + '!'").unwrap(), Value::text("Hello!"));
    }

    #[test]
    fn test_strict_mode_resolves_through_explicit_this() {
        let this = Value::object([("name", Value::text("Ada"))]);
        let bound = scope().with_this(this);
        assert_eq!(strict("this.name", &bound).unwrap(), Value::text("Ada"));
        assert!(matches!(
            strict("title", &bound),
            Err(ExpressionError::UnknownIdentifier { .. })
        ));
        assert_eq!(strict("undefined", &bound).unwrap(), Value::Undefined);
    }

    #[test]
    fn test_arrow_functions_capture_this_lexically() {
        let this = Value::object([("factor", Value::Number(10.0))]);
        let bound = scope().with_this(this);
        let result = strict("[1, 2].map(x => x * this.factor)", &bound).unwrap();
        assert_eq!(result, Value::list([Value::Number(10.0), Value::Number(20.0)]));
    }

    #[test]
    fn test_builtin_members() {
        assert_eq!(lenient("items.length").unwrap(), Value::Number(3.0));
        assert_eq!(lenient("items.includes(2)").unwrap(), Value::Bool(true));
        assert_eq!(lenient("items.join('-')").unwrap(), Value::text("1-2-3"));
        assert_eq!(
            lenient("items.filter((n, i) => n > 1 && i < 2)").unwrap(),
            Value::list([Value::Number(2.0)])
        );
        assert_eq!(lenient("'  Hi '.trim().toUpperCase()").unwrap(), Value::text("HI"));
        assert_eq!(lenient("(12).toString() + 1").unwrap(), Value::text("121"));
    }

    #[test]
    fn test_short_circuit_skips_the_failing_branch() {
        assert_eq!(lenient("false && missing").unwrap(), Value::Bool(false));
        assert_eq!(lenient("null ?? 'fallback'").unwrap(), Value::text("fallback"));
        assert_eq!(lenient("0 || 'zero'").unwrap(), Value::text("zero"));
        assert!(lenient("true && missing").is_err());
    }

    #[test]
    fn test_type_and_call_errors() {
        assert!(matches!(lenient("nothing.here"), Err(ExpressionError::UnknownIdentifier { .. })));
        assert!(matches!(lenient("undefined.here"), Err(ExpressionError::Type { .. })));
        assert_eq!(lenient("undefined?.here").unwrap(), Value::Undefined);
        let error = lenient("title()").unwrap_err();
        assert!(matches!(&error, ExpressionError::NotCallable { callee, .. } if callee == "title"));
    }

    #[test]
    fn test_native_functions_are_callable() {
        let scope = scope().child_with(
            "double",
            Value::native("double", |arguments| {
                Ok(Value::Number(arguments.first().map(Value::to_number).unwrap_or(0.0) * 2.0))
            }),
        );
        let result = compile("double(21)").unwrap().evaluate(&scope, false).unwrap();
        assert_eq!(result, Value::Number(42.0));
    }

    #[test]
    fn test_comparisons_and_equality() {
        assert_eq!(lenient("'b' > 'a'").unwrap(), Value::Bool(true));
        assert_eq!(lenient("1 == '1'").unwrap(), Value::Bool(true));
        assert_eq!(lenient("1 === '1'").unwrap(), Value::Bool(false));
        assert_eq!(lenient("NaN < 1").unwrap(), Value::Bool(false));
        assert_eq!(lenient("7 % 4 - -1").unwrap(), Value::Number(4.0));
    }
}
