//! Expression front end: lexer, AST, pratt parser and evaluator.
//!
//! Schema props carry JavaScript-like expression strings. They are lexed into
//! a token stream, parsed into a spanned AST once, and evaluated as many times
//! as the owning node renders.

use std::rc::Rc;

use chumsky::{input::ValueInput, pratt::*, prelude::*};

mod lexer;
pub use lexer::{Token, lexer, unescape};

mod evaluator;
pub use evaluator::Closure;

mod schema_parser;
pub use schema_parser::{
    Diagnostic, ModuleRegistry, ParserModule, RootId, SchemaParser, SchemaParserOptions,
};

pub use chumsky::prelude::{Input, Parser};

use crate::error::{ExpressionError, SyntaxError};
use crate::value::Value;

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(Rc<str>),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    StrictEqual,
    StrictNotEqual,
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone)]
pub enum Expression {
    Literal(Literal),
    Identifier(Rc<str>),
    This,
    Array {
        items: Vec<Spanned<Self>>,
    },
    Object {
        entries: Vec<(Rc<str>, Spanned<Self>)>,
    },
    Member {
        object: Box<Spanned<Self>>,
        property: Rc<str>,
        optional: bool,
    },
    Index {
        object: Box<Spanned<Self>>,
        index: Box<Spanned<Self>>,
    },
    Call {
        callee: Box<Spanned<Self>>,
        arguments: Vec<Spanned<Self>>,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Spanned<Self>>,
    },
    Binary {
        operator: BinaryOperator,
        operand_a: Box<Spanned<Self>>,
        operand_b: Box<Spanned<Self>>,
    },
    Logical {
        operator: LogicalOperator,
        operand_a: Box<Spanned<Self>>,
        operand_b: Box<Spanned<Self>>,
    },
    Conditional {
        test: Box<Spanned<Self>>,
        consequent: Box<Spanned<Self>>,
        alternate: Box<Spanned<Self>>,
    },
    Arrow {
        parameters: Vec<Rc<str>>,
        body: Rc<Spanned<Self>>,
    },
}

impl Expression {
    /// True when `this` appears anywhere in the expression, arrow bodies included.
    pub fn reads_this(&self) -> bool {
        match self {
            Self::This => true,
            Self::Literal(_) | Self::Identifier(_) => false,
            Self::Array { items } => items.iter().any(|item| item.node.reads_this()),
            Self::Object { entries } => entries.iter().any(|(_, value)| value.node.reads_this()),
            Self::Member { object, .. } => object.node.reads_this(),
            Self::Index { object, index } => object.node.reads_this() || index.node.reads_this(),
            Self::Call { callee, arguments } => {
                callee.node.reads_this() || arguments.iter().any(|argument| argument.node.reads_this())
            }
            Self::Unary { operand, .. } => operand.node.reads_this(),
            Self::Binary { operand_a, operand_b, .. } | Self::Logical { operand_a, operand_b, .. } => {
                operand_a.node.reads_this() || operand_b.node.reads_this()
            }
            Self::Conditional { test, consequent, alternate } => {
                test.node.reads_this() || consequent.node.reads_this() || alternate.node.reads_this()
            }
            Self::Arrow { body, .. } => body.node.reads_this(),
        }
    }
}

enum Postfix {
    Member { property: Rc<str>, optional: bool },
    Index(Spanned<Expression>),
    Call(Vec<Spanned<Expression>>),
}

fn spanned(node: Expression, span: Span) -> Spanned<Expression> {
    Spanned { node, span }
}

pub fn parser<'code, I>()
-> impl Parser<'code, I, Spanned<Expression>, extra::Err<ParseError<'code, Token<'code>>>> + Clone
where
    I: ValueInput<'code, Token = Token<'code>, Span = Span>,
{
    recursive(|expression| {
        let comma = just(Token::Comma);
        let paren_open = just(Token::ParenOpen);
        let paren_close = just(Token::ParenClose);

        let identifier = select! { Token::Identifier(name) => Rc::<str>::from(name) };

        let literal = select! {
            Token::Number(number) => Literal::Number(number),
            Token::Text(text) => Literal::Text(unescape(text).into()),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::Null => Literal::Null,
        }
        .map(Expression::Literal);

        let arrow = {
            let parameter_list = identifier
                .separated_by(comma)
                .allow_trailing()
                .collect::<Vec<_>>()
                .delimited_by(paren_open, paren_close);
            let single_parameter = identifier.map(|parameter| vec![parameter]);

            parameter_list
                .or(single_parameter)
                .then_ignore(just(Token::Arrow))
                .then(expression.clone())
                .map(|(parameters, body)| Expression::Arrow {
                    parameters,
                    body: Rc::new(body),
                })
        };

        let array = expression
            .clone()
            .separated_by(comma)
            .allow_trailing()
            .collect()
            .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
            .map(|items| Expression::Array { items });

        let object = {
            let key = select! {
                Token::Identifier(name) => Rc::<str>::from(name),
                Token::Text(text) => Rc::<str>::from(unescape(text)),
                Token::Number(number) => Rc::<str>::from(Value::Number(number).to_display_string()),
            };
            let entry = key
                .then_ignore(just(Token::Colon))
                .then(expression.clone());
            let shorthand = identifier.map_with(|name, extra| {
                (name.clone(), spanned(Expression::Identifier(name), extra.span()))
            });

            entry
                .or(shorthand)
                .separated_by(comma)
                .allow_trailing()
                .collect()
                .delimited_by(just(Token::BraceOpen), just(Token::BraceClose))
                .map(|entries| Expression::Object { entries })
        };

        let nested = expression
            .clone()
            .delimited_by(paren_open, paren_close);

        let atom = choice((
            arrow,
            literal,
            just(Token::This).to(Expression::This),
            identifier.map(Expression::Identifier),
            array,
            object,
        ))
        .map_with(|node, extra| spanned(node, extra.span()))
        .or(nested);

        let arguments = expression
            .clone()
            .separated_by(comma)
            .allow_trailing()
            .collect()
            .delimited_by(paren_open, paren_close);

        let postfix = choice((
            just(Token::Dot)
                .ignore_then(identifier)
                .map(|property| Postfix::Member { property, optional: false }),
            just(Token::QuestionDot)
                .ignore_then(identifier)
                .map(|property| Postfix::Member { property, optional: true }),
            expression
                .clone()
                .delimited_by(just(Token::BracketOpen), just(Token::BracketClose))
                .map(Postfix::Index),
            arguments.map(Postfix::Call),
        ));

        let chain = atom.foldl_with(postfix.repeated(), |target, postfix, extra| {
            let node = match postfix {
                Postfix::Member { property, optional } => Expression::Member {
                    object: Box::new(target),
                    property,
                    optional,
                },
                Postfix::Index(index) => Expression::Index {
                    object: Box::new(target),
                    index: Box::new(index),
                },
                Postfix::Call(arguments) => Expression::Call {
                    callee: Box::new(target),
                    arguments,
                },
            };
            spanned(node, extra.span())
        });

        let unary_operator = select! {
            Token::Bang => UnaryOperator::Not,
            Token::Minus => UnaryOperator::Negate,
            Token::Plus => UnaryOperator::Plus,
        };
        let multiplicative = select! {
            Token::Asterisk => BinaryOperator::Multiply,
            Token::Slash => BinaryOperator::Divide,
            Token::Percent => BinaryOperator::Remainder,
        };
        let additive = select! {
            Token::Plus => BinaryOperator::Add,
            Token::Minus => BinaryOperator::Subtract,
        };
        let relational = select! {
            Token::Less => BinaryOperator::Less,
            Token::LessOrEqual => BinaryOperator::LessOrEqual,
            Token::Greater => BinaryOperator::Greater,
            Token::GreaterOrEqual => BinaryOperator::GreaterOrEqual,
        };
        let equality = select! {
            Token::StrictEqual => BinaryOperator::StrictEqual,
            Token::StrictNotEqual => BinaryOperator::StrictNotEqual,
            Token::Equal => BinaryOperator::Equal,
            Token::NotEqual => BinaryOperator::NotEqual,
        };

        let binary = |operator, l: Spanned<Expression>, r: Spanned<Expression>, span| {
            spanned(
                Expression::Binary {
                    operator,
                    operand_a: Box::new(l),
                    operand_b: Box::new(r),
                },
                span,
            )
        };
        let logical = |operator, l: Spanned<Expression>, r: Spanned<Expression>, span| {
            spanned(
                Expression::Logical {
                    operator,
                    operand_a: Box::new(l),
                    operand_b: Box::new(r),
                },
                span,
            )
        };

        let operation = chain.pratt((
            // Precedence 7 (highest): unary prefix
            prefix(7, unary_operator, |operator, operand, extra| {
                spanned(
                    Expression::Unary {
                        operator,
                        operand: Box::new(operand),
                    },
                    extra.span(),
                )
            }),
            infix(left(6), multiplicative, move |l, operator, r, extra| {
                binary(operator, l, r, extra.span())
            }),
            infix(left(5), additive, move |l, operator, r, extra| {
                binary(operator, l, r, extra.span())
            }),
            infix(left(4), relational, move |l, operator, r, extra| {
                binary(operator, l, r, extra.span())
            }),
            infix(left(3), equality, move |l, operator, r, extra| {
                binary(operator, l, r, extra.span())
            }),
            infix(left(2), just(Token::And), move |l, _, r, extra| {
                logical(LogicalOperator::And, l, r, extra.span())
            }),
            // `||` and `??` share the lowest binary precedence
            infix(left(1), just(Token::Or), move |l, _, r, extra| {
                logical(LogicalOperator::Or, l, r, extra.span())
            }),
            infix(left(1), just(Token::Nullish), move |l, _, r, extra| {
                logical(LogicalOperator::Nullish, l, r, extra.span())
            }),
        ));

        operation
            .then(
                just(Token::Question)
                    .ignore_then(expression.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expression)
                    .or_not(),
            )
            .map_with(|(test, branches), extra| match branches {
                Some((consequent, alternate)) => spanned(
                    Expression::Conditional {
                        test: Box::new(test),
                        consequent: Box::new(consequent),
                        alternate: Box::new(alternate),
                    },
                    extra.span(),
                ),
                None => test,
            })
    })
}

/// A parsed expression together with its source text.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    source: Rc<str>,
    ast: Rc<Spanned<Expression>>,
}

impl CompiledExpression {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &Spanned<Expression> {
        &self.ast
    }
}

/// Lexes and parses one expression; the whole input has to be consumed.
pub fn compile(source: &str) -> Result<CompiledExpression, ExpressionError> {
    let syntax_error = |errors: Vec<SyntaxError>| ExpressionError::Syntax {
        expression: source.to_string(),
        errors,
    };

    let (tokens, lex_errors) = lexer().parse(source).into_output_errors();
    if !lex_errors.is_empty() {
        return Err(syntax_error(
            lex_errors
                .into_iter()
                .map(|error| SyntaxError {
                    message: error.to_string(),
                    span: *error.span(),
                })
                .collect(),
        ));
    }
    let tokens = tokens.unwrap_or_default();
    let end_span = Span::from(source.len()..source.len());
    if tokens.is_empty() {
        return Err(syntax_error(vec![SyntaxError {
            message: "empty expression".to_string(),
            span: end_span,
        }]));
    }

    let input = tokens.map(end_span, |Spanned { node, span }| (node, span));
    let ast = parser()
        .then_ignore(end())
        .parse(input)
        .into_result()
        .map_err(|errors| {
            syntax_error(
                errors
                    .into_iter()
                    .map(|error| SyntaxError {
                        message: error.to_string(),
                        span: *error.span(),
                    })
                    .collect(),
            )
        })?;

    Ok(CompiledExpression {
        source: source.into(),
        ast: Rc::new(ast),
    })
}
