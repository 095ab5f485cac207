//! Error types for expression evaluation, rendering and the document host.

use ariadne::{Config, Label, Report, ReportKind, Source};
use thiserror::Error;

use crate::parser::Span;

/// An expression reads `this` while `this` is required and nothing binds it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("expression `{expression}` reads `this`, but no `this` binding is in scope")]
pub struct ExpressionBindingError {
    pub expression: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error(transparent)]
    Binding(#[from] ExpressionBindingError),
    #[error("syntax error in `{expression}`: {}", .errors.iter().map(|error| error.message.as_str()).collect::<Vec<_>>().join("; "))]
    Syntax {
        expression: String,
        errors: Vec<SyntaxError>,
    },
    #[error("`{name}` is not defined")]
    UnknownIdentifier { name: String, span: Span },
    #[error("`{callee}` is not a function")]
    NotCallable { callee: String, span: Span },
    #[error("{message}")]
    Type { message: String, span: Span },
    #[error("{name}: {message}")]
    NativeCall { name: String, message: String },
}

impl ExpressionError {
    pub fn span(&self) -> Option<Span> {
        match self {
            Self::Binding(error) => Some(error.span),
            Self::Syntax { errors, .. } => errors.first().map(|error| error.span),
            Self::UnknownIdentifier { span, .. }
            | Self::NotCallable { span, .. }
            | Self::Type { span, .. } => Some(*span),
            Self::NativeCall { .. } => None,
        }
    }

    /// Renders the error against its expression source as an ariadne report.
    pub fn report(&self, source_name: &str, source: &str) -> String {
        let mut labels: Vec<(Span, String)> = match self {
            Self::Syntax { errors, .. } => errors
                .iter()
                .map(|error| (error.span, error.message.clone()))
                .collect(),
            other => other
                .span()
                .map(|span| vec![(span, other.to_string())])
                .unwrap_or_default(),
        };
        let end = source.len();
        let anchor = labels
            .first()
            .map(|(span, _)| span.start.min(end)..span.end.min(end))
            .unwrap_or(0..0);
        let mut report = Report::build(ReportKind::Error, (source_name, anchor))
            .with_config(Config::default().with_color(false))
            .with_message(self.to_string());
        for (span, message) in labels.drain(..) {
            report = report.with_label(
                Label::new((source_name, span.start.min(end)..span.end.min(end)))
                    .with_message(message),
            );
        }
        let mut output = Vec::new();
        match report
            .finish()
            .write((source_name, Source::from(source)), &mut output)
        {
            Ok(()) => String::from_utf8_lossy(&output).into_owned(),
            Err(_) => self.to_string(),
        }
    }
}

/// An expression error attributed to the prop it was found in.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("prop `{prop}`: {source}")]
pub struct PropError {
    pub prop: String,
    #[source]
    pub source: ExpressionError,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("prop `{prop}` of `{component_name}`: {source}")]
    Prop {
        component_name: String,
        prop: String,
        #[source]
        source: ExpressionError,
    },
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error("node `{component_name}` has neither `id` nor `__ctx`, its render key cannot be derived")]
    MissingRenderKey { component_name: String },
    #[error("`loop` of `{component_name}` must produce a list, found {found}")]
    LoopNotList {
        component_name: String,
        found: &'static str,
    },
    #[error("invalid slot content in `{component_name}`: {source}")]
    Slot {
        component_name: String,
        #[source]
        source: serde_json::Error,
    },
}

impl RenderError {
    pub fn prop(component_name: &str, error: PropError) -> Self {
        Self::Prop {
            component_name: component_name.to_string(),
            prop: error.prop,
            source: error.source,
        }
    }

    /// The underlying expression error, if any.
    pub fn expression_error(&self) -> Option<&ExpressionError> {
        match self {
            Self::Prop { source, .. } => Some(source),
            Self::Expression(error) => Some(error),
            Self::MissingRenderKey { .. } | Self::LoopNotList { .. } | Self::Slot { .. } => None,
        }
    }

    pub fn is_binding_error(&self) -> bool {
        matches!(self.expression_error(), Some(ExpressionError::Binding(_)))
    }
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("node `{0}` not found")]
    NodeNotFound(String),
    #[error("invalid schema: {0}")]
    Schema(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::span::SimpleSpan;

    #[test]
    fn report_labels_the_failing_span() {
        let error = ExpressionError::UnknownIdentifier {
            name: "missing".to_string(),
            span: SimpleSpan::from(4..11),
        };
        let report = error.report("title", "1 + missing");
        assert!(report.contains("`missing` is not defined"));
        assert!(report.contains("title"));
    }

    #[test]
    fn render_error_exposes_binding_errors() {
        let error = RenderError::Prop {
            component_name: "Text".to_string(),
            prop: "content".to_string(),
            source: ExpressionBindingError {
                expression: "this.x".to_string(),
                span: SimpleSpan::from(0..4),
            }
            .into(),
        };
        assert!(error.is_binding_error());
        assert!(error.to_string().contains("content"));
    }
}
