//! Message lookup for `i18n` prop markers.

use std::rc::Rc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::{Captures, Regex};

use crate::value::Value;

/// Locale → message key → template.
pub type Messages = IndexMap<String, IndexMap<String, String>>;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\s*([A-Za-z_$][A-Za-z0-9_$]*)\s*\}"));

/// Replaces `{name}` with `params.name`; unknown names are left as written.
pub fn interpolate(template: &str, params: &Value) -> String {
    let Ok(placeholder) = &*PLACEHOLDER else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |captures: &Captures| match params.property(&captures[1]) {
            Value::Undefined => captures[0].to_string(),
            value => value.to_display_string(),
        })
        .into_owned()
}

/// The message for `key` in `locale`, or `key` itself when there is none.
pub fn translate(messages: &Messages, locale: Option<&str>, key: &str, params: &Value) -> String {
    match locale
        .and_then(|locale| messages.get(locale))
        .and_then(|bundle| bundle.get(key))
    {
        Some(template) => interpolate(template, params),
        None => key.to_string(),
    }
}

/// The `i18n(key, params)` function bound into root scopes.
pub fn i18n_function(locale: Option<Rc<str>>, messages: Rc<Messages>) -> Value {
    Value::native("i18n", move |arguments| {
        let key = arguments
            .first()
            .map(Value::to_display_string)
            .unwrap_or_default();
        let params = arguments.get(1).cloned().unwrap_or_default();
        Ok(Value::text(translate(&messages, locale.as_deref(), &key, &params)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages() -> Messages {
        IndexMap::from([
            (
                "en-US".to_string(),
                IndexMap::from([("greeting".to_string(), "Hello, {name}!".to_string())]),
            ),
            (
                "zh-CN".to_string(),
                IndexMap::from([("greeting".to_string(), "你好，{ name }！".to_string())]),
            ),
        ])
    }

    #[test]
    fn translates_with_interpolation() {
        let params = Value::object([("name", Value::text("Ada"))]);
        assert_eq!(translate(&messages(), Some("en-US"), "greeting", &params), "Hello, Ada!");
        assert_eq!(translate(&messages(), Some("zh-CN"), "greeting", &params), "你好，Ada！");
    }

    #[test]
    fn falls_back_to_the_key() {
        assert_eq!(translate(&messages(), Some("fr-FR"), "greeting", &Value::Undefined), "greeting");
        assert_eq!(translate(&messages(), None, "greeting", &Value::Undefined), "greeting");
    }

    #[test]
    fn unknown_placeholders_stay() {
        assert_eq!(interpolate("{count} items", &Value::Undefined), "{count} items");
        let params = Value::object([("count", Value::Number(3.0))]);
        assert_eq!(interpolate("{count} items", &params), "3 items");
    }

    #[test]
    fn scope_function_reads_its_locale() {
        let i18n = i18n_function(Some(Rc::from("en-US")), Rc::new(messages()));
        let Value::Function(i18n) = i18n else {
            panic!("i18n is a function");
        };
        let params = Value::object([("name", Value::text("Lin"))]);
        assert_eq!(
            i18n.call(&[Value::text("greeting"), params]).unwrap(),
            Value::text("Hello, Lin!")
        );
    }
}
