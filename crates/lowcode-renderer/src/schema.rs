//! Serialized node tree and the prop marker protocol.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::RenderError;

/// Correlation data the host attaches to nodes without a durable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCtx {
    pub lce_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idx: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub component_name: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub props: IndexMap<String, JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<JsonValue>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_data: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub loop_args: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub state: IndexMap<String, JsonValue>,
    #[serde(rename = "__ctx", default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<NodeCtx>,
}

/// How a raw prop value is to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PropValue<'a> {
    Expression(&'a str),
    Function(&'a str),
    I18n {
        key: &'a str,
        params: Option<&'a JsonValue>,
    },
    Slot(&'a JsonValue),
    Literal(&'a JsonValue),
}

impl<'a> PropValue<'a> {
    pub fn classify(value: &'a JsonValue) -> Self {
        let JsonValue::Object(fields) = value else {
            return Self::Literal(value);
        };
        let source = || fields.get("value").and_then(JsonValue::as_str);
        match fields.get("type").and_then(JsonValue::as_str) {
            Some("JSExpression") => source().map_or(Self::Literal(value), Self::Expression),
            Some("JSFunction") => source().map_or(Self::Literal(value), Self::Function),
            Some("i18n") => match fields.get("key").and_then(JsonValue::as_str) {
                Some(key) => Self::I18n {
                    key,
                    params: fields.get("params"),
                },
                None => Self::Literal(value),
            },
            Some("JSSlot") => Self::Slot(value),
            _ => Self::Literal(value),
        }
    }
}

/// A `JSSlot` prop: named slot content plus the parameter names it binds.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSchema {
    pub name: String,
    pub params: Vec<String>,
    pub nodes: Vec<SchemaNode>,
}

impl SlotSchema {
    fn parse(name: &str, slot: &JsonValue) -> Result<Self, serde_json::Error> {
        let params = match slot.get("params") {
            Some(params) => serde_json::from_value(params.clone())?,
            None => Vec::new(),
        };
        let nodes = match slot.get("value") {
            Some(JsonValue::Array(items)) => items
                .iter()
                .map(|item| serde_json::from_value(item.clone()))
                .collect::<Result<_, _>>()?,
            Some(JsonValue::Null) | None => Vec::new(),
            Some(single) => vec![serde_json::from_value(single.clone())?],
        };
        Ok(Self {
            name: name.to_string(),
            params,
            nodes,
        })
    }
}

impl SchemaNode {
    pub fn new(component_name: impl Into<String>) -> Self {
        Self {
            component_name: component_name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_prop(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.props.insert(name.into(), value);
        self
    }

    pub fn with_child(mut self, child: SchemaNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn from_json(json: &JsonValue) -> Result<Self, serde_json::Error> {
        Self::deserialize(json)
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    /// `${lceKey}_${idx}` when `__ctx` is present, else the node id.
    pub fn render_key(&self) -> Option<String> {
        match (&self.ctx, &self.id) {
            (Some(ctx), _) => Some(format!("{}_{}", ctx.lce_key, ctx.idx.unwrap_or(0))),
            (None, Some(id)) => Some(id.clone()),
            (None, None) => None,
        }
    }

    pub fn require_render_key(&self) -> Result<String, RenderError> {
        self.render_key().ok_or_else(|| RenderError::MissingRenderKey {
            component_name: self.component_name.clone(),
        })
    }

    /// Copy of this node without its children.
    pub fn without_children(&self) -> SchemaNode {
        SchemaNode {
            id: self.id.clone(),
            component_name: self.component_name.clone(),
            props: self.props.clone(),
            children: Vec::new(),
            condition: self.condition.clone(),
            loop_data: self.loop_data.clone(),
            loop_args: self.loop_args.clone(),
            state: self.state.clone(),
            ctx: self.ctx.clone(),
        }
    }

    /// Names bound to a loop item and its index.
    pub fn loop_bindings(&self) -> (&str, &str) {
        let name = |position: usize, default: &'static str| {
            self.loop_args
                .get(position)
                .map(String::as_str)
                .filter(|name| !name.is_empty())
                .unwrap_or(default)
        };
        (name(0, "item"), name(1, "index"))
    }

    /// Props holding `JSSlot` markers, parsed.
    pub fn slots(&self) -> Result<Vec<SlotSchema>, serde_json::Error> {
        self.props
            .iter()
            .filter_map(|(name, value)| match PropValue::classify(value) {
                PropValue::Slot(slot) => Some(SlotSchema::parse(name, slot)),
                _ => None,
            })
            .collect()
    }

    /// Depth-first visit of this node, its children and slot content.
    pub fn walk(&self, visit: &mut dyn FnMut(&SchemaNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
        if let Ok(slots) = self.slots() {
            for slot in slots {
                for node in &slot.nodes {
                    node.walk(visit);
                }
            }
        }
    }

    /// Finds a node by id among this node, its children and slot content.
    pub fn find(&self, id: &str) -> Option<SchemaNode> {
        let mut found = None;
        self.walk(&mut |node| {
            if found.is_none() && node.id.as_deref() == Some(id) {
                found = Some(node.clone());
            }
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_key_prefers_ctx_over_id() {
        let mut node = SchemaNode::new("Text").with_id("node_1");
        assert_eq!(node.render_key().as_deref(), Some("node_1"));

        node.ctx = Some(NodeCtx {
            lce_key: "lce".to_string(),
            idx: None,
        });
        assert_eq!(node.render_key().as_deref(), Some("lce_0"));

        node.ctx = Some(NodeCtx {
            lce_key: "lce".to_string(),
            idx: Some(3),
        });
        assert_eq!(node.render_key().as_deref(), Some("lce_3"));
    }

    #[test]
    fn missing_key_is_an_error() {
        let node = SchemaNode::new("Text");
        assert!(matches!(
            node.require_render_key(),
            Err(RenderError::MissingRenderKey { component_name }) if component_name == "Text"
        ));
    }

    #[test]
    fn deserializes_protocol_fields() {
        let node = SchemaNode::from_json(&json!({
            "componentName": "List",
            "id": "list",
            "loop": {"type": "JSExpression", "value": "this.items"},
            "loopArgs": ["row", ""],
            "__ctx": {"lceKey": "k", "idx": 2},
            "props": {
                "header": {"type": "JSSlot", "params": ["title"], "value": [{"componentName": "Text", "id": "t"}]}
            }
        }))
        .unwrap();

        assert_eq!(node.loop_bindings(), ("row", "index"));
        assert_eq!(node.render_key().as_deref(), Some("k_2"));
        let slots = node.slots().unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].name, "header");
        assert_eq!(slots[0].params, ["title"]);
        assert_eq!(slots[0].nodes[0].id.as_deref(), Some("t"));
        assert!(node.find("t").is_some());

        let back = node.to_json();
        assert_eq!(back["loopArgs"], json!(["row", ""]));
        assert_eq!(back["__ctx"]["lceKey"], "k");
    }

    #[test]
    fn classify_markers() {
        let expression = json!({"type": "JSExpression", "value": "1 + 1"});
        assert_eq!(PropValue::classify(&expression), PropValue::Expression("1 + 1"));
        let i18n = json!({"type": "i18n", "key": "hello"});
        assert!(matches!(PropValue::classify(&i18n), PropValue::I18n { key: "hello", params: None }));
        let plain = json!({"type": "primary"});
        assert_eq!(PropValue::classify(&plain), PropValue::Literal(&plain));
    }
}
