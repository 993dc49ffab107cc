//! Node type for the binary wire format.
//!
//! The server's tree shape is `[tag, attrs, content]` where content is
//! absent, a list of child nodes, a string, or raw bytes. The query façade
//! expresses nodes as JSON arrays, so a lossless mapping in that direction
//! is provided here.

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use super::decoder::DecodeError;

/// Attributes of a node. The legacy wire carries every value as a string.
pub type Attrs = HashMap<String, String>;

/// A single element in the binary tree format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Node {
    pub tag: String,
    pub attrs: Attrs,
    pub content: NodeContent,
}

/// Content of a node
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeContent {
    #[default]
    None,
    Children(Vec<Node>),
    String(String),
    Bytes(Vec<u8>),
}

impl Node {
    /// Create a new node with the given tag
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Attrs::new(),
            content: NodeContent::None,
        }
    }

    /// Set an attribute on this node
    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    /// Get an attribute value
    pub fn get_attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Add a child node
    pub fn add_child(&mut self, child: Node) {
        match &mut self.content {
            NodeContent::Children(children) => children.push(child),
            _ => self.content = NodeContent::Children(vec![child]),
        }
    }

    /// Get children if content is children
    pub fn children(&self) -> Option<&[Node]> {
        match &self.content {
            NodeContent::Children(children) => Some(children),
            _ => None,
        }
    }

    /// Get first child with the given tag
    pub fn get_child_by_tag(&self, tag: &str) -> Option<&Node> {
        self.children()?.iter().find(|n| n.tag == tag)
    }

    /// Get bytes content if present
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Build a node from its JSON array form `[tag, attrs, content]`.
    ///
    /// Attribute values are stringified; content may be null, a string, or
    /// an array of child node arrays.
    pub fn from_json(value: &Value) -> Result<Node, DecodeError> {
        let arr = value
            .as_array()
            .ok_or_else(|| DecodeError("node json must be an array".to_string()))?;
        if arr.is_empty() || arr.len() > 3 {
            return Err(DecodeError(format!(
                "node json must have 1..=3 elements, got {}",
                arr.len()
            )));
        }

        let tag = arr[0]
            .as_str()
            .ok_or_else(|| DecodeError("node tag must be a string".to_string()))?
            .to_string();

        let mut attrs = Attrs::new();
        if let Some(attrs_json) = arr.get(1) {
            match attrs_json {
                Value::Null => {}
                Value::Object(map) => {
                    for (k, v) in map {
                        attrs.insert(k.clone(), json_attr_value(v)?);
                    }
                }
                other => {
                    return Err(DecodeError(format!(
                        "node attrs must be an object or null, got {other}"
                    )))
                }
            }
        }

        let content = match arr.get(2) {
            None | Some(Value::Null) => NodeContent::None,
            Some(Value::String(s)) => NodeContent::String(s.clone()),
            Some(Value::Array(children)) => {
                let mut nodes = Vec::with_capacity(children.len());
                for child in children {
                    nodes.push(Node::from_json(child)?);
                }
                NodeContent::Children(nodes)
            }
            Some(other) => {
                return Err(DecodeError(format!(
                    "node content must be null, a string or an array, got {other}"
                )))
            }
        };

        Ok(Node { tag, attrs, content })
    }

    /// JSON array form of this node. Byte content is rendered as lossy UTF-8.
    pub fn to_json(&self) -> Value {
        let attrs = if self.attrs.is_empty() {
            Value::Null
        } else {
            let mut map = Map::new();
            for (k, v) in &self.attrs {
                map.insert(k.clone(), Value::String(v.clone()));
            }
            Value::Object(map)
        };

        let content = match &self.content {
            NodeContent::None => Value::Null,
            NodeContent::String(s) => Value::String(s.clone()),
            NodeContent::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            NodeContent::Children(children) => {
                Value::Array(children.iter().map(Node::to_json).collect())
            }
        };

        json!([self.tag, attrs, content])
    }
}

fn json_attr_value(v: &Value) -> Result<String, DecodeError> {
    match v {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(DecodeError(format!(
            "unsupported attr value in node json: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let mut node = Node::new("message");
        node.set_attr("id", "123");
        node.set_attr("type", "text");

        assert_eq!(node.tag, "message");
        assert_eq!(node.get_attr("id"), Some("123"));
        assert_eq!(node.get_attr("type"), Some("text"));
    }

    #[test]
    fn test_node_children() {
        let mut parent = Node::new("action");
        parent.add_child(Node::new("chat"));
        parent.add_child(Node::new("user"));

        let children = parent.children().unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].tag, "chat");
        assert_eq!(children[1].tag, "user");
    }

    #[test]
    fn test_from_json_action() {
        let v = json!(["action", {"epoch": "7", "type": "set"}, [["chat", {"jid": "1@c.us"}, null]]]);
        let node = Node::from_json(&v).unwrap();

        assert_eq!(node.tag, "action");
        assert_eq!(node.get_attr("epoch"), Some("7"));
        assert_eq!(node.get_attr("type"), Some("set"));
        let chat = node.get_child_by_tag("chat").unwrap();
        assert_eq!(chat.get_attr("jid"), Some("1@c.us"));
        assert_eq!(chat.content, NodeContent::None);
    }

    #[test]
    fn test_from_json_stringifies_scalars() {
        let v = json!(["action", {"epoch": 7, "last": true}, null]);
        let node = Node::from_json(&v).unwrap();
        assert_eq!(node.get_attr("epoch"), Some("7"));
        assert_eq!(node.get_attr("last"), Some("true"));
    }

    #[test]
    fn test_from_json_rejects_non_array() {
        assert!(Node::from_json(&json!({"tag": "x"})).is_err());
        assert!(Node::from_json(&json!([])).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let v = json!(["query", {"kind": "chat"}, null]);
        let node = Node::from_json(&v).unwrap();
        assert_eq!(node.to_json(), json!(["query", {"kind": "chat"}, null]));
    }
}
