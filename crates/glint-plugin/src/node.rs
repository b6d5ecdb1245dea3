//! Rendered component output.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One node of a rendered tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// Literal text.
    Text(String),

    /// A host element such as `div`.
    Element(Element),

    /// Siblings without a wrapper.
    Fragment(Vec<Node>),
}

/// A host element with plain-data props.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub tag: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub props: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            props: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn child(mut self, node: Node) -> Self {
        self.children.push(node);
        self
    }
}

impl Node {
    /// An empty fragment.
    pub fn empty() -> Self {
        Self::Fragment(Vec::new())
    }

    /// All text in document order, joined by single spaces.
    pub fn text_content(&self) -> String {
        let mut parts = Vec::new();
        self.collect_text(&mut parts);
        parts.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).join(" ")
    }

    fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Text(text) => out.push(text),
            Self::Element(element) => element.children.iter().for_each(|c| c.collect_text(out)),
            Self::Fragment(children) => children.iter().for_each(|c| c.collect_text(out)),
        }
    }

    /// Depth-first search for the first element with `tag`.
    pub fn find(&self, tag: &str) -> Option<&Element> {
        match self {
            Self::Text(_) => None,
            Self::Element(element) if element.tag == tag => Some(element),
            Self::Element(element) => element.children.iter().find_map(|c| c.find(tag)),
            Self::Fragment(children) => children.iter().find_map(|c| c.find(tag)),
        }
    }

    /// Indented outline of the tree, one node per line.
    pub fn outline(&self) -> String {
        let mut lines = Vec::new();
        self.outline_into(0, &mut lines);
        lines.join("\n")
    }

    fn outline_into(&self, depth: usize, lines: &mut Vec<String>) {
        let indent = "  ".repeat(depth);
        match self {
            Self::Text(text) => {
                let text = text.trim();
                if !text.is_empty() {
                    lines.push(format!("{indent}{text}"));
                }
            }
            Self::Element(element) => {
                let props = element
                    .props
                    .iter()
                    .map(|(k, v)| match v {
                        Value::String(s) => format!(" {k}=\"{s}\""),
                        other => format!(" {k}={other}"),
                    })
                    .join("");
                lines.push(format!("{indent}<{}{props}>", element.tag));
                for child in &element.children {
                    child.outline_into(depth + 1, lines);
                }
            }
            Self::Fragment(children) => {
                for child in children {
                    child.outline_into(depth, lines);
                }
            }
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}
