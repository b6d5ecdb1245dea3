//! Renderable components: compiled scripts and diagnostic placeholders.

use std::sync::Arc;

use serde_json::json;
use strum::{Display, IntoStaticStr};

use crate::bridge::CapabilityBridge;
use crate::lua::{ScriptComponent, ScriptInstance};
use crate::node::{Element, Node};
use crate::types::PluginResult;

/// Why a plugin was replaced by a placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum PlaceholderKind {
    /// The source failed to transform or parse.
    Compile,

    /// The module body raised an error.
    Execution,

    /// The module ran but exported no component.
    MissingExport,

    /// The file could not be fetched.
    Fetch,
}

impl PlaceholderKind {
    fn color(self) -> &'static str {
        match self {
            Self::Compile | Self::Fetch => "red",
            Self::Execution => "orange",
            Self::MissingExport => "yellow",
        }
    }
}

/// A stand-in component that renders a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    pub filename: String,
    pub message: String,
}

impl Placeholder {
    pub fn new(kind: PlaceholderKind, filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            filename: filename.into(),
            message: message.into(),
        }
    }

    /// The visible diagnostic line.
    pub fn headline(&self) -> String {
        let filename = &self.filename;
        match self.kind {
            PlaceholderKind::Compile => format!("Compile Error: {filename}"),
            PlaceholderKind::Execution => format!("Execution Error: {filename}"),
            PlaceholderKind::MissingExport => format!("No component exported from {filename}"),
            PlaceholderKind::Fetch => format!("Failed: {filename}"),
        }
    }

    pub fn render(&self) -> Node {
        Element::new("div")
            .prop(
                "style",
                json!({"color": self.kind.color(), "fontSize": "12px", "padding": "4px"}),
            )
            .prop("title", self.message.clone())
            .prop("data-placeholder", <&str>::from(self.kind))
            .child(Node::Text(self.headline()))
            .into()
    }
}

/// What a compiled plugin renders.
#[derive(Debug, Clone)]
pub enum Component {
    Script(Arc<ScriptComponent>),
    Placeholder(Arc<Placeholder>),
}

impl Component {
    pub fn placeholder(kind: PlaceholderKind, filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Placeholder(Arc::new(Placeholder::new(kind, filename, message)))
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }

    pub fn filename(&self) -> &str {
        match self {
            Self::Script(script) => script.filename(),
            Self::Placeholder(placeholder) => &placeholder.filename,
        }
    }

    /// Create an instance wired to `bridge`.
    pub fn mount(&self, bridge: &CapabilityBridge) -> PluginResult<Instance> {
        match self {
            Self::Script(script) => Ok(Instance::Script(script.mount(bridge)?)),
            Self::Placeholder(placeholder) => Ok(Instance::Static(placeholder.render())),
        }
    }
}

/// A mounted component.
#[derive(Debug)]
pub enum Instance {
    Script(ScriptInstance),
    Static(Node),
}

impl Instance {
    pub async fn render(&mut self) -> PluginResult<Node> {
        match self {
            Self::Script(instance) => instance.render().await,
            Self::Static(node) => Ok(node.clone()),
        }
    }

    pub async fn commit(&mut self) -> PluginResult<usize> {
        match self {
            Self::Script(instance) => instance.commit().await,
            Self::Static(_) => Ok(0),
        }
    }

    pub async fn pump_events(&mut self) -> PluginResult<usize> {
        match self {
            Self::Script(instance) => instance.pump_events().await,
            Self::Static(_) => Ok(0),
        }
    }

    pub fn is_dirty(&self) -> bool {
        match self {
            Self::Script(instance) => instance.is_dirty(),
            Self::Static(_) => false,
        }
    }

    pub async fn unmount(&mut self) {
        if let Self::Script(instance) = self {
            instance.unmount().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_headlines() {
        let cases = [
            (PlaceholderKind::Compile, "Compile Error: a.luax"),
            (PlaceholderKind::Execution, "Execution Error: a.luax"),
            (PlaceholderKind::MissingExport, "No component exported from a.luax"),
            (PlaceholderKind::Fetch, "Failed: a.luax"),
        ];
        for (kind, expected) in cases {
            assert_eq!(Placeholder::new(kind, "a.luax", "boom").headline(), expected);
        }
    }

    #[test]
    fn test_placeholder_render_carries_message() {
        let node = Placeholder::new(PlaceholderKind::Execution, "a.luax", "boom").render();
        let Node::Element(element) = &node else {
            panic!("expected an element");
        };
        assert_eq!(element.props["title"], "boom");
        assert_eq!(element.props["style"]["color"], "orange");
        assert_eq!(node.text_content(), "Execution Error: a.luax");
    }
}
