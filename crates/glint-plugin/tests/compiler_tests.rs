use std::sync::Arc;
use std::time::Duration;

use glint_ipc::{Transport, TransportConfig};
use glint_plugin::{
    CapabilityBridge, Compiler, Component, Instance, MemoryHost, Node, SandboxConfig,
};

fn bridge() -> CapabilityBridge {
    CapabilityBridge::new(
        Arc::new(MemoryHost::new()),
        Transport::new(TransportConfig::default()),
        "main",
    )
}

async fn render_once(component: &Component) -> Node {
    let mut instance = component.mount(&bridge()).unwrap();
    let node = instance.render().await.unwrap();
    instance.unmount().await;
    node
}

#[tokio::test]
async fn test_markup_component_renders() {
    let source = r#"
function Component(props)
  return <div class="greeting">Hello {props.label}</div>
end
"#;
    let component = Compiler::default().compile(source, "hello.luax");
    assert!(!component.is_placeholder());

    let node = render_once(&component).await;
    let div = node.find("div").unwrap();
    assert_eq!(div.props["class"], "greeting");
    assert_eq!(node.text_content(), "Hello main");
}

#[tokio::test]
async fn test_typed_component_renders() {
    let source = r#"
type Props = { label: string }

local function greet(name: string): string
  return "hi " .. name
end

function Component(props: Props): any
  local count: number = 2
  return <span title={greet(props.label)}>{count :: number}</span>
end
"#;
    let component = Compiler::default().compile(source, "typed.tluax");
    assert!(!component.is_placeholder());

    let node = render_once(&component).await;
    let span = node.find("span").unwrap();
    assert_eq!(span.props["title"], "hi main");
    assert_eq!(node.text_content(), "2");
}

#[tokio::test]
async fn test_nested_components_and_fragments() {
    let source = r#"
local function Item(props)
  return <li>{props.name}</li>
end

return function()
  local names = { "a", "b" }
  local items = {}
  for _, name in ipairs(names) do
    items[#items + 1] = <Item name={name} />
  end
  return <>
    <ul>{items}</ul>
    <p>done</p>
  </>
end
"#;
    let component = Compiler::default().compile(source, "list.luax");
    let node = render_once(&component).await;

    let Node::Fragment(children) = &node else {
        panic!("expected a fragment, got {node:?}");
    };
    assert_eq!(children.len(), 2);
    assert_eq!(node.find("ul").unwrap().children.len(), 2);
    assert_eq!(node.text_content(), "a b done");
}

#[tokio::test]
async fn test_invalid_source_becomes_compile_placeholder() {
    let component = Compiler::default().compile("function Component() return <div> end", "bad.luax");
    assert!(component.is_placeholder());

    let mut instance = component.mount(&bridge()).unwrap();
    assert!(matches!(instance, Instance::Static(_)));
    let node = instance.render().await.unwrap();
    assert!(node.text_content().contains("Compile Error: bad.luax"));
}

#[tokio::test]
async fn test_runtime_error_becomes_execution_placeholder() {
    let component = Compiler::default().compile("error('boom')", "boom.luax");
    let node = render_once(&component).await;
    assert_eq!(node.text_content(), "Execution Error: boom.luax");

    let Node::Element(element) = &node else {
        panic!("expected an element");
    };
    assert!(element.props["title"].as_str().unwrap().contains("boom"));
}

#[tokio::test]
async fn test_missing_export_placeholder() {
    let component = Compiler::default().compile("local x = 1", "empty.luax");
    let node = render_once(&component).await;
    assert_eq!(node.text_content(), "No component exported from empty.luax");
}

#[tokio::test]
async fn test_sandbox_globals_unreachable() {
    let component = Compiler::default().compile("os.exit(1)", "escape.luax");
    let node = render_once(&component).await;
    assert_eq!(node.text_content(), "Execution Error: escape.luax");
}

#[tokio::test]
async fn test_instruction_budget_stops_module() {
    let compiler = Compiler::new(SandboxConfig {
        max_memory: 0,
        max_instructions: 100_000,
    });
    let component = compiler.compile("while true do end", "spin.luax");
    let node = render_once(&component).await;
    assert_eq!(node.text_content(), "Execution Error: spin.luax");
}

#[tokio::test]
async fn test_instruction_budget_applies_to_render() {
    let compiler = Compiler::new(SandboxConfig {
        max_memory: 0,
        max_instructions: 100_000,
    });
    let source = "function Component() local n = 0 while true do n = n + 1 end return n end";
    let component = compiler.compile(source, "spin.luax");
    assert!(!component.is_placeholder());

    let mut instance = component.mount(&bridge()).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), instance.render())
        .await
        .expect("render must stop on its own")
        .unwrap_err();
    assert!(err.to_string().contains("spin.luax"));
    assert!(err.to_string().contains("instruction budget"));
}

#[tokio::test]
async fn test_instruction_budget_applies_to_function_tags() {
    let compiler = Compiler::new(SandboxConfig {
        max_memory: 0,
        max_instructions: 100_000,
    });
    let source = r#"
function Spin()
  while true do end
end

function Component()
  return <div><Spin /></div>
end
"#;
    let component = compiler.compile(source, "tags.luax");
    assert!(!component.is_placeholder());

    let mut instance = component.mount(&bridge()).unwrap();
    let err = tokio::time::timeout(Duration::from_secs(10), instance.render())
        .await
        .expect("render must stop on its own")
        .unwrap_err();
    assert!(err.to_string().contains("instruction budget"));
}

#[tokio::test]
async fn test_each_render_gets_a_fresh_budget() {
    let compiler = Compiler::new(SandboxConfig {
        max_memory: 0,
        max_instructions: 100_000,
    });
    let source = r#"
function Component()
  local n = 0
  for i = 1, 20000 do n = n + 1 end
  return <span>{tostring(n)}</span>
end
"#;
    let component = compiler.compile(source, "busy.luax");
    let mut instance = component.mount(&bridge()).unwrap();
    for _ in 0..5 {
        assert_eq!(instance.render().await.unwrap().text_content(), "20000");
    }
}

#[tokio::test]
async fn test_memory_limit_stops_module() {
    let compiler = Compiler::new(SandboxConfig {
        max_memory: 4 * 1024 * 1024,
        max_instructions: 0,
    });
    let source = "local t = {} for i = 1, 10000000 do t[i] = string.rep('x', 64) .. i end";
    let component = compiler.compile(source, "hog.luax");
    let node = render_once(&component).await;
    assert_eq!(node.text_content(), "Execution Error: hog.luax");
}
