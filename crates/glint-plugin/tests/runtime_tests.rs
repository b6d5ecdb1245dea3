use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::SinkExt;
use glint_ipc::{ExecService, ServiceConfig, Transport, TransportConfig};
use glint_plugin::{
    BoxFuture, CapabilityBridge, Compiler, Instance, MemoryHost, PluginResult,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};

type Records = Arc<Mutex<Vec<Value>>>;

/// A host with a `record` command that stores its arguments.
fn recording_host() -> (Arc<MemoryHost>, Records) {
    let records: Records = Arc::default();
    let host = Arc::new(MemoryHost::new());
    let sink = records.clone();
    host.register(
        "record",
        Arc::new(move |args| {
            sink.lock().unwrap().push(args);
            Box::pin(async { Ok(Value::Null) }) as BoxFuture<'static, PluginResult<Value>>
        }),
    );
    (host, records)
}

fn disconnected() -> Transport {
    Transport::new(TransportConfig::default())
}

fn attached() -> (Transport, Framed<DuplexStream, LinesCodec>) {
    let transport = disconnected();
    let (client, server) = tokio::io::duplex(64 * 1024);
    transport.attach(client).unwrap();
    (transport, Framed::new(server, LinesCodec::new()))
}

fn mount(source: &str, filename: &str, bridge: &CapabilityBridge) -> Instance {
    let component = Compiler::default().compile(source, filename);
    assert!(!component.is_placeholder(), "{filename} did not compile");
    component.mount(bridge).unwrap()
}

#[tokio::test]
async fn test_state_survives_rerender() {
    let source = r#"
function Component()
  local count, set_count = use_state(0)
  use_effect(function()
    set_count(function(n) return n + 1 end)
  end, {})
  return <b>{count}</b>
end
"#;
    let bridge = CapabilityBridge::new(Arc::new(MemoryHost::new()), disconnected(), "main");
    let mut instance = mount(source, "counter.luax", &bridge);

    assert_eq!(instance.render().await.unwrap().text_content(), "0");
    assert_eq!(instance.commit().await.unwrap(), 1);
    assert!(instance.is_dirty());

    assert_eq!(instance.render().await.unwrap().text_content(), "1");
    assert_eq!(instance.commit().await.unwrap(), 0);
    assert!(!instance.is_dirty());
}

#[tokio::test]
async fn test_effect_cleanup_order() {
    let source = r#"
function Component(props)
  local step, set_step = use_state(1)
  use_effect(function()
    props.invoke("record", { event = "run", step = step })
    return function()
      props.invoke("record", { event = "cleanup", step = step })
    end
  end, { step })
  if step < 2 then
    set_step(2)
  end
  return <i>{step}</i>
end
"#;
    let (host, records) = recording_host();
    let bridge = CapabilityBridge::new(host, disconnected(), "main");
    let mut instance = mount(source, "steps.luax", &bridge);

    instance.render().await.unwrap();
    instance.commit().await.unwrap();
    assert!(instance.is_dirty());
    assert_eq!(instance.render().await.unwrap().text_content(), "2");
    instance.commit().await.unwrap();
    instance.unmount().await;

    assert_eq!(
        *records.lock().unwrap(),
        vec![
            json!({"event": "run", "step": 1}),
            json!({"event": "cleanup", "step": 1}),
            json!({"event": "run", "step": 2}),
            json!({"event": "cleanup", "step": 2}),
        ]
    );
}

#[tokio::test]
async fn test_hook_order_violation_is_a_render_error() {
    let source = r#"
local first = true
function Component()
  if first then
    first = false
    use_state(1)
  else
    use_ref(1)
  end
  return "x"
end
"#;
    let bridge = CapabilityBridge::new(Arc::new(MemoryHost::new()), disconnected(), "main");
    let mut instance = mount(source, "fickle.luax", &bridge);

    instance.render().await.unwrap();
    let err = instance.render().await.unwrap_err();
    assert!(err.to_string().contains("hook order changed"));
}

#[tokio::test]
async fn test_open_external_from_lua() {
    let source = r#"
function Component(props)
  use_effect(function()
    props.open_external("https://example.com")
    local ok, err = pcall(props.open_external, "not a url")
    props.invoke("record", { ok = ok, err = tostring(err) })
  end, {})
  return nil
end
"#;
    let (host, records) = recording_host();
    let bridge = CapabilityBridge::new(host.clone(), disconnected(), "main");
    let mut instance = mount(source, "links.luax", &bridge);

    instance.render().await.unwrap();
    instance.commit().await.unwrap();

    assert_eq!(host.opened(), vec!["https://example.com".to_string()]);
    let records = records.lock().unwrap();
    assert_eq!(records[0]["ok"], false);
    assert!(records[0]["err"].as_str().unwrap().contains("Invalid URL: not a url"));
}

#[tokio::test]
async fn test_listener_receives_events_until_unmount() {
    let source = r#"
function Component(props)
  local value, set_value = use_state("none")
  use_effect(function()
    return props.listen("cpu", function(event)
      set_value(tostring(event.data))
    end)
  end, {})
  return <span>{value}</span>
end
"#;
    let (transport, mut peer) = attached();
    let bridge = CapabilityBridge::new(Arc::new(MemoryHost::new()), transport.clone(), "main");
    let mut instance = mount(source, "cpu.luax", &bridge);

    assert_eq!(instance.render().await.unwrap().text_content(), "none");
    instance.commit().await.unwrap();
    assert_eq!(transport.subscriber_count("cpu"), 1);

    peer.send(json!({"type": "cpu", "data": 42}).to_string())
        .await
        .unwrap();

    let delivered = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let count = instance.pump_events().await.unwrap();
            if count > 0 {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(delivered, 1);
    assert!(instance.is_dirty());
    assert_eq!(instance.render().await.unwrap().text_content(), "42");

    instance.unmount().await;
    assert_eq!(transport.subscriber_count("cpu"), 0);
}

#[tokio::test]
async fn test_exec_through_service() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("load.sh"), "echo '{\"load\": 0.5}'\n").unwrap();
    fs::write(dir.path().join("fail.sh"), "echo nope >&2\nexit 3\n").unwrap();

    let service = ExecService::new(ServiceConfig {
        scripts_dir: dir.path().to_path_buf(),
        max_frame_len: 64 * 1024,
    });
    let transport = disconnected();
    let (client, server) = tokio::io::duplex(64 * 1024);
    transport.attach(client).unwrap();
    tokio::spawn(async move { service.handle_connection(server).await });

    let source = r#"
function Component(props)
  use_effect(function()
    local result = props.exec("load.sh")
    local ok, err = pcall(props.exec, "fail.sh", { "a" })
    props.invoke("record", { load = result.load, ok = ok, err = tostring(err) })
  end, {})
  return nil
end
"#;
    let (host, records) = recording_host();
    let bridge = CapabilityBridge::new(host, transport, "main");
    let mut instance = mount(source, "exec.luax", &bridge);

    instance.render().await.unwrap();
    instance.commit().await.unwrap();

    let records = records.lock().unwrap();
    assert_eq!(records[0]["load"], 0.5);
    assert_eq!(records[0]["ok"], false);
    assert!(records[0]["err"].as_str().unwrap().contains("nope"));
}
