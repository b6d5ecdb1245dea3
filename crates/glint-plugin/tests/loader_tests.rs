use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use glint_plugin::{
    BoxFuture, Compiler, Component, HostRpc, LoadState, MemoryHost, PlaceholderKind, PluginError,
    PluginLoader, PluginResult,
};
use serde_json::Value;
use tokio::sync::Notify;

const GOOD_TYPED: &str = r#"
function Component(props: { label: string })
  return <p>{props.label}</p>
end
"#;

fn loader(host: Arc<dyn HostRpc>) -> PluginLoader {
    PluginLoader::new(host, Compiler::default())
}

#[tokio::test]
async fn test_fetch_failure_is_recorded_per_plugin() {
    let host = Arc::new(
        MemoryHost::new()
            .with_file("a.tluax", GOOD_TYPED)
            .with_failing_file("b.luax", "permission denied"),
    );
    let loader = loader(host);

    let plugins = loader.load().await.unwrap();
    assert_eq!(plugins.len(), 2);

    assert_eq!(plugins[0].name, "a");
    assert_eq!(plugins[0].filename, "a.tluax");
    assert_eq!(plugins[0].error, None);
    assert!(!plugins[0].component.is_placeholder());

    assert_eq!(plugins[1].name, "b");
    assert_eq!(plugins[1].error.as_deref(), Some("permission denied"));
    match &plugins[1].component {
        Component::Placeholder(placeholder) => {
            assert_eq!(placeholder.kind, PlaceholderKind::Fetch);
            assert_eq!(placeholder.headline(), "Failed: b.luax");
            assert_eq!(
                placeholder.message,
                "Failed to fetch plugin 'b.luax': permission denied"
            );
        }
        other => panic!("expected a placeholder, got {other:?}"),
    }

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.state, LoadState::Ready);
    assert_eq!(snapshot.error, None);
    assert_eq!(snapshot.plugins.len(), 2);
}

#[tokio::test]
async fn test_discovery_failure_empties_collection() {
    let host = Arc::new(
        MemoryHost::new()
            .with_file("a.luax", "return function() end")
            .with_discovery_error("host offline"),
    );
    let loader = loader(host.clone());

    let err = loader.load().await.unwrap_err();
    assert!(matches!(err, PluginError::Discovery { .. }));

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.state, LoadState::Errored);
    assert!(snapshot.plugins.is_empty());
    assert!(snapshot.error.unwrap().contains("host offline"));
    assert_eq!(host.read_count(), 0);
}

#[tokio::test]
async fn test_order_and_names_follow_discovery() {
    let host = Arc::new(
        MemoryHost::new()
            .with_file("zeta.luax", "return function() return 'z' end")
            .with_file("alpha.tluax", GOOD_TYPED)
            .with_file("broken.luax", "return <div")
            .with_file("odd.name.lua", "return function() end"),
    );
    let plugins = loader(host).load().await.unwrap();

    let names: Vec<_> = plugins.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["zeta", "alpha", "broken", "odd.name.lua"]);
    assert!(plugins[2].component.is_placeholder());
    assert_eq!(plugins[2].error, None);
}

#[tokio::test]
async fn test_reload_replaces_collection() {
    let host = Arc::new(MemoryHost::new().with_file("a.luax", "return function() end"));
    let loader = loader(host.clone());
    let mut updates = loader.subscribe();

    let first = loader.load().await.unwrap();
    assert_eq!(first.len(), 1);

    host.remove_file("a.luax");
    host.set_file("b.luax", "return function() end");
    host.set_file("c.luax", "return function() end");
    let second = loader.load().await.unwrap();

    let names: Vec<_> = second.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["b", "c"]);
    assert_eq!(first.len(), 1);

    assert!(updates.has_changed().unwrap());
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.plugins.len(), 2);
}

/// A host whose first read blocks until released.
struct GatedHost {
    inner: MemoryHost,
    gate: Notify,
    entered: Notify,
    gated: AtomicBool,
}

impl HostRpc for GatedHost {
    fn list_plugin_files(&self) -> BoxFuture<'_, PluginResult<Vec<String>>> {
        self.inner.list_plugin_files()
    }

    fn read_plugin_file<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, PluginResult<String>> {
        Box::pin(async move {
            if !self.gated.swap(true, Ordering::SeqCst) {
                self.entered.notify_one();
                self.gate.notified().await;
            }
            self.inner.read_plugin_file(filename).await
        })
    }

    fn invoke<'a>(&'a self, command: &'a str, args: Value) -> BoxFuture<'a, PluginResult<Value>> {
        self.inner.invoke(command, args)
    }

    fn open_external<'a>(&'a self, url: &'a str) -> BoxFuture<'a, PluginResult<()>> {
        self.inner.open_external(url)
    }
}

#[tokio::test]
async fn test_loading_clears_previous_error() {
    let host = Arc::new(GatedHost {
        inner: MemoryHost::new()
            .with_file("a.luax", "return function() return 'a' end")
            .with_discovery_error("host offline"),
        gate: Notify::new(),
        entered: Notify::new(),
        gated: AtomicBool::new(false),
    });
    let loader = Arc::new(loader(host.clone()));

    loader.load().await.unwrap_err();
    assert!(loader.snapshot().error.is_some());

    host.inner.set_discovery_error(None);
    let retry = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load().await })
    };
    host.entered.notified().await;

    let loading = loader.snapshot();
    assert_eq!(loading.state, LoadState::Loading);
    assert_eq!(loading.error, None);
    assert_eq!(loading.generation, 2);

    host.gate.notify_one();
    assert_eq!(retry.await.unwrap().unwrap().len(), 1);
    assert_eq!(loader.snapshot().state, LoadState::Ready);
}

#[tokio::test]
async fn test_superseded_load_publishes_nothing() {
    let host = Arc::new(GatedHost {
        inner: MemoryHost::new()
            .with_file("a.luax", "return function() return 'a' end")
            .with_file("b.luax", "return function() return 'b' end"),
        gate: Notify::new(),
        entered: Notify::new(),
        gated: AtomicBool::new(false),
    });
    let loader = Arc::new(loader(host.clone()));

    let stale = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.load().await })
    };
    host.entered.notified().await;

    let fresh = loader.load().await.unwrap();
    assert_eq!(fresh.len(), 2);
    assert_eq!(loader.snapshot().generation, 2);

    host.gate.notify_one();
    let err = stale.await.unwrap().unwrap_err();
    assert!(matches!(err, PluginError::Superseded { generation: 2 }));

    let snapshot = loader.snapshot();
    assert_eq!(snapshot.state, LoadState::Ready);
    assert_eq!(snapshot.generation, 2);
    assert!(Arc::ptr_eq(&snapshot.plugins, &fresh));
}
