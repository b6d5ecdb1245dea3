//! The `props` table a mounted component receives: the capability bridge
//! exposed to Lua.

use std::sync::{Arc, Mutex};

use glint_core::Message;
use glint_ipc::Subscription;
use mlua::{Function, Lua, Table, Value as LuaValue};
use tracing::warn;

use super::convert::{json_to_lua, lua_to_json};
use crate::bridge::CapabilityBridge;
use crate::types::lock;

fn lua_error(err: impl std::fmt::Display) -> mlua::Error {
    mlua::Error::RuntimeError(err.to_string())
}

struct Listener {
    id: u64,
    subscription: Subscription,
    callback: Function,
}

/// Event listeners registered by one instance through `props.listen`.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    entries: Vec<Listener>,
}

pub(crate) type SharedListeners = Arc<Mutex<Listeners>>;

impl Listeners {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every listener, revoking its subscription.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// Pending events paired with the callback that should receive them.
    pub(crate) fn drain_events(&mut self) -> Vec<(Function, Message)> {
        let mut events = Vec::new();
        for listener in &mut self.entries {
            while let Some(message) = listener.subscription.try_recv() {
                events.push((listener.callback.clone(), message));
            }
        }
        events
    }
}

/// Build the props table for `bridge`.
pub(crate) fn create_props(
    lua: &Lua,
    bridge: &CapabilityBridge,
    listeners: &SharedListeners,
) -> mlua::Result<Table> {
    let props = lua.create_table()?;
    props.raw_set("label", bridge.label())?;

    let b = bridge.clone();
    props.raw_set(
        "invoke",
        lua.create_async_function(move |lua, (command, args): (String, LuaValue)| {
            let bridge = b.clone();
            async move {
                let args = lua_to_json(&args)?;
                let result = bridge.invoke(&command, args).await.map_err(lua_error)?;
                json_to_lua(&lua, &result)
            }
        })?,
    )?;

    let b = bridge.clone();
    props.raw_set(
        "exec",
        lua.create_async_function(
            move |lua, (path, args, options): (String, Option<Table>, Option<Table>)| {
                let bridge = b.clone();
                async move {
                    let args = match args {
                        Some(args) => args
                            .sequence_values::<LuaValue>()
                            .map(|arg| arg?.to_string())
                            .collect::<mlua::Result<Vec<_>>>()?,
                        None => Vec::new(),
                    };
                    let polls = match options {
                        Some(options) => options.raw_get::<Option<bool>>("polls")?.unwrap_or(false),
                        None => false,
                    };
                    let result = if polls {
                        bridge.poll(&path, &args).await
                    } else {
                        bridge.exec(&path, &args).await
                    };
                    json_to_lua(&lua, &result.map_err(lua_error)?)
                }
            },
        )?,
    )?;

    let b = bridge.clone();
    props.raw_set(
        "open_external",
        lua.create_async_function(move |_, url: String| {
            let bridge = b.clone();
            async move { bridge.open_external(&url).await.map_err(lua_error) }
        })?,
    )?;

    let b = bridge.clone();
    let shared = listeners.clone();
    props.raw_set(
        "listen",
        lua.create_function(move |lua, (event, callback): (String, Function)| {
            let subscription = b.listen(&event);
            let id = {
                let mut listeners = lock(&shared);
                let id = listeners.next_id;
                listeners.next_id += 1;
                listeners.entries.push(Listener {
                    id,
                    subscription,
                    callback,
                });
                id
            };

            let shared = shared.clone();
            lua.create_function(move |_, ()| {
                lock(&shared).entries.retain(|listener| listener.id != id);
                Ok(())
            })
        })?,
    )?;

    Ok(props)
}

/// Deliver queued events to their callbacks. Returns how many ran.
pub(crate) async fn dispatch_events(
    lua: &Lua,
    listeners: &SharedListeners,
    filename: &str,
) -> mlua::Result<usize> {
    let events = lock(listeners).drain_events();
    let count = events.len();
    for (callback, message) in events {
        let event = json_to_lua(lua, &message.to_value())?;
        if let Err(e) = callback.call_async::<()>(event).await {
            warn!(plugin = filename, kind = %message.kind, "Event listener failed: {e}");
        }
    }
    Ok(count)
}
