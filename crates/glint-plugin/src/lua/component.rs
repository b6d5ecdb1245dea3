//! Compiled script components and their mounted instances.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mlua::{Function, Lua, Table, Value as LuaValue};
use tracing::{debug, warn};

use super::bindings::{self, SharedListeners};
use super::convert::NodeBuilder;
use super::hooks::{ActiveFrame, DueEffect, HookFrame};
use super::scope::Scope;
use crate::bridge::CapabilityBridge;
use crate::node::Node;
use crate::sandbox::SandboxConfig;
use crate::transform::Dialect;
use crate::types::{PluginError, PluginResult, lock};

/// A plugin module that compiled and exported a component function.
///
/// The component owns the plugin's Lua state. Every instance mounted from it
/// renders on that state, one at a time.
pub struct ScriptComponent {
    lua: Lua,
    factory: Function,
    fragment: Table,
    active: ActiveFrame,
    sandbox: SandboxConfig,
    filename: String,
    dialect: Dialect,
}

impl fmt::Debug for ScriptComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptComponent")
            .field("filename", &self.filename)
            .field("dialect", &self.dialect)
            .field("used_memory", &self.lua.used_memory())
            .finish_non_exhaustive()
    }
}

impl ScriptComponent {
    pub(crate) fn new(
        lua: Lua,
        factory: Function,
        scope: Scope,
        sandbox: SandboxConfig,
        filename: impl Into<String>,
        dialect: Dialect,
    ) -> Self {
        Self {
            lua,
            factory,
            fragment: scope.fragment,
            active: scope.active,
            sandbox,
            filename: filename.into(),
            dialect,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Create an instance whose `props` expose `bridge`.
    pub fn mount(self: &Arc<Self>, bridge: &CapabilityBridge) -> PluginResult<ScriptInstance> {
        let listeners = SharedListeners::default();
        let props = bindings::create_props(&self.lua, bridge, &listeners)
            .map_err(|e| PluginError::render(&self.filename, e))?;

        let dirty = Arc::new(AtomicBool::new(true));
        debug!(plugin = %self.filename, "Mounted component");
        Ok(ScriptInstance {
            component: self.clone(),
            props,
            frame: Arc::new(Mutex::new(HookFrame::new(dirty.clone()))),
            dirty,
            listeners,
        })
    }
}

/// Makes a frame the active one for the duration of a render.
struct ActiveGuard<'a> {
    active: &'a ActiveFrame,
    previous: Option<Arc<Mutex<HookFrame>>>,
}

impl<'a> ActiveGuard<'a> {
    fn set(active: &'a ActiveFrame, frame: Arc<Mutex<HookFrame>>) -> Self {
        let previous = lock(active).replace(frame);
        Self { active, previous }
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        *lock(self.active) = self.previous.take();
    }
}

/// A mounted script component.
pub struct ScriptInstance {
    component: Arc<ScriptComponent>,
    props: Table,
    frame: Arc<Mutex<HookFrame>>,
    dirty: Arc<AtomicBool>,
    listeners: SharedListeners,
}

impl fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("filename", &self.component.filename)
            .field("dirty", &self.is_dirty())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

impl ScriptInstance {
    pub fn filename(&self) -> &str {
        &self.component.filename
    }

    /// Whether state changed since the last render began.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Number of live `props.listen` registrations.
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn fail(&self, err: impl fmt::Display) -> PluginError {
        PluginError::render(&self.component.filename, err)
    }

    /// Call the component function and convert its result.
    pub async fn render(&mut self) -> PluginResult<Node> {
        let component = self.component.clone();
        self.dirty.store(false, Ordering::Release);
        lock(&self.frame).begin_render();

        let node = {
            let _active = ActiveGuard::set(&component.active, self.frame.clone());
            let budget = component.sandbox.budget();
            let thread = component
                .lua
                .create_thread(component.factory.clone())
                .map_err(|e| self.fail(e))?;
            budget.arm_thread(&thread).map_err(|e| self.fail(e))?;
            let value = thread
                .into_async::<LuaValue>(self.props.clone())
                .map_err(|e| self.fail(e))?
                .await
                .map_err(|e| self.fail(e))?;

            // Function tags run on the main thread while the tree is built.
            let _budget = budget.arm(&component.lua).map_err(|e| self.fail(e))?;
            NodeBuilder::new(&component.lua, &component.fragment)
                .build(value)
                .map_err(|e| self.fail(e))?
        };

        lock(&self.frame).end_render().map_err(|e| self.fail(e))?;
        Ok(node)
    }

    /// Run the effects queued by the last render. Each effect's previous
    /// cleanup runs first. Returns the number of effects run.
    ///
    /// Every due effect runs even if an earlier one fails; the first failure
    /// is returned.
    pub async fn commit(&mut self) -> PluginResult<usize> {
        let due = lock(&self.frame).take_due_effects();
        let count = due.len();
        let mut first_error = None;

        for DueEffect {
            slot,
            effect,
            previous_cleanup,
        } in due
        {
            if let Some(cleanup) = previous_cleanup {
                if let Err(e) = cleanup.call_async::<()>(()).await {
                    first_error.get_or_insert(self.fail(e));
                }
            }

            match effect.call_async::<LuaValue>(()).await {
                Ok(LuaValue::Function(cleanup)) => lock(&self.frame).set_cleanup(slot, Some(cleanup)),
                Ok(_) => lock(&self.frame).set_cleanup(slot, None),
                Err(e) => {
                    first_error.get_or_insert(self.fail(e));
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }

    /// Deliver pushed events to `props.listen` callbacks.
    pub async fn pump_events(&mut self) -> PluginResult<usize> {
        let component = self.component.clone();
        bindings::dispatch_events(&component.lua, &self.listeners, &component.filename)
            .await
            .map_err(|e| self.fail(e))
    }

    /// Run every outstanding effect cleanup and revoke all listeners.
    pub async fn unmount(&mut self) {
        lock(&self.listeners).clear();
        let cleanups = lock(&self.frame).take_cleanups();
        for cleanup in cleanups {
            if let Err(e) = cleanup.call_async::<()>(()).await {
                warn!(plugin = %self.component.filename, "Effect cleanup failed: {e}");
            }
        }
        debug!(plugin = %self.component.filename, "Unmounted component");
    }
}
