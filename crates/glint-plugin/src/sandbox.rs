//! Resource limits for plugin Lua states.
//!
//! Limits contain runaway plugins (an endless loop in a module body, a
//! table that grows without bound). They are not a security boundary.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use glint_core::PluginsConfig;
use mlua::{HookTriggers, Lua, Thread, VmState};

/// How often the instruction hook fires.
const HOOK_INTERVAL: u32 = 1000;

/// Configuration for plugin sandboxing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxConfig {
    /// Maximum memory of one plugin's Lua state in bytes (0 = unlimited).
    pub max_memory: usize,

    /// Instructions allowed for module execution or a single render
    /// (0 = unlimited).
    pub max_instructions: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from(&PluginsConfig::default())
    }
}

impl From<&PluginsConfig> for SandboxConfig {
    fn from(config: &PluginsConfig) -> Self {
        Self {
            max_memory: config.max_memory_mb * 1024 * 1024,
            max_instructions: config.max_instructions,
        }
    }
}

impl SandboxConfig {
    /// No limits at all.
    pub fn unlimited() -> Self {
        Self {
            max_memory: 0,
            max_instructions: 0,
        }
    }

    /// Apply the memory ceiling to a fresh state.
    pub(crate) fn limit_memory(&self, lua: &Lua) -> mlua::Result<()> {
        if self.max_memory > 0 {
            lua.set_memory_limit(self.max_memory)?;
        }
        Ok(())
    }

    /// A fresh instruction budget for module execution or one render.
    pub(crate) fn budget(&self) -> Budget {
        Budget {
            max_instructions: self.max_instructions,
            executed: Arc::default(),
        }
    }
}

/// An instruction allowance shared by every thread it is armed on.
#[derive(Debug, Clone)]
pub(crate) struct Budget {
    max_instructions: u64,
    executed: Arc<AtomicU64>,
}

impl Budget {
    /// Count instructions on the main thread of `lua` until the guard is
    /// dropped.
    pub(crate) fn arm<'a>(&self, lua: &'a Lua) -> mlua::Result<BudgetGuard<'a>> {
        if self.max_instructions == 0 {
            return Ok(BudgetGuard { lua: None });
        }
        lua.set_hook(triggers(), self.counter())?;
        Ok(BudgetGuard { lua: Some(lua) })
    }

    /// Count instructions on `thread` for as long as it runs. Hooks set
    /// through [`arm`](Self::arm) do not reach coroutines.
    pub(crate) fn arm_thread(&self, thread: &Thread) -> mlua::Result<()> {
        if self.max_instructions > 0 {
            thread.set_hook(triggers(), self.counter())?;
        }
        Ok(())
    }

    fn counter(&self) -> impl Fn(&Lua, &mlua::Debug) -> mlua::Result<VmState> + Send + 'static {
        let Budget {
            max_instructions,
            executed,
        } = self.clone();
        move |_: &Lua, _: &mlua::Debug| {
            let count = executed.fetch_add(HOOK_INTERVAL as u64, Ordering::Relaxed);
            if count >= max_instructions {
                return Err(mlua::Error::RuntimeError(format!(
                    "instruction budget of {max_instructions} exhausted"
                )));
            }
            Ok(VmState::Continue)
        }
    }
}

fn triggers() -> HookTriggers {
    HookTriggers::new().every_nth_instruction(HOOK_INTERVAL)
}

/// Removes the instruction hook when dropped.
pub(crate) struct BudgetGuard<'a> {
    lua: Option<&'a Lua>,
}

impl Drop for BudgetGuard<'_> {
    fn drop(&mut self) {
        if let Some(lua) = self.lua {
            lua.remove_hook();
        }
    }
}
