//! Component state hooks: `use_state`, `use_effect`, `use_memo`,
//! `use_callback` and `use_ref`.
//!
//! Each mounted instance owns a [`HookFrame`], a list of slots claimed in
//! call order. While an instance renders, its frame is the *active* frame of
//! the Lua state and the hook functions read and write its slots. No lock is
//! held while Lua code runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mlua::{Function, Lua, Table, Value as LuaValue};

use crate::types::lock;

/// The frame of the instance currently rendering on a Lua state.
pub(crate) type ActiveFrame = Arc<Mutex<Option<Arc<Mutex<HookFrame>>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    State,
    Effect,
    Memo,
    Ref,
}

impl SlotKind {
    fn hook_name(self) -> &'static str {
        match self {
            Self::State => "use_state",
            Self::Effect => "use_effect",
            Self::Memo => "use_memo/use_callback",
            Self::Ref => "use_ref",
        }
    }
}

enum HookSlot {
    State {
        cell: Arc<Mutex<LuaValue>>,
        setter: Function,
    },
    Effect {
        deps: Option<Vec<LuaValue>>,
        pending: Option<Function>,
        cleanup: Option<Function>,
    },
    Memo {
        deps: Option<Vec<LuaValue>>,
        value: LuaValue,
    },
    Ref(Table),
}

impl HookSlot {
    fn kind(&self) -> SlotKind {
        match self {
            Self::State { .. } => SlotKind::State,
            Self::Effect { .. } => SlotKind::Effect,
            Self::Memo { .. } => SlotKind::Memo,
            Self::Ref(_) => SlotKind::Ref,
        }
    }
}

/// Hook slots of one mounted instance.
pub(crate) struct HookFrame {
    slots: Vec<HookSlot>,
    cursor: usize,
    mounted: bool,
    /// Set while a `use_state` initializer or `use_memo` computation runs.
    initializing: bool,
    queued: Vec<usize>,
    dirty: Arc<AtomicBool>,
}

/// An effect due to run at commit, with the cleanup of its previous run.
pub(crate) struct DueEffect {
    pub slot: usize,
    pub effect: Function,
    pub previous_cleanup: Option<Function>,
}

impl HookFrame {
    pub(crate) fn new(dirty: Arc<AtomicBool>) -> Self {
        Self {
            slots: Vec::new(),
            cursor: 0,
            mounted: false,
            initializing: false,
            queued: Vec::new(),
            dirty,
        }
    }

    pub(crate) fn begin_render(&mut self) {
        self.cursor = 0;
        self.initializing = false;
    }

    /// Close a render. After the first render the number of hooks is fixed.
    pub(crate) fn end_render(&mut self) -> Result<(), String> {
        if self.mounted && self.cursor != self.slots.len() {
            return Err(format!(
                "rendered {} hooks, expected {}; hooks must be called in the same order on every render",
                self.cursor,
                self.slots.len()
            ));
        }
        self.mounted = true;
        Ok(())
    }

    /// Claim the next slot. Returns its index and whether it is new.
    fn claim(&mut self, kind: SlotKind) -> mlua::Result<(usize, bool)> {
        if self.initializing {
            return Err(mlua::Error::RuntimeError(format!(
                "{} cannot be called inside a use_state initializer or use_memo computation",
                kind.hook_name()
            )));
        }

        let index = self.cursor;
        self.cursor += 1;

        match self.slots.get(index) {
            Some(slot) if slot.kind() == kind => Ok((index, false)),
            Some(slot) => Err(mlua::Error::RuntimeError(format!(
                "hook order changed: slot {index} was {} and is now {}",
                slot.kind().hook_name(),
                kind.hook_name()
            ))),
            None if self.mounted => Err(mlua::Error::RuntimeError(format!(
                "{} called more times than during the first render",
                kind.hook_name()
            ))),
            None => Ok((index, true)),
        }
    }

    /// Effects queued by the last render, in slot order.
    pub(crate) fn take_due_effects(&mut self) -> Vec<DueEffect> {
        let mut queued = std::mem::take(&mut self.queued);
        queued.sort_unstable();
        queued.dedup();

        queued
            .into_iter()
            .filter_map(|slot| match self.slots.get_mut(slot) {
                Some(HookSlot::Effect {
                    pending, cleanup, ..
                }) => pending.take().map(|effect| DueEffect {
                    slot,
                    effect,
                    previous_cleanup: cleanup.take(),
                }),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn set_cleanup(&mut self, slot: usize, new_cleanup: Option<Function>) {
        if let Some(HookSlot::Effect { cleanup, .. }) = self.slots.get_mut(slot) {
            *cleanup = new_cleanup;
        }
    }

    /// Every outstanding cleanup, for unmount.
    pub(crate) fn take_cleanups(&mut self) -> Vec<Function> {
        self.queued.clear();
        self.slots
            .iter_mut()
            .filter_map(|slot| match slot {
                HookSlot::Effect { cleanup, .. } => cleanup.take(),
                _ => None,
            })
            .collect()
    }
}

fn current(active: &ActiveFrame) -> mlua::Result<Arc<Mutex<HookFrame>>> {
    lock(active).clone().ok_or_else(|| {
        mlua::Error::RuntimeError("hooks can only be called while a component renders".into())
    })
}

/// Run `init` with hook calls rejected.
fn initialize<T>(
    frame: &Mutex<HookFrame>,
    init: impl FnOnce() -> mlua::Result<T>,
) -> mlua::Result<T> {
    lock(frame).initializing = true;
    let result = init();
    lock(frame).initializing = false;
    result
}

fn deps_of(value: LuaValue) -> mlua::Result<Option<Vec<LuaValue>>> {
    match value {
        LuaValue::Nil => Ok(None),
        LuaValue::Table(table) => Ok(Some(
            table
                .sequence_values::<LuaValue>()
                .collect::<mlua::Result<_>>()?,
        )),
        other => Err(mlua::Error::RuntimeError(format!(
            "dependencies must be a list, got {}",
            other.type_name()
        ))),
    }
}

fn deps_changed(old: &Option<Vec<LuaValue>>, new: &Option<Vec<LuaValue>>) -> bool {
    match (old, new) {
        (Some(old), Some(new)) => old != new,
        _ => true,
    }
}

/// Register the hook functions in `env`.
pub(crate) fn install(lua: &Lua, env: &Table, active: &ActiveFrame) -> mlua::Result<()> {
    let frame_slot = active.clone();
    let use_state = lua.create_function(move |lua, initial: LuaValue| {
        let frame = current(&frame_slot)?;
        let (index, new) = lock(&frame).claim(SlotKind::State)?;

        if !new {
            let guard = lock(&frame);
            if let Some(HookSlot::State { cell, setter }) = guard.slots.get(index) {
                return Ok((lock(cell).clone(), setter.clone()));
            }
            return Err(mlua::Error::RuntimeError("corrupt state slot".into()));
        }

        let initial = match initial {
            LuaValue::Function(init) => initialize(&frame, || init.call::<LuaValue>(()))?,
            other => other,
        };
        let cell = Arc::new(Mutex::new(initial.clone()));
        let dirty = lock(&frame).dirty.clone();
        let setter = {
            let cell = cell.clone();
            lua.create_function(move |_, next: LuaValue| {
                let next = match next {
                    LuaValue::Function(update) => {
                        let previous = lock(&cell).clone();
                        update.call::<LuaValue>(previous)?
                    }
                    other => other,
                };
                let mut value = lock(&cell);
                if *value != next {
                    *value = next;
                    dirty.store(true, Ordering::Release);
                }
                Ok(())
            })?
        };

        lock(&frame).slots.push(HookSlot::State {
            cell,
            setter: setter.clone(),
        });
        Ok((initial, setter))
    })?;
    env.raw_set("use_state", use_state)?;

    let frame_slot = active.clone();
    let use_effect = lua.create_function(move |_, (effect, deps): (Function, LuaValue)| {
        let deps = deps_of(deps)?;
        let frame = current(&frame_slot)?;
        let mut guard = lock(&frame);
        let state = &mut *guard;
        let (index, new) = state.claim(SlotKind::Effect)?;

        if new {
            state.slots.push(HookSlot::Effect {
                deps,
                pending: Some(effect),
                cleanup: None,
            });
            state.queued.push(index);
        } else if let Some(HookSlot::Effect {
            deps: old,
            pending,
            ..
        }) = state.slots.get_mut(index)
        {
            if deps_changed(old, &deps) {
                *old = deps;
                *pending = Some(effect);
                state.queued.push(index);
            }
        }
        Ok(())
    })?;
    env.raw_set("use_effect", use_effect)?;

    let frame_slot = active.clone();
    let use_memo = lua.create_function(move |_, (compute, deps): (Function, LuaValue)| {
        memo(&frame_slot, deps, || compute.call::<LuaValue>(()))
    })?;
    env.raw_set("use_memo", use_memo)?;

    let frame_slot = active.clone();
    let use_callback = lua.create_function(move |_, (callback, deps): (Function, LuaValue)| {
        memo(&frame_slot, deps, || Ok(LuaValue::Function(callback.clone())))
    })?;
    env.raw_set("use_callback", use_callback)?;

    let frame_slot = active.clone();
    let use_ref = lua.create_function(move |lua, initial: LuaValue| {
        let frame = current(&frame_slot)?;
        let (index, new) = lock(&frame).claim(SlotKind::Ref)?;
        if new {
            let cell = lua.create_table()?;
            cell.raw_set("current", initial)?;
            lock(&frame).slots.push(HookSlot::Ref(cell.clone()));
            return Ok(cell);
        }
        match lock(&frame).slots.get(index) {
            Some(HookSlot::Ref(cell)) => Ok(cell.clone()),
            _ => Err(mlua::Error::RuntimeError("corrupt ref slot".into())),
        }
    })?;
    env.raw_set("use_ref", use_ref)?;

    Ok(())
}

fn memo(
    active: &ActiveFrame,
    deps: LuaValue,
    compute: impl FnOnce() -> mlua::Result<LuaValue>,
) -> mlua::Result<LuaValue> {
    let deps = deps_of(deps)?;
    let frame = current(active)?;
    let (index, new) = lock(&frame).claim(SlotKind::Memo)?;

    if !new {
        let guard = lock(&frame);
        if let Some(HookSlot::Memo { deps: old, value }) = guard.slots.get(index) {
            if !deps_changed(old, &deps) {
                return Ok(value.clone());
            }
        }
    }

    let value = initialize(&frame, compute)?;
    let mut guard = lock(&frame);
    if new {
        guard.slots.push(HookSlot::Memo {
            deps,
            value: value.clone(),
        });
    } else if let Some(HookSlot::Memo {
        deps: old,
        value: stored,
    }) = guard.slots.get_mut(index)
    {
        *old = deps;
        *stored = value.clone();
    }
    Ok(value)
}
