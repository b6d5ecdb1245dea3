//! The environment a plugin module runs in.
//!
//! A plugin sees exactly the names in [`SCOPE_PRIMITIVES`] and
//! [`SCOPE_BUILTINS`]. Globals the module assigns land in the same table, so
//! `function Component() ... end` is visible to the resolver afterwards.

use std::sync::{Arc, Mutex};

use itertools::Itertools;
use mlua::{Lua, Table, Value as LuaValue, Variadic};

use super::convert::ELEMENT_MARKER;
use super::hooks::{self, ActiveFrame};

/// Runtime primitives injected into every plugin environment.
pub const SCOPE_PRIMITIVES: &[&str] = &[
    "h",
    "Fragment",
    "use_state",
    "use_effect",
    "use_callback",
    "use_memo",
    "use_ref",
    "log",
    "module",
    "exports",
];

/// Lua builtins copied from the state's globals. None of them reach the
/// filesystem, the process or the loader.
pub const SCOPE_BUILTINS: &[&str] = &[
    "assert",
    "error",
    "ipairs",
    "next",
    "pairs",
    "pcall",
    "rawequal",
    "select",
    "setmetatable",
    "getmetatable",
    "tonumber",
    "tostring",
    "type",
    "math",
    "string",
    "table",
    "utf8",
];

pub(crate) struct Scope {
    pub env: Table,
    pub module: Table,
    pub exports: Table,
    pub fragment: Table,
    pub active: ActiveFrame,
}

impl Scope {
    pub(crate) fn new(lua: &Lua, filename: &str) -> mlua::Result<Self> {
        let env = lua.create_table()?;
        let globals = lua.globals();
        for name in SCOPE_BUILTINS {
            env.raw_set(*name, globals.raw_get::<LuaValue>(*name)?)?;
        }

        let fragment = lua.create_table()?;
        fragment.raw_set("name", "Fragment")?;
        env.raw_set("Fragment", fragment.clone())?;
        env.raw_set("h", create_h(lua)?)?;
        env.raw_set("log", create_log(lua, filename)?)?;

        let exports = lua.create_table()?;
        let module = lua.create_table()?;
        module.raw_set("exports", exports.clone())?;
        env.raw_set("module", module.clone())?;
        env.raw_set("exports", exports.clone())?;

        let active: ActiveFrame = Arc::new(Mutex::new(None));
        hooks::install(lua, &env, &active)?;

        Ok(Self {
            env,
            module,
            exports,
            fragment,
            active,
        })
    }
}

/// `h(tag, props, ...children)` builds an element descriptor.
fn create_h(lua: &Lua) -> mlua::Result<mlua::Function> {
    lua.create_function(
        |lua, (tag, props, children): (LuaValue, LuaValue, Variadic<LuaValue>)| {
            if tag.is_nil() {
                return Err(mlua::Error::RuntimeError(
                    "h: element type is nil (undefined component?)".into(),
                ));
            }

            let list = lua.create_table_with_capacity(children.len(), 0)?;
            for child in children.into_iter().filter(|child| !child.is_nil()) {
                list.raw_push(child)?;
            }

            let element = lua.create_table_with_capacity(0, 4)?;
            element.raw_set(ELEMENT_MARKER, true)?;
            element.raw_set("tag", tag)?;
            element.raw_set("props", props)?;
            element.raw_set("children", list)?;
            Ok(element)
        },
    )
}

fn create_log(lua: &Lua, filename: &str) -> mlua::Result<Table> {
    let log = lua.create_table()?;

    macro_rules! level {
        ($name:literal, $macro:ident) => {{
            let plugin = filename.to_string();
            log.raw_set(
                $name,
                lua.create_function(move |_, values: Variadic<LuaValue>| {
                    let message = join(&values)?;
                    tracing::$macro!(target: "plugin", plugin = %plugin, "{message}");
                    Ok(())
                })?,
            )?;
        }};
    }

    level!("debug", debug);
    level!("info", info);
    level!("warn", warn);
    level!("error", error);
    Ok(log)
}

fn join(values: &[LuaValue]) -> mlua::Result<String> {
    let parts: Vec<String> = values
        .iter()
        .map(LuaValue::to_string)
        .collect::<mlua::Result<_>>()?;
    Ok(parts.iter().join(" "))
}
