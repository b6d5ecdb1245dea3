//! Conversions between Lua values, JSON and rendered [`Node`]s.

use std::collections::BTreeMap;

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::{Map, Number, Value};

use crate::node::{Element, Node};

/// Marker key set on every element descriptor built by `h`.
pub(crate) const ELEMENT_MARKER: &str = "$$element";

/// Element nesting allowed in one render.
const MAX_DEPTH: usize = 256;

/// Convert a JSON value into a Lua value.
pub(crate) fn json_to_lua(lua: &Lua, val: &Value) -> mlua::Result<LuaValue> {
    match val {
        Value::Null => Ok(LuaValue::Nil),
        Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(LuaValue::Integer(i))
            } else {
                Ok(LuaValue::Number(n.as_f64().unwrap_or(0.0)))
            }
        }
        Value::String(s) => Ok(LuaValue::String(lua.create_string(s)?)),
        Value::Array(arr) => {
            let t = lua.create_table_with_capacity(arr.len(), 0)?;
            for (i, v) in arr.iter().enumerate() {
                t.raw_set(i + 1, json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(t))
        }
        Value::Object(obj) => {
            let t = lua.create_table_with_capacity(0, obj.len())?;
            for (k, v) in obj {
                t.raw_set(k.as_str(), json_to_lua(lua, v)?)?;
            }
            Ok(LuaValue::Table(t))
        }
    }
}

/// Convert a Lua value into JSON.
///
/// A table whose keys are exactly `1..n` becomes an array, any other table
/// an object with stringified keys. Functions, threads and userdata become
/// `null`.
pub(crate) fn lua_to_json(value: &LuaValue) -> mlua::Result<Value> {
    lua_to_json_at(value, 0)
}

fn lua_to_json_at(value: &LuaValue, depth: usize) -> mlua::Result<Value> {
    if depth > MAX_DEPTH {
        return Err(mlua::Error::RuntimeError(
            "value is nested too deeply (cyclic table?)".into(),
        ));
    }

    Ok(match value {
        LuaValue::Nil => Value::Null,
        LuaValue::Boolean(b) => Value::Bool(*b),
        LuaValue::Integer(i) => Value::from(*i),
        LuaValue::Number(n) => Number::from_f64(*n).map_or(Value::Null, Value::Number),
        LuaValue::String(s) => Value::String(s.to_string_lossy()),
        LuaValue::Table(table) => table_to_json(table, depth)?,
        _ => Value::Null,
    })
}

fn table_to_json(table: &Table, depth: usize) -> mlua::Result<Value> {
    let len = table.raw_len();
    let mut count = 0usize;
    for pair in table.pairs::<LuaValue, LuaValue>() {
        pair?;
        count += 1;
    }

    if len > 0 && count == len {
        let items = table
            .sequence_values::<LuaValue>()
            .map(|item| lua_to_json_at(&item?, depth + 1))
            .collect::<mlua::Result<Vec<_>>>()?;
        return Ok(Value::Array(items));
    }

    let mut object = Map::new();
    for pair in table.pairs::<LuaValue, LuaValue>() {
        let (key, value) = pair?;
        object.insert(key_string(&key)?, lua_to_json_at(&value, depth + 1)?);
    }
    Ok(Value::Object(object))
}

fn key_string(key: &LuaValue) -> mlua::Result<String> {
    match key {
        LuaValue::String(s) => Ok(s.to_string_lossy()),
        LuaValue::Integer(i) => Ok(i.to_string()),
        LuaValue::Number(n) => Ok(n.to_string()),
        LuaValue::Boolean(b) => Ok(b.to_string()),
        other => Err(mlua::Error::RuntimeError(format!(
            "cannot use a {} as an object key",
            other.type_name()
        ))),
    }
}

/// Walks the value returned by a component and builds a [`Node`] tree.
pub(crate) struct NodeBuilder<'a> {
    lua: &'a Lua,
    fragment: &'a Table,
}

impl<'a> NodeBuilder<'a> {
    pub(crate) fn new(lua: &'a Lua, fragment: &'a Table) -> Self {
        Self { lua, fragment }
    }

    pub(crate) fn build(&self, value: LuaValue) -> mlua::Result<Node> {
        let mut children = Vec::new();
        self.collect(value, 0, &mut children)?;
        Ok(match children.len() {
            0 => Node::empty(),
            1 => children.remove(0),
            _ => Node::Fragment(children),
        })
    }

    fn collect(&self, value: LuaValue, depth: usize, out: &mut Vec<Node>) -> mlua::Result<()> {
        if depth > MAX_DEPTH {
            return Err(mlua::Error::RuntimeError(format!(
                "element tree deeper than {MAX_DEPTH} levels"
            )));
        }

        match value {
            LuaValue::Nil | LuaValue::Boolean(_) => {}
            LuaValue::String(s) => out.push(Node::Text(s.to_string_lossy())),
            LuaValue::Integer(i) => out.push(Node::Text(i.to_string())),
            LuaValue::Number(n) => out.push(Node::Text(n.to_string())),
            LuaValue::Table(table) if is_element(&table)? => {
                self.element(table, depth, out)?;
            }
            LuaValue::Table(table) => {
                for item in table.sequence_values::<LuaValue>() {
                    self.collect(item?, depth + 1, out)?;
                }
            }
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "cannot render a {}",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    fn element(&self, descriptor: Table, depth: usize, out: &mut Vec<Node>) -> mlua::Result<()> {
        let tag: LuaValue = descriptor.raw_get("tag")?;
        let props: LuaValue = descriptor.raw_get("props")?;
        let children: Table = descriptor.raw_get("children")?;

        match tag {
            LuaValue::String(tag) => {
                let mut element = Element::new(tag.to_string_lossy());
                element.props = props_to_json(&props)?;
                for child in children.sequence_values::<LuaValue>() {
                    self.collect(child?, depth + 1, &mut element.children)?;
                }
                out.push(Node::Element(element));
            }
            LuaValue::Table(tag) if &tag == self.fragment => {
                let mut nodes = Vec::new();
                for child in children.sequence_values::<LuaValue>() {
                    self.collect(child?, depth + 1, &mut nodes)?;
                }
                out.push(Node::Fragment(nodes));
            }
            LuaValue::Function(component) => {
                let props = match props {
                    LuaValue::Table(props) => self.shallow_copy(&props)?,
                    _ => self.lua.create_table()?,
                };
                if children.raw_len() > 0 {
                    props.raw_set("children", children)?;
                }
                let rendered = component.call::<LuaValue>(props)?;
                self.collect(rendered, depth + 1, out)?;
            }
            other => {
                return Err(mlua::Error::RuntimeError(format!(
                    "invalid element type: {}",
                    other.type_name()
                )));
            }
        }
        Ok(())
    }

    fn shallow_copy(&self, table: &Table) -> mlua::Result<Table> {
        let copy = self.lua.create_table()?;
        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            copy.raw_set(key, value)?;
        }
        Ok(copy)
    }
}

fn is_element(table: &Table) -> mlua::Result<bool> {
    Ok(matches!(
        table.raw_get::<LuaValue>(ELEMENT_MARKER)?,
        LuaValue::Boolean(true)
    ))
}

/// Element props as JSON. Function values (event handlers) have no JSON
/// form and are left out.
fn props_to_json(props: &LuaValue) -> mlua::Result<BTreeMap<String, Value>> {
    let mut out = BTreeMap::new();
    if let LuaValue::Table(table) = props {
        for pair in table.pairs::<LuaValue, LuaValue>() {
            let (key, value) = pair?;
            if matches!(value, LuaValue::Function(_)) {
                continue;
            }
            out.insert(key_string(&key)?, lua_to_json(&value)?);
        }
    }
    Ok(out)
}
