//! # Value Bridge
//!
//! Deep-copies values between two independent Lua environments, and between a Lua
//! value and JSON. Two sandboxes never share a `mlua::Lua` instance, so every value
//! that crosses a plugin boundary — a hook argument, a query result, a job payload —
//! passes through the typed [`Value`] defined here first.
//!
//! ## Array-vs-object heuristic
//!
//! When converting a table to JSON, the discriminator is **not** "every key is a
//! contiguous integer starting at 1". It is simpler and more brittle, matching the
//! plugin ecosystem this host was grounded on: if the *first key enumerated* is the
//! integer `1`, the whole table serializes as a JSON array; otherwise it serializes as
//! an object. [`Value::Map`] preserves enumeration order for exactly this reason.

use mlua::{Lua, Table, Value as LuaValue};
use serde_json::Value as Json;
use std::collections::HashSet;

/// A JSON-shaped value that can move between two sandboxed Lua environments.
///
/// `Map` uses an ordered list of pairs rather than a `HashMap` so that the
/// first-key-is-`1` array heuristic and insertion order survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

const UNSUPPORTED: &str = "[unsupported type]";

/// Guards against pathological (self-referential) tables during a Lua -> [`Value`]
/// walk. Well-behaved payloads are JSON-shaped trees and never hit this limit.
const MAX_BRIDGE_DEPTH: usize = 64;

impl Value {
    /// Copies a Lua value into a fresh [`Value`] tree, recursing into tables.
    ///
    /// Unsupported Lua types (functions, userdata, threads) become the literal
    /// string `"[unsupported type]"`, matching the host's policy that the bridge
    /// carries data, never code.
    pub fn from_lua(value: &LuaValue) -> Value {
        Self::from_lua_inner(value, 0)
    }

    fn from_lua_inner(value: &LuaValue, depth: usize) -> Value {
        if depth > MAX_BRIDGE_DEPTH {
            return Value::Str(UNSUPPORTED.to_string());
        }
        match value {
            LuaValue::Nil => Value::Null,
            LuaValue::Boolean(b) => Value::Bool(*b),
            LuaValue::Integer(i) => Value::Num(*i as f64),
            LuaValue::Number(n) => Value::Num(*n),
            LuaValue::String(s) => Value::Str(s.to_string_lossy()),
            LuaValue::Table(t) => {
                let mut pairs = Vec::new();
                for entry in t.clone().pairs::<LuaValue, LuaValue>() {
                    let Ok((k, v)) = entry else { continue };
                    let key = Self::from_lua_inner(&k, depth + 1);
                    let val = Self::from_lua_inner(&v, depth + 1);
                    pairs.push((key, val));
                }
                Value::Map(pairs)
            }
            _ => Value::Str(UNSUPPORTED.to_string()),
        }
    }

    /// Pushes this value into `lua` as a native Lua value, recursing into tables.
    pub fn to_lua(&self, lua: &Lua) -> mlua::Result<LuaValue> {
        match self {
            Value::Null => Ok(LuaValue::Nil),
            Value::Bool(b) => Ok(LuaValue::Boolean(*b)),
            Value::Num(n) => Ok(LuaValue::Number(*n)),
            Value::Str(s) => Ok(LuaValue::String(lua.create_string(s)?)),
            Value::List(items) => {
                let table = lua.create_table()?;
                for (i, item) in items.iter().enumerate() {
                    table.set(i as i64 + 1, item.to_lua(lua)?)?;
                }
                Ok(LuaValue::Table(table))
            }
            Value::Map(pairs) => {
                let table = lua.create_table()?;
                for (k, v) in pairs {
                    table.set(k.to_lua(lua)?, v.to_lua(lua)?)?;
                }
                Ok(LuaValue::Table(table))
            }
        }
    }

    /// Deep-copies a value living on `from` into a fresh value usable on `to`,
    /// without ever sharing Lua-internal state between the two environments.
    pub fn copy_between(from_value: &LuaValue, to: &Lua) -> mlua::Result<LuaValue> {
        Value::from_lua(from_value).to_lua(to)
    }

    /// Alias for [`Value::copy_between`], kept for call-site readability —
    /// the two directions behave identically; only the name at the call site differs.
    pub fn copy_into(from_value: &LuaValue, to: &Lua) -> mlua::Result<LuaValue> {
        Value::copy_between(from_value, to)
    }

    /// Alias for [`Value::copy_between`]; see [`Value::copy_into`].
    pub fn copy_back(from_value: &LuaValue, to: &Lua) -> mlua::Result<LuaValue> {
        Value::copy_between(from_value, to)
    }

    /// Converts to JSON using the first-key-is-`1` array heuristic.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Num(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(pairs) => {
                let is_array = pairs
                    .first()
                    .map(|(k, _)| matches!(k, Value::Num(n) if *n == 1.0))
                    .unwrap_or(false);
                if is_array {
                    Json::Array(pairs.iter().map(|(_, v)| v.to_json()).collect())
                } else {
                    let mut map = serde_json::Map::new();
                    for (k, v) in pairs {
                        let key = match k {
                            Value::Str(s) => s.clone(),
                            Value::Num(n) => {
                                if n.fract() == 0.0 {
                                    format!("{}", *n as i64)
                                } else {
                                    n.to_string()
                                }
                            }
                            _ => continue,
                        };
                        map.insert(key, v.to_json());
                    }
                    Json::Object(map)
                }
            }
        }
    }

    /// Converts from JSON, preserving array order in [`Value::List`].
    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Num(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (Value::Str(k.clone()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Converts a Lua value straight to JSON, via [`Value`].
    pub fn lua_to_json(value: &LuaValue) -> Json {
        Value::from_lua(value).to_json()
    }

    /// Converts JSON straight to a Lua value on `lua`, via [`Value`].
    pub fn json_to_lua(json: &Json, lua: &Lua) -> mlua::Result<LuaValue> {
        Value::from_json(json).to_lua(lua)
    }
}

/// Returns `true` if a Lua table contains a cycle reachable within a few hops.
/// Used only defensively; JSON-shaped payloads never trigger this.
#[allow(dead_code)]
pub fn has_cycle(table: &Table) -> bool {
    let mut seen = HashSet::new();
    has_cycle_inner(table, &mut seen, 0)
}

fn has_cycle_inner(table: &Table, seen: &mut HashSet<usize>, depth: usize) -> bool {
    if depth > MAX_BRIDGE_DEPTH {
        return true;
    }
    let ptr = table.to_pointer() as usize;
    if !seen.insert(ptr) {
        return true;
    }
    for entry in table.clone().pairs::<LuaValue, LuaValue>() {
        let Ok((_, v)) = entry else { continue };
        if let LuaValue::Table(t) = v {
            if has_cycle_inner(&t, seen, depth + 1) {
                return true;
            }
        }
    }
    false
}
