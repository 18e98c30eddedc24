//! # Lua Framework Library
//!
//! Installs the host callback surface (§6) as Rust closures bound to one plugin
//! and its manager, then preloads `core` — a small Lua library giving plugin
//! authors route matching, form parsing, template rendering, and logging on top
//! of the raw callbacks. Plugin authors never call the `c_*` callbacks directly;
//! `core` is the only interface they see.

use crate::plugin::Plugin;
use crate::value::Value;
use mlua::{Lua, MultiValue, Value as LuaValue};
use std::sync::{Arc, Weak};

/// Installs the raw `c_*` host callbacks and the `core` library table into
/// `lua`, both scoped to `plugin`.
pub fn install(lua: &Lua, plugin: &Arc<Plugin>) -> mlua::Result<()> {
    install_host_callbacks(lua, plugin)?;
    let core: mlua::Table = lua.load(CORE_SOURCE).set_name("core").eval()?;
    lua.globals().set("core", core)?;
    Ok(())
}

fn install_host_callbacks(lua: &Lua, plugin: &Arc<Plugin>) -> mlua::Result<()> {
    let globals = lua.globals();

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_log",
            lua.create_function(move |_, (level, msg): (String, String)| {
                log_for_plugin(&plugin, &level, &msg);
                Ok(())
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_get_memory",
            lua.create_function(move |_, ()| {
                let Some(plugin) = plugin.upgrade() else {
                    return Ok(0.0);
                };
                Ok(plugin.memory_kb())
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_register_hook",
            lua.create_function(
                move |_, (hook_name, func_name, priority): (String, String, Option<i32>)| {
                    let Some(plugin) = plugin.upgrade() else {
                        return Ok(());
                    };
                    let Some(manager) = plugin.manager() else {
                        return Ok(());
                    };
                    manager.register_hook(
                        &hook_name,
                        &plugin.name,
                        Arc::downgrade(&plugin),
                        func_name,
                        priority.unwrap_or(crate::registry::DEFAULT_PRIORITY),
                    );
                    Ok(())
                },
            )?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_call_hook",
            lua.create_function(move |lua, (hook_name, data): (String, LuaValue)| {
                let Some(plugin) = plugin.upgrade() else {
                    return Ok(MultiValue::from_vec(vec![
                        LuaValue::Nil,
                        LuaValue::String(lua.create_string("plugin has been unloaded")?),
                    ]));
                };
                let Some(manager) = plugin.manager() else {
                    return Ok(MultiValue::from_vec(vec![
                        LuaValue::Nil,
                        LuaValue::String(lua.create_string("plugin has no manager")?),
                    ]));
                };
                let payload = Value::lua_to_json(&data);
                match crate::dispatch::query(&manager, &hook_name, payload) {
                    Ok(result) => {
                        let lua_result = Value::json_to_lua(&result, lua)?;
                        Ok(MultiValue::from_vec(vec![lua_result]))
                    }
                    Err(e) => Ok(MultiValue::from_vec(vec![
                        LuaValue::Nil,
                        LuaValue::String(lua.create_string(e.to_string())?),
                    ])),
                }
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_trigger_async_event",
            lua.create_function(move |_, (hook_name, data): (String, LuaValue)| {
                let Some(plugin) = plugin.upgrade() else {
                    return Ok(0);
                };
                let Some(manager) = plugin.manager() else {
                    return Ok(0);
                };
                let payload = Value::lua_to_json(&data);
                Ok(crate::dispatch::emit(&manager, &hook_name, payload))
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_enqueue_job",
            lua.create_function(move |_, (func_name, data): (String, LuaValue)| {
                let Some(plugin) = plugin.upgrade() else {
                    return Ok(());
                };
                let Some(manager) = plugin.manager() else {
                    return Ok(());
                };
                let payload = Value::lua_to_json(&data);
                let bytes = serde_json::to_vec(&payload).unwrap_or_default();
                manager.job_queue.put_job(crate::queue::Job {
                    plugin: Arc::downgrade(&plugin),
                    function_name: func_name,
                    payload: bytes,
                });
                Ok(())
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_db_exec",
            lua.create_function(move |lua, sql: String| {
                let Some(plugin) = plugin.upgrade() else {
                    return Ok(MultiValue::from_vec(vec![LuaValue::Boolean(false)]));
                };
                match plugin.db_exec(&sql) {
                    Ok(()) => Ok(MultiValue::from_vec(vec![LuaValue::Boolean(true)])),
                    Err(e) => Ok(MultiValue::from_vec(vec![
                        LuaValue::Boolean(false),
                        LuaValue::String(lua.create_string(e.to_string())?),
                    ])),
                }
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_db_query",
            lua.create_function(move |lua, sql: String| {
                let Some(plugin) = plugin.upgrade() else {
                    return Ok(LuaValue::Nil);
                };
                match plugin.db_query(&sql) {
                    Ok(rows) => {
                        let json_rows = serde_json::Value::Array(rows);
                        Value::json_to_lua(&json_rows, lua)
                    }
                    Err(e) => Err(mlua::Error::RuntimeError(e.to_string())),
                }
            })?,
        )?;
    }

    {
        let plugin = Arc::downgrade(plugin);
        globals.set(
            "c_render",
            lua.create_function(move |lua, (view_name, data): (String, LuaValue)| {
                let Some(plugin) = plugin.upgrade() else {
                    return Err(mlua::Error::RuntimeError("plugin has been unloaded".into()));
                };
                let json_data = Value::lua_to_json(&data);
                crate::template::render(&plugin.path, &view_name, &json_data)
                    .map_err(|e| mlua::Error::RuntimeError(e.to_string()))
                    .and_then(|html| lua.create_string(&html).map(LuaValue::String))
            })?,
        )?;
    }

    Ok(())
}

fn log_for_plugin(plugin: &Weak<Plugin>, level: &str, msg: &str) {
    let name = plugin
        .upgrade()
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "<unknown>".to_string());
    match level.to_ascii_uppercase().as_str() {
        "WARN" => tracing::warn!(plugin = %name, "{}", msg),
        "ERROR" => tracing::error!(plugin = %name, "{}", msg),
        "DEBUG" => tracing::debug!(plugin = %name, "{}", msg),
        _ => tracing::info!(plugin = %name, "{}", msg),
    }
}

const CORE_SOURCE: &str = r#"
local core = {}
core.routes = {}

function core.query_handle(name, func_name)
    c_register_hook(name, func_name)
end

function core.query(name, data)
    return c_call_hook(name, data or {})
end

function core.emit_handle(name, func_name)
    c_register_hook(name, func_name)
end

function core.emit(name, data)
    return c_trigger_async_event(name, data or {})
end

function core.defer(func_name, data)
    c_enqueue_job(func_name, data or {})
end

local function compile_route(path)
    local names = {}
    for name in path:gmatch("%[([^%]]+)%]") do
        table.insert(names, name)
    end
    local pattern = path:gsub("([%(%)%.%%%+%-%*%?%^%$])", "%%%1")
    pattern = pattern:gsub("%[.-%]", "([^/]+)")
    return "^" .. pattern .. "$", names
end

local function new_response(body)
    local resp = {
        status_code = 200,
        body = body or "",
        headers = { ["Content-Type"] = "text/html" },
    }
    function resp:status(code) self.status_code = code; return self end
    function resp:header(key, value) self.headers[key] = value; return self end
    function resp:type(mime_type) self.headers["Content-Type"] = mime_type; return self end
    return resp
end

function core.render(view_name, data)
    if view_name:find("%.%.") then
        return new_response("Security Error: Invalid view name"):status(403)
    end
    local ok, result = pcall(c_render, view_name, data or {})
    if not ok then
        core.error("render failed: " .. tostring(result))
        return new_response("Template error"):status(500)
    end
    return new_response(result):type("text/html")
end

function core.redirect(url, status_code)
    return new_response(""):status(status_code or 302):header("Location", url)
end

local function url_decode(text)
    if not text then return "" end
    text = text:gsub("+", " ")
    text = text:gsub("%%(%x%x)", function(hex) return string.char(tonumber(hex, 16)) end)
    return text
end

function core.parse_form(body)
    local data = {}
    if not body or body == "" then return data end
    for key, value in body:gmatch("([^&=]+)=([^&]*)") do
        data[url_decode(key)] = url_decode(value)
    end
    return data
end

function core.memory_kb()
    return c_get_memory()
end

function core.match(method, path, handler)
    local pattern, keys = compile_route(path)
    table.insert(core.routes, { method = method:upper(), pattern = pattern, keys = keys, handler = handler })
end

function core.get(path, handler) core.match("GET", path, handler) end
function core.post(path, handler) core.match("POST", path, handler) end

function core.handle_request(req)
    local method = req.method:upper()
    req.form = {}
    if method == "POST" or method == "PUT" then
        req.form = core.parse_form(req.body or "")
    end

    for _, route in ipairs(core.routes) do
        if route.method == method then
            local matches = { req.url:match(route.pattern) }
            if #matches > 0 then
                req.params = {}
                for i, name in ipairs(route.keys) do
                    req.params[name] = matches[i]
                end

                local result = route.handler(req)
                if type(result) == "string" then
                    result = { status_code = 200, body = result, headers = { ["Content-Type"] = "text/html" } }
                end

                return {
                    status = result.status_code or 200,
                    body = result.body or "",
                    headers = result.headers or {},
                }
            end
        end
    end

    return { status = 404, body = "Not Found", headers = {} }
end

function core.log(level, msg)
    c_log(level:upper(), tostring(msg))
end

function core.info(msg) core.log("INFO", msg) end
function core.warn(msg) core.log("WARN", msg) end
function core.error(msg) core.log("ERROR", msg) end

return core
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Lua;

    #[test]
    fn core_loads_and_matches_a_route() {
        let lua = Lua::new();
        lua.globals().set("c_log", lua.create_function(|_, (_, _): (String, String)| Ok(())).unwrap()).unwrap();
        lua.globals().set("c_get_memory", lua.create_function(|_, ()| Ok(0.0)).unwrap()).unwrap();
        let core: mlua::Table = lua.load(CORE_SOURCE).eval().unwrap();
        lua.globals().set("core", core).unwrap();

        lua.load(r#"core.get("/hello/[name]", function(req) return "hi " .. req.params.name end)"#)
            .exec()
            .unwrap();

        let result: mlua::Table = lua
            .load(r#"return core.handle_request({url = "/hello/world", method = "GET", body = ""})"#)
            .eval()
            .unwrap();
        let status: i64 = result.get("status").unwrap();
        let body: String = result.get("body").unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "hi world");
    }

    #[test]
    fn unmatched_route_is_404() {
        let lua = Lua::new();
        lua.globals().set("c_log", lua.create_function(|_, (_, _): (String, String)| Ok(())).unwrap()).unwrap();
        lua.globals().set("c_get_memory", lua.create_function(|_, ()| Ok(0.0)).unwrap()).unwrap();
        let core: mlua::Table = lua.load(CORE_SOURCE).eval().unwrap();
        lua.globals().set("core", core).unwrap();

        let result: mlua::Table = lua
            .load(r#"return core.handle_request({url = "/nope", method = "GET", body = ""})"#)
            .eval()
            .unwrap();
        let status: i64 = result.get("status").unwrap();
        assert_eq!(status, 404);
    }

    #[test]
    fn parse_form_decodes_url_encoding() {
        let lua = Lua::new();
        lua.globals().set("c_log", lua.create_function(|_, (_, _): (String, String)| Ok(())).unwrap()).unwrap();
        lua.globals().set("c_get_memory", lua.create_function(|_, ()| Ok(0.0)).unwrap()).unwrap();
        let core: mlua::Table = lua.load(CORE_SOURCE).eval().unwrap();
        lua.globals().set("core", core).unwrap();

        let form: mlua::Table = lua
            .load(r#"return core.parse_form("name=John+Doe&city=New%20York")"#)
            .eval()
            .unwrap();
        let name: String = form.get("name").unwrap();
        let city: String = form.get("city").unwrap();
        assert_eq!(name, "John Doe");
        assert_eq!(city, "New York");
    }
}
