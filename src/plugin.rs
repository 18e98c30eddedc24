//! # Plugin
//!
//! A `Plugin` wraps one sandboxed Lua environment plus the per-plugin resources
//! bound to it: its own SQLite file, its own reentrant lock, and the closures a
//! plugin's Lua code calls out through (`register_hook`, `query`, `emit`, `defer`,
//! `db_exec`, `db_query`, `get_memory`, `log`). No two plugins ever share an
//! `mlua::Lua` — every cross-plugin value transfer goes through [`crate::value::Value`].

use crate::error::PluginHostError;
use crate::manager::PluginManager;
use mlua::{Lua, Value as LuaValue};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// One loaded plugin: its identity, its isolated Lua environment, and the
/// manager it is registered with (used to reach the hook registry and job queue
/// from inside host callbacks).
pub struct Plugin {
    pub name: String,
    pub path: PathBuf,
    /// Wrapped in a `ReentrantMutex` so an `A -> B -> A` `query` chain re-entering
    /// this plugin from the same OS thread does not self-deadlock.
    lua: ReentrantMutex<RefCell<Lua>>,
    manager: Weak<PluginManager>,
}

impl Plugin {
    /// Loads `<path>/plugin.lua`, installs the `core` framework library and the
    /// host callback surface, then executes the plugin's top-level code once.
    /// Construction fails, and the partially built environment is dropped, if the
    /// source has a syntax error or raises while running.
    pub fn load(
        name: String,
        path: PathBuf,
        manager: Weak<PluginManager>,
    ) -> Result<Arc<Plugin>, PluginHostError> {
        let lua = Lua::new();
        let plugin = Arc::new(Plugin {
            name,
            path,
            lua: ReentrantMutex::new(RefCell::new(lua)),
            manager,
        });

        {
            let guard = plugin.lua.lock();
            let lua = guard.borrow();
            load_source_into(&lua, &plugin).map_err(|e| PluginHostError::PluginLoad {
                message: e.to_string(),
            })?;
        }

        Ok(plugin)
    }

    /// Runs `function_name(payload)` in a brand-new, disposable Lua environment
    /// built fresh for this one call: the plugin's source is reloaded, the host
    /// callbacks are installed against it, the function is invoked once, and the
    /// whole environment is dropped when this returns. Deferred jobs never touch
    /// this plugin's persistent, query/emit-serving environment — each job sees
    /// only the module-level state its own reload of `plugin.lua` produces.
    pub fn run_deferred(
        plugin: &Arc<Plugin>,
        function_name: &str,
        payload: serde_json::Value,
    ) -> Result<(), PluginHostError> {
        let lua = Lua::new();
        load_source_into(&lua, plugin).map_err(|e| PluginHostError::HookCall {
            message: e.to_string(),
        })?;

        let func: mlua::Function =
            lua.globals()
                .get(function_name)
                .map_err(|_| PluginHostError::NoSuchHook(function_name.to_string()))?;
        let lua_arg = crate::value::Value::json_to_lua(&payload, &lua).map_err(|e| {
            PluginHostError::HookCall {
                message: e.to_string(),
            }
        })?;
        let _: LuaValue = func.call(lua_arg).map_err(|e| PluginHostError::HookCall {
            message: e.to_string(),
        })?;
        Ok(())
    }

    /// Builds a bare plugin with no Lua source on disk, for unit tests that only
    /// need something to register a `Weak<Plugin>` against.
    #[cfg(test)]
    pub fn new_stub(name: &str) -> Plugin {
        Plugin {
            name: name.to_string(),
            path: PathBuf::new(),
            lua: ReentrantMutex::new(RefCell::new(Lua::new())),
            manager: Weak::new(),
        }
    }

    pub fn manager(&self) -> Option<Arc<PluginManager>> {
        self.manager.upgrade()
    }

    /// Runs `f` with a borrow of this plugin's Lua environment, serialized by the
    /// reentrant lock so the same OS thread may re-enter while a different thread
    /// waits its turn.
    pub fn with_lua<R>(&self, f: impl FnOnce(&Lua) -> R) -> R {
        let guard = self.lua.lock();
        let lua = guard.borrow();
        f(&lua)
    }

    /// Looks up `function_name` as a global and calls it with `arg`, bridging the
    /// return value back out as JSON. Used by both the Sync Dispatcher and the
    /// worker pool, which differ only in how they obtained `arg`.
    pub fn call_function(
        &self,
        function_name: &str,
        arg: serde_json::Value,
    ) -> Result<serde_json::Value, PluginHostError> {
        self.with_lua(|lua| {
            let func: mlua::Function =
                lua.globals()
                    .get(function_name)
                    .map_err(|_| PluginHostError::NoSuchHook(function_name.to_string()))?;
            let lua_arg = crate::value::Value::json_to_lua(&arg, lua).map_err(|e| {
                PluginHostError::HookCall {
                    message: e.to_string(),
                }
            })?;
            let result: LuaValue = func.call(lua_arg).map_err(|e| PluginHostError::HookCall {
                message: e.to_string(),
            })?;
            Ok(crate::value::Value::lua_to_json(&result))
        })
    }

    /// Current Lua heap size in kilobytes, mirroring `lua_gc(L, LUA_GCCOUNT, 0)`.
    pub fn memory_kb(&self) -> f64 {
        self.with_lua(|lua| lua.used_memory() as f64 / 1024.0)
    }

    /// Opens this plugin's SQLite file (`<path>/plugin.db`), runs `sql` with
    /// `execute_batch`, and closes it.
    pub fn db_exec(&self, sql: &str) -> Result<(), PluginHostError> {
        let conn = self.open_db()?;
        conn.execute_batch(sql)
            .map_err(|e| PluginHostError::Database {
                message: e.to_string(),
            })
    }

    /// Opens this plugin's SQLite file, runs `sql` as a query, and returns each row
    /// as a JSON object keyed by column name.
    pub fn db_query(&self, sql: &str) -> Result<Vec<serde_json::Value>, PluginHostError> {
        let conn = self.open_db()?;
        let mut stmt = conn.prepare(sql).map_err(|e| PluginHostError::Database {
            message: e.to_string(),
        })?;
        let column_names: Vec<String> =
            stmt.column_names().iter().map(|s| s.to_string()).collect();

        let rows = stmt
            .query_map([], |row| {
                let mut map = serde_json::Map::new();
                for (i, col) in column_names.iter().enumerate() {
                    let value: rusqlite::types::Value = row.get(i)?;
                    map.insert(col.clone(), sqlite_value_to_json(value));
                }
                Ok(serde_json::Value::Object(map))
            })
            .map_err(|e| PluginHostError::Database {
                message: e.to_string(),
            })?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| PluginHostError::Database {
                message: e.to_string(),
            })
    }

    fn open_db(&self) -> Result<rusqlite::Connection, PluginHostError> {
        let db_path = self.path.join("plugin.db");
        rusqlite::Connection::open(&db_path).map_err(|e| PluginHostError::Database {
            message: e.to_string(),
        })
    }

    /// Applies a plugin's declared `schema` table: one `CREATE TABLE IF NOT EXISTS`
    /// per entry, with the column definition list taken verbatim from the plugin.
    pub fn apply_schema(&self, schema: &[(String, String)]) -> Result<(), PluginHostError> {
        if schema.is_empty() {
            return Ok(());
        }
        let conn = self.open_db()?;
        for (table, columns) in schema {
            let ddl = format!("CREATE TABLE IF NOT EXISTS {} ({})", table, columns);
            conn.execute_batch(&ddl)
                .map_err(|e| PluginHostError::Database {
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

/// Sets `PLUGIN_DIR`, installs the `core` framework library and the host
/// callback surface, then loads and executes `<plugin.path>/plugin.lua` once
/// into `lua`. Shared by the persistent environment built at load time and the
/// disposable one built per deferred job.
fn load_source_into(lua: &Lua, plugin: &Arc<Plugin>) -> mlua::Result<()> {
    lua.globals()
        .set("PLUGIN_DIR", plugin.path.to_string_lossy().to_string())?;
    crate::lua_framework::install(lua, plugin)?;

    let source_path = plugin.path.join("plugin.lua");
    let source = std::fs::read_to_string(&source_path).map_err(|e| {
        mlua::Error::RuntimeError(format!("{}: {}", source_path.display(), e))
    })?;
    lua.load(&source).set_name(plugin.name.clone()).exec()
}

fn sqlite_value_to_json(value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Sql::Null => serde_json::Value::Null,
        Sql::Integer(i) => serde_json::Value::from(i),
        Sql::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Sql::Text(s) => serde_json::Value::String(s),
        Sql::Blob(b) => serde_json::Value::String(String::from_utf8_lossy(&b).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_plugin_reports_its_name() {
        let p = Plugin::new_stub("widgets");
        assert_eq!(p.name, "widgets");
        assert!(p.manager().is_none());
    }

    #[test]
    fn call_function_reports_missing_global() {
        let p = Plugin::new_stub("widgets");
        let err = p.call_function("does_not_exist", serde_json::json!(null));
        assert!(matches!(err, Err(PluginHostError::NoSuchHook(_))));
    }

    #[test]
    fn call_function_round_trips_through_json() {
        let p = Plugin::new_stub("math");
        p.with_lua(|lua| {
            lua.load("function double(x) return x * 2 end").exec().unwrap();
        });
        let result = p.call_function("double", serde_json::json!(21)).unwrap();
        assert_eq!(result, serde_json::json!(42.0));
    }

    #[test]
    fn memory_kb_is_positive() {
        let p = Plugin::new_stub("widgets");
        assert!(p.memory_kb() > 0.0);
    }

    #[test]
    fn run_deferred_does_not_see_state_from_a_prior_call() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("counter");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.lua"),
            r#"
            calls = calls or 0
            function bump(x) calls = calls + 1; return calls end
            "#,
        )
        .unwrap();

        let plugin = Plugin::load("counter".into(), plugin_dir, Weak::new()).unwrap();

        // Two deferred calls, each against its own fresh reload of plugin.lua:
        // `calls` starts back at 0 every time, it never reaches 2.
        Plugin::run_deferred(&plugin, "bump", serde_json::json!(null)).unwrap();
        Plugin::run_deferred(&plugin, "bump", serde_json::json!(null)).unwrap();

        // The persistent environment (used by query/emit/handle_request) never
        // ran `bump` at all, so its own `calls` global is still unset.
        let calls: mlua::Value = plugin.with_lua(|lua| lua.globals().get("calls").unwrap());
        assert!(matches!(calls, mlua::Value::Nil));
    }
}
