//! Synchronous dispatcher: `query(name, data) -> result | (nil, message)`.
//!
//! Exactly one hook runs — the registry's first live match for `name`. Recursion
//! is bounded by a thread-local counter, not a process-wide one: an `A -> B -> A`
//! chain is three calls deep on the *same* OS thread, and the plugin being
//! re-entered is protected from concurrent access by its own `ReentrantMutex`, not
//! by this counter. A process-wide counter would wrongly conflate unrelated
//! concurrent chains running on different worker threads.

use crate::error::PluginHostError;
use crate::manager::PluginManager;
use std::cell::Cell;

thread_local! {
    static RECURSION_DEPTH: Cell<usize> = Cell::new(0);
}

/// Invokes the highest-priority live registration for `hook_name` with `data`,
/// returning its bridged JSON result.
pub fn query(
    manager: &PluginManager,
    hook_name: &str,
    data: serde_json::Value,
) -> Result<serde_json::Value, PluginHostError> {
    let depth = RECURSION_DEPTH.with(|d| {
        let next = d.get() + 1;
        d.set(next);
        next
    });
    let result = query_inner(manager, hook_name, data, depth);
    RECURSION_DEPTH.with(|d| d.set(d.get() - 1));
    result
}

fn query_inner(
    manager: &PluginManager,
    hook_name: &str,
    data: serde_json::Value,
    depth: usize,
) -> Result<serde_json::Value, PluginHostError> {
    if depth > manager.max_recursion_depth() {
        return Err(PluginHostError::RecursionLimit);
    }

    let _guard = manager.dispatch_guard();

    let registration = manager
        .registry()
        .lock()
        .first_match(hook_name)
        .ok_or_else(|| PluginHostError::NoSuchHook(hook_name.to_string()))?;

    let plugin = registration
        .plugin
        .upgrade()
        .ok_or_else(|| PluginHostError::NoSuchHook(hook_name.to_string()))?;

    plugin.call_function(&registration.function_name, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::plugin::Plugin;
    use std::sync::Arc;

    fn manager_with_depth(depth: usize) -> Arc<PluginManager> {
        PluginManager::new(&RuntimeConfig {
            plugins_dir: "/nonexistent".into(),
            worker_count: 1,
            max_recursion_depth: depth,
        })
    }

    fn plugin_with_function(manager: &Arc<PluginManager>, name: &str, source: &str) -> Arc<Plugin> {
        let plugin = Arc::new(Plugin::new_stub(name));
        plugin.with_lua(|lua| lua.load(source).exec().unwrap());
        let _ = manager;
        plugin
    }

    #[test]
    fn no_registration_returns_no_such_hook() {
        let manager = manager_with_depth(10);
        let err = query(&manager, "missing", serde_json::json!(null));
        assert!(matches!(err, Err(PluginHostError::NoSuchHook(_))));
    }

    #[test]
    fn first_registered_hook_is_invoked() {
        let manager = manager_with_depth(10);
        let plugin = plugin_with_function(&manager, "sum", "function add(x) return x.a + x.b end");
        manager.register_hook("sum", "sum", Arc::downgrade(&plugin), "add".into(), 100);

        let result = query(&manager, "sum", serde_json::json!({"a": 2, "b": 3})).unwrap();
        assert_eq!(result, serde_json::json!(5.0));
    }

    #[test]
    fn recursion_beyond_limit_fails() {
        let manager = manager_with_depth(2);
        RECURSION_DEPTH.with(|d| d.set(2));
        let err = query(&manager, "whatever", serde_json::json!(null));
        assert!(matches!(err, Err(PluginHostError::RecursionLimit)));
        RECURSION_DEPTH.with(|d| d.set(0));
    }
}
