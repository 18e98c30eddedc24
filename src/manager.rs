//! # Plugin Manager
//!
//! Owns the plugin list, the hook registry, and the job queue; coordinates the
//! worker pool; and runs `refresh()` to reload every plugin from disk. A global
//! `RwLock<()>` gates refresh against in-flight dispatch: refresh takes the write
//! side, dispatch and the router take the read side, so a refresh never tears
//! down a plugin a live request is using.

use crate::config::RuntimeConfig;
use crate::plugin::Plugin;
use crate::queue::JobQueue;
use crate::registry::HookRegistry;
use crate::worker::WorkerPool;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

pub struct PluginManager {
    plugins_dir: PathBuf,
    max_recursion_depth: usize,
    plugins: Mutex<Vec<Arc<Plugin>>>,
    registry: Mutex<HookRegistry>,
    pub job_queue: Arc<JobQueue>,
    /// Write side held by `refresh`; read side held for the duration of a single
    /// dispatch (sync query, async emit, or router request).
    refresh_gate: RwLock<()>,
    worker_pool: Mutex<Option<WorkerPool>>,
}

impl PluginManager {
    /// Builds an empty manager — no plugins loaded yet. Call `refresh()` to load
    /// from `config.plugins_dir`, then `start_workers()` once plugins exist.
    pub fn new(config: &RuntimeConfig) -> Arc<PluginManager> {
        Arc::new(PluginManager {
            plugins_dir: PathBuf::from(&config.plugins_dir),
            max_recursion_depth: config.max_recursion_depth,
            plugins: Mutex::new(Vec::new()),
            registry: Mutex::new(HookRegistry::new()),
            job_queue: Arc::new(JobQueue::new()),
            refresh_gate: RwLock::new(()),
            worker_pool: Mutex::new(None),
        })
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    /// Starts `worker_count` workers draining the job queue. Call once, after the
    /// first `refresh()`.
    pub fn start_workers(self: &Arc<Self>, worker_count: usize) {
        let mut slot = self.worker_pool.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(WorkerPool::spawn(worker_count, Arc::clone(self)));
    }

    pub fn shutdown(&self) {
        self.job_queue.shutdown();
        if let Some(pool) = self.worker_pool.lock().take() {
            pool.join();
        }
        self.job_queue.drain();
    }

    /// Acquires the dispatch-side read guard. Held for the lifetime of one `query`,
    /// one `emit`, or one router dispatch.
    pub fn dispatch_guard(&self) -> parking_lot::RwLockReadGuard<'_, ()> {
        self.refresh_gate.read()
    }

    pub fn registry(&self) -> &Mutex<HookRegistry> {
        &self.registry
    }

    pub fn find_plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.lock().iter().find(|p| p.name == name).cloned()
    }

    pub fn all_plugins(&self) -> Vec<Arc<Plugin>> {
        self.plugins.lock().clone()
    }

    /// Reloads every plugin from `plugins_dir`, in the order spec.md §4.7 prescribes:
    /// drop registrations, destroy plugins, clear the list, then reconstruct.
    pub fn refresh(self: &Arc<Self>) -> Vec<(String, PluginHostLoadOutcome)> {
        let _write = self.refresh_gate.write();

        self.registry.lock().clear();
        self.plugins.lock().clear();

        let mut outcomes = Vec::new();
        let entries = match std::fs::read_dir(&self.plugins_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, dir = %self.plugins_dir.display(), "cannot read plugins directory");
                return outcomes;
            }
        };

        let mut new_plugins = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n.to_string(),
                None => continue,
            };
            if !path.join("plugin.lua").is_file() {
                continue;
            }

            match Plugin::load(name.clone(), path, Arc::downgrade(self)) {
                Ok(plugin) => {
                    if let Err(e) = self.register_plugin_hooks(&plugin) {
                        tracing::warn!(plugin = %name, error = %e, "plugin registered no hooks during load");
                    }
                    if let Err(e) = self.apply_plugin_schema(&plugin) {
                        tracing::warn!(plugin = %name, error = %e, "schema application failed, plugin still loaded");
                    }
                    new_plugins.push(plugin);
                    outcomes.push((name, PluginHostLoadOutcome::Loaded));
                }
                Err(e) => {
                    tracing::warn!(plugin = %name, error = %e, "plugin failed to load, skipping");
                    outcomes.push((name, PluginHostLoadOutcome::Failed(e.to_string())));
                }
            }
        }

        *self.plugins.lock() = new_plugins;
        outcomes
    }

    /// A freshly loaded plugin registers its own hooks by calling `register_hook`
    /// during its top-level execution (already run by `Plugin::load`); this is a
    /// no-op hook for future bookkeeping and exists so refresh has one call site
    /// per concern.
    fn register_plugin_hooks(&self, _plugin: &Arc<Plugin>) -> Result<(), crate::error::PluginHostError> {
        Ok(())
    }

    /// If the plugin's Lua environment left a global `schema` table behind, apply
    /// each entry as `CREATE TABLE IF NOT EXISTS <name> (<columns>)`.
    fn apply_plugin_schema(&self, plugin: &Arc<Plugin>) -> Result<(), crate::error::PluginHostError> {
        let schema = plugin.with_lua(|lua| -> Option<Vec<(String, String)>> {
            let schema: mlua::Table = lua.globals().get("schema").ok()?;
            let mut entries = Vec::new();
            for pair in schema.pairs::<String, String>() {
                if let Ok((table, columns)) = pair {
                    entries.push((table, columns));
                }
            }
            Some(entries)
        });
        match schema {
            Some(entries) => plugin.apply_schema(&entries),
            None => Ok(()),
        }
    }

    /// Registers (or replaces) `plugin_name`'s claim on `hook_name`, keeping the
    /// registry sorted. Called from the `register_hook` host callback.
    pub fn register_hook(
        &self,
        hook_name: &str,
        plugin_name: &str,
        plugin: Weak<Plugin>,
        function_name: String,
        priority: i32,
    ) {
        self.registry
            .lock()
            .register(hook_name, plugin_name, plugin, function_name, priority);
    }
}

#[derive(Debug, Clone)]
pub enum PluginHostLoadOutcome {
    Loaded,
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;

    fn test_config(dir: &std::path::Path) -> RuntimeConfig {
        RuntimeConfig {
            plugins_dir: dir.to_string_lossy().to_string(),
            worker_count: 2,
            max_recursion_depth: 10,
        }
    }

    #[test]
    fn refresh_on_empty_directory_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PluginManager::new(&test_config(dir.path()));
        let outcomes = manager.refresh();
        assert!(outcomes.is_empty());
        assert!(manager.all_plugins().is_empty());
    }

    #[test]
    fn refresh_loads_a_valid_plugin() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("greeter");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.lua"),
            "function handle_request(req) return \"hi\" end",
        )
        .unwrap();

        let manager = PluginManager::new(&test_config(dir.path()));
        let outcomes = manager.refresh();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, PluginHostLoadOutcome::Loaded));
        assert!(manager.find_plugin("greeter").is_some());
    }

    #[test]
    fn refresh_skips_directories_without_plugin_lua() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("not_a_plugin")).unwrap();

        let manager = PluginManager::new(&test_config(dir.path()));
        let outcomes = manager.refresh();
        assert!(outcomes.is_empty());
    }

    #[test]
    fn refresh_records_load_failure_but_continues() {
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("broken");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(plugin_dir.join("plugin.lua"), "this is not lua (((").unwrap();

        let manager = PluginManager::new(&test_config(dir.path()));
        let outcomes = manager.refresh();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, PluginHostLoadOutcome::Failed(_)));
        assert!(manager.find_plugin("broken").is_none());
    }
}
