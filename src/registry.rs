//! # Hook Registry
//!
//! Maps a hook name to the ordered list of plugins that have registered a handler
//! for it. Registrations are kept sorted ascending by priority (lower runs first),
//! stable on ties by insertion order — Rust's `sort_by_key` is already stable, so
//! this falls out of the sort itself rather than needing a separate tie-break pass.

use crate::plugin::Plugin;
use std::sync::{Arc, Weak};

/// One plugin's claim on a hook name.
#[derive(Clone)]
pub struct HookRegistration {
    pub hook_name: String,
    pub plugin: Weak<Plugin>,
    pub function_name: String,
    pub priority: i32,
}

/// Default priority applied when a plugin calls `register_hook` without one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// An ordered sequence of [`HookRegistration`]s, sorted ascending by priority.
///
/// All mutation happens under the manager's lock (see [`crate::manager::PluginManager`]);
/// this type itself performs no locking. Grows on demand — unlike the fixed 256-slot
/// array in the system this was ported from, registration never fails on capacity.
#[derive(Default)]
pub struct HookRegistry {
    entries: Vec<HookRegistration>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Adds or replaces this plugin's registration for `hook_name`. At most one
    /// registration exists per (plugin, hook_name) pair; re-registering replaces
    /// function name and priority in place.
    pub fn register(
        &mut self,
        hook_name: &str,
        plugin_name: &str,
        plugin: Weak<Plugin>,
        function_name: String,
        priority: i32,
    ) {
        if let Some(existing) = self.entries.iter_mut().find(|r| {
            r.hook_name == hook_name
                && r.plugin
                    .upgrade()
                    .map(|p| p.name == plugin_name)
                    .unwrap_or(false)
        }) {
            existing.function_name = function_name;
            existing.priority = priority;
        } else {
            self.entries.push(HookRegistration {
                hook_name: hook_name.to_string(),
                plugin,
                function_name,
                priority,
            });
        }
        self.entries.sort_by_key(|r| r.priority);
    }

    /// Returns the highest-priority (lowest number) registration matching `hook_name`,
    /// skipping any whose plugin has already been dropped.
    pub fn first_match(&self, hook_name: &str) -> Option<HookRegistration> {
        self.entries
            .iter()
            .find(|r| r.hook_name == hook_name && r.plugin.upgrade().is_some())
            .cloned()
    }

    /// Returns every live registration matching `hook_name`, in registry order.
    pub fn all_matches(&self, hook_name: &str) -> Vec<HookRegistration> {
        self.entries
            .iter()
            .filter(|r| r.hook_name == hook_name && r.plugin.upgrade().is_some())
            .cloned()
            .collect()
    }

    /// Drops every registration. Called at the start of a refresh.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use std::sync::Arc;

    fn fake_plugin(name: &str) -> Arc<Plugin> {
        Arc::new(Plugin::new_stub(name))
    }

    #[test]
    fn registry_stays_sorted_ascending_by_priority() {
        let mut reg = HookRegistry::new();
        let p1 = fake_plugin("a");
        let p2 = fake_plugin("b");
        let p3 = fake_plugin("c");
        reg.register("H", "a", Arc::downgrade(&p1), "f1".into(), 200);
        reg.register("H", "b", Arc::downgrade(&p2), "f2".into(), 50);
        reg.register("H", "c", Arc::downgrade(&p3), "f3".into(), 100);

        let priorities: Vec<i32> = reg.all_matches("H").iter().map(|r| r.priority).collect();
        assert_eq!(priorities, vec![50, 100, 200]);
    }

    #[test]
    fn ties_preserve_insertion_order() {
        let mut reg = HookRegistry::new();
        let p1 = fake_plugin("first");
        let p2 = fake_plugin("second");
        reg.register("H", "first", Arc::downgrade(&p1), "f1".into(), 100);
        reg.register("H", "second", Arc::downgrade(&p2), "f2".into(), 100);

        let names: Vec<String> = reg.all_matches("H").iter().map(|r| r.function_name.clone()).collect();
        assert_eq!(names, vec!["f1".to_string(), "f2".to_string()]);
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut reg = HookRegistry::new();
        let p = fake_plugin("a");
        reg.register("H", "a", Arc::downgrade(&p), "f1".into(), 10);
        reg.register("H", "a", Arc::downgrade(&p), "f2".into(), 20);

        let matches = reg.all_matches("H");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].function_name, "f2");
        assert_eq!(matches[0].priority, 20);
    }

    #[test]
    fn first_match_picks_lowest_priority() {
        let mut reg = HookRegistry::new();
        let p1 = fake_plugin("a");
        let p2 = fake_plugin("b");
        let p3 = fake_plugin("c");
        reg.register("sum", "a", Arc::downgrade(&p1), "h50".into(), 50);
        reg.register("sum", "b", Arc::downgrade(&p2), "h100".into(), 100);
        reg.register("sum", "c", Arc::downgrade(&p3), "h200".into(), 200);

        let best = reg.first_match("sum").unwrap();
        assert_eq!(best.function_name, "h50");
    }

    #[test]
    fn dropped_plugin_is_skipped() {
        let mut reg = HookRegistry::new();
        let p = fake_plugin("gone");
        reg.register("H", "gone", Arc::downgrade(&p), "f".into(), 100);
        drop(p);
        assert!(reg.first_match("H").is_none());
    }
}
