//! Asynchronous dispatcher: `emit(name, data) -> listeners_notified`.
//!
//! Unlike `query`, every live registration for `name` runs — each as a separate
//! deferred job, so a failing or slow listener cannot block another. `data` is
//! serialized to JSON once and cloned per listener; the job queue decodes it back
//! into that listener's own Lua environment when a worker picks it up.

use crate::manager::PluginManager;
use crate::queue::Job;

/// Enqueues one job per live registration for `hook_name`, in registry
/// (priority) order, and returns how many listeners were notified.
pub fn emit(manager: &PluginManager, hook_name: &str, data: serde_json::Value) -> usize {
    let _guard = manager.dispatch_guard();

    let registrations = manager.registry().lock().all_matches(hook_name);
    let payload = serde_json::to_vec(&data).unwrap_or_default();

    let mut notified = 0;
    for registration in registrations {
        manager.job_queue.put_job(Job {
            plugin: registration.plugin,
            function_name: registration.function_name,
            payload: payload.clone(),
        });
        notified += 1;
    }
    notified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::plugin::Plugin;
    use std::sync::Arc;

    fn manager() -> Arc<PluginManager> {
        PluginManager::new(&RuntimeConfig {
            plugins_dir: "/nonexistent".into(),
            worker_count: 1,
            max_recursion_depth: 10,
        })
    }

    #[test]
    fn emit_with_no_listeners_notifies_zero() {
        let manager = manager();
        assert_eq!(emit(&manager, "nobody_listens", serde_json::json!(null)), 0);
    }

    #[test]
    fn emit_enqueues_one_job_per_listener() {
        let manager = manager();
        let a = Arc::new(Plugin::new_stub("a"));
        let b = Arc::new(Plugin::new_stub("b"));
        manager.register_hook("tick", "a", Arc::downgrade(&a), "on_tick".into(), 50);
        manager.register_hook("tick", "b", Arc::downgrade(&b), "on_tick".into(), 100);

        let notified = emit(&manager, "tick", serde_json::json!({"n": 1}));
        assert_eq!(notified, 2);
        assert_eq!(manager.job_queue.len(), 2);

        let first = manager.job_queue.take().unwrap();
        let crate::queue::WorkItem::Deferred(first) = first else {
            panic!("expected a deferred job")
        };
        assert_eq!(first.function_name, "on_tick");
        assert!(first.plugin.upgrade().is_some());
    }
}
