//! # Worker Pool
//!
//! A fixed pool of OS threads (`std::thread`, not Tokio tasks) that drains the
//! shared work queue. Each deferred job gets a freshly built, disposable Lua
//! environment (`Plugin::run_deferred`) — the pool itself holds no per-job
//! state, and a job never observes another job's leftover globals. The same
//! threads also perform HTTP request dispatch (see [`crate::router`]), which
//! does reuse a plugin's persistent environment, so one bounded pool governs
//! all plugin execution regardless of which kind it is.

use crate::manager::PluginManager;
use crate::queue::WorkItem;
use std::sync::Arc;
use std::thread::JoinHandle;

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` worker threads, each looping on `manager.job_queue.take()`
    /// until it returns `None` (queue shut down and drained).
    pub fn spawn(count: usize, manager: Arc<PluginManager>) -> WorkerPool {
        let handles = (0..count)
            .map(|id| {
                let manager = Arc::clone(&manager);
                std::thread::Builder::new()
                    .name(format!("pluginhost-worker-{id}"))
                    .spawn(move || worker_loop(id, manager))
                    .expect("failed to spawn worker thread")
            })
            .collect();
        WorkerPool { handles }
    }

    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(id: usize, manager: Arc<PluginManager>) {
    while let Some(item) = manager.job_queue.take() {
        match item {
            WorkItem::Deferred(job) => run_deferred_job(id, job),
            WorkItem::Dispatch(request) => {
                let response = crate::router::route_request(&manager, request.url, request.method, request.body);
                let _ = request.reply.send(response);
            }
        }
    }
    tracing::debug!(worker = id, "worker exiting, queue shut down");
}

fn run_deferred_job(id: usize, job: crate::queue::Job) {
    let Some(plugin) = job.plugin.upgrade() else {
        tracing::debug!(worker = id, function = %job.function_name, "job's plugin already dropped, skipping");
        return;
    };

    let payload: serde_json::Value = match serde_json::from_slice(&job.payload) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(worker = id, plugin = %plugin.name, error = %e, "job payload was not valid json");
            return;
        }
    };

    if let Err(e) = crate::plugin::Plugin::run_deferred(&plugin, &job.function_name, payload) {
        tracing::warn!(
            worker = id,
            plugin = %plugin.name,
            function = %job.function_name,
            error = %e,
            "deferred job failed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::plugin::Plugin;
    use crate::queue::Job;
    use std::time::Duration;

    #[test]
    fn worker_runs_deferred_job_then_exits_on_shutdown() {
        let manager = PluginManager::new(&RuntimeConfig {
            plugins_dir: "/nonexistent".into(),
            worker_count: 1,
            max_recursion_depth: 10,
        });

        // The job runs in its own fresh Lua environment, so completion has to be
        // observed through something that outlives that environment — the
        // plugin's SQLite file, not a global.
        let dir = tempfile::tempdir().unwrap();
        let plugin_dir = dir.path().join("counter");
        std::fs::create_dir_all(&plugin_dir).unwrap();
        std::fs::write(
            plugin_dir.join("plugin.lua"),
            r#"
            function work(x)
                c_db_exec("CREATE TABLE IF NOT EXISTS ran (x INTEGER)")
                c_db_exec("INSERT INTO ran (x) VALUES (1)")
            end
            "#,
        )
        .unwrap();
        let plugin = Plugin::load("counter".into(), plugin_dir, Arc::downgrade(&manager)).unwrap();

        manager.job_queue.put_job(Job {
            plugin: Arc::downgrade(&plugin),
            function_name: "work".into(),
            payload: serde_json::to_vec(&serde_json::json!(null)).unwrap(),
        });

        let pool = WorkerPool::spawn(1, Arc::clone(&manager));
        std::thread::sleep(Duration::from_millis(100));
        manager.job_queue.shutdown();
        pool.join();

        let rows = plugin.db_query("SELECT x FROM ran").unwrap();
        assert_eq!(rows, vec![serde_json::json!({"x": 1})]);
    }

    #[test]
    fn worker_skips_job_for_dropped_plugin() {
        let manager = PluginManager::new(&RuntimeConfig {
            plugins_dir: "/nonexistent".into(),
            worker_count: 1,
            max_recursion_depth: 10,
        });

        let plugin = Arc::new(Plugin::new_stub("ephemeral"));
        let weak = Arc::downgrade(&plugin);
        drop(plugin);

        manager.job_queue.put_job(Job {
            plugin: weak,
            function_name: "whatever".into(),
            payload: serde_json::to_vec(&serde_json::json!(null)).unwrap(),
        });

        let pool = WorkerPool::spawn(1, Arc::clone(&manager));
        std::thread::sleep(Duration::from_millis(50));
        manager.job_queue.shutdown();
        pool.join();
    }
}
