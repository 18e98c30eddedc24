//! # Job Queue
//!
//! A bounded-producer, FIFO work queue shared by deferred jobs (`defer`/`emit`)
//! and HTTP dispatch (the Request Router). Backed by a `VecDeque` behind a
//! `Mutex` + `Condvar` rather than a channel, so `take` can distinguish "queue
//! empty, keep waiting" from "shutdown, stop waiting" the way the spec's
//! `shutdown` flag is meant to: a `Condvar::notify_all` on shutdown wakes every
//! blocked worker and each sees `shutdown == true` and returns `None`.

use crate::plugin::Plugin;
use crate::router::RouteResponse;
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, Weak};
use tokio::sync::oneshot;

/// A unit of deferred work: call `function_name` on `plugin` with `payload` as the
/// sole argument once decoded back into a Lua table.
pub struct Job {
    pub plugin: Weak<Plugin>,
    pub function_name: String,
    pub payload: Vec<u8>,
}

/// A collected HTTP request waiting for a worker to dispatch it and hand the
/// result back over `reply`. See [`crate::router`].
pub struct DispatchRequest {
    pub url: String,
    pub method: String,
    pub body: Vec<u8>,
    pub reply: oneshot::Sender<RouteResponse>,
}

/// What a worker actually pulls off the queue: either end of the spec's single
/// work stream — a deferred job, or a request waiting on dispatch.
pub enum WorkItem {
    Deferred(Job),
    Dispatch(DispatchRequest),
}

struct Inner {
    queue: VecDeque<WorkItem>,
    shutdown: bool,
}

/// FIFO work queue with blocking `take` and non-blocking `put`.
///
/// Multiple producers may `put` concurrently (the mutex serializes them); `take`
/// blocks until an item is available or the queue is shut down.
pub struct JobQueue {
    state: Mutex<Inner>,
    not_empty: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Inner {
                queue: VecDeque::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Appends a work item and wakes one waiting worker.
    pub fn put(&self, item: WorkItem) {
        let mut inner = self.state.lock().unwrap();
        if inner.shutdown {
            return;
        }
        inner.queue.push_back(item);
        self.not_empty.notify_one();
    }

    pub fn put_job(&self, job: Job) {
        self.put(WorkItem::Deferred(job));
    }

    pub fn put_dispatch(&self, request: DispatchRequest) -> bool {
        let mut inner = self.state.lock().unwrap();
        if inner.shutdown {
            return false;
        }
        inner.queue.push_back(WorkItem::Dispatch(request));
        self.not_empty.notify_one();
        true
    }

    /// Blocks until a work item is available, or returns `None` once the queue
    /// has been shut down and drained.
    pub fn take(&self) -> Option<WorkItem> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(item) = inner.queue.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Marks the queue as shutting down and wakes every blocked `take`. Monotone:
    /// calling this more than once is harmless.
    pub fn shutdown(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.shutdown = true;
        self.not_empty.notify_all();
    }

    /// Drains and drops any jobs still queued. Called after workers have joined,
    /// so no thread can observe a job disappear mid-take.
    pub fn drain(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.queue.clear();
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
