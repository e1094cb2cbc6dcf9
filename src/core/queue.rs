// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A bounded FIFO queue of tasks shared by the worker threads of a pool.

use super::sync::{CancellationToken, Wakeable};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// A unit of work that can be sent to a worker thread.
pub trait Job {
    /// Runs this job, consuming it.
    fn run(self: Box<Self>);
}

/// A type-erased job, as stored in a [`BoundedTaskQueue`].
pub type Task = Box<dyn Job + Send + 'static>;

/// Marker error returned when a blocking queue operation observes a cancelled
/// token.
#[derive(Debug, PartialEq, Eq)]
pub struct Cancelled;

/// A capacity-bounded FIFO queue of tasks, safe to share between producer and
/// consumer threads.
///
/// Cloning the queue yields another handle to the same tasks.
#[derive(Clone)]
pub struct BoundedTaskQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    /// Maximum number of pending tasks.
    capacity: usize,
    /// Pending tasks, oldest first.
    tasks: Mutex<VecDeque<Task>>,
    /// Signaled when a task is pushed.
    not_empty: Condvar,
    /// Signaled when a task is popped.
    not_full: Condvar,
}

impl QueueInner {
    fn lock(&self) -> MutexGuard<'_, VecDeque<Task>> {
        // Tasks never run while the lock is held, so the queue is always in a
        // consistent state.
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Wakeable for QueueInner {
    fn wake(&self) {
        drop(self.lock());
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}

impl BoundedTaskQueue {
    /// Creates a queue holding at most `capacity` pending tasks.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "a task queue needs a positive capacity");
        Self {
            inner: Arc::new(QueueInner {
                capacity,
                tasks: Mutex::new(VecDeque::new()),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
            }),
        }
    }

    /// Creates a queue whose capacity is the maximum representable count.
    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Returns the maximum number of pending tasks.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Returns the number of pending tasks.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns whether there is no pending task.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Appends a task at the end of the queue, waiting while the queue is full.
    ///
    /// If any of the tokens is cancelled while waiting for room, the task is
    /// handed back to the caller without being enqueued.
    pub fn enqueue(&self, task: Task, tokens: &[&CancellationToken]) -> Result<(), Task> {
        let mut tasks = self.inner.lock();
        if tasks.len() >= self.inner.capacity {
            let _listeners = tokens
                .iter()
                .map(|token| token.listen(self.inner.clone()))
                .collect::<Vec<_>>();
            tasks = self
                .inner
                .not_full
                .wait_while(tasks, |tasks| {
                    tasks.len() >= self.inner.capacity
                        && !tokens.iter().any(|token| token.is_cancelled())
                })
                .unwrap_or_else(PoisonError::into_inner);
            if tasks.len() >= self.inner.capacity {
                return Err(task);
            }
        }
        tasks.push_back(task);
        drop(tasks);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Removes the oldest task from the queue, waiting while the queue is
    /// empty.
    ///
    /// Fails as soon as the token is cancelled, even if tasks are pending.
    pub fn dequeue(&self, token: &CancellationToken) -> Result<Task, Cancelled> {
        let mut tasks = self.inner.lock();
        if tasks.is_empty() && !token.is_cancelled() {
            let _listener = token.listen(self.inner.clone());
            tasks = self
                .inner
                .not_empty
                .wait_while(tasks, |tasks| tasks.is_empty() && !token.is_cancelled())
                .unwrap_or_else(PoisonError::into_inner);
        }
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        let task = tasks.pop_front().ok_or(Cancelled)?;
        drop(tasks);
        self.inner.not_full.notify_one();
        Ok(task)
    }

    /// Removes all the pending tasks, in FIFO order.
    pub fn drain(&self) -> Vec<Task> {
        let tasks = self.inner.lock().drain(..).collect::<Vec<_>>();
        self.inner.not_full.notify_all();
        tasks
    }
}
