// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Per-batch collection of task results.

use super::queue::Cancelled;
use super::sync::CancellationToken;
use super::util::Status;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};

/// Payload of a panic caught in a task.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

/// Collects the results of a batch of `n` tasks, in submission order.
///
/// Every task of the batch must report its completion exactly once, either
/// with [`set()`](Self::set) or with [`skip()`](Self::skip), each called on its
/// own clone of the collector. Waiters are only
/// released once all `n` tasks completed (or when their own cancellation
/// token is cancelled), even if a task panicked, so that no task of the batch
/// is still running when the batch is reported as done.
pub struct ResultCollector<R> {
    /// Result slots, indexed by submission order.
    values: Arc<Mutex<Vec<Option<R>>>>,
    /// Completion state, which waiters block on.
    progress: Arc<Status<Progress>>,
}

impl<R> Clone for ResultCollector<R> {
    fn clone(&self) -> Self {
        Self {
            values: self.values.clone(),
            progress: self.progress.clone(),
        }
    }
}

/// Completion state of a batch.
struct Progress {
    /// Number of tasks in the batch.
    len: usize,
    /// Number of tasks that reported their completion.
    done: usize,
    /// Payload of the first panic, if any.
    panic: Option<PanicPayload>,
    /// Whether tasks that haven't started yet should be skipped.
    abandoned: bool,
}

impl<R> ResultCollector<R> {
    /// Creates a collector for a batch of `len` tasks. A batch of zero tasks is
    /// immediately complete.
    pub fn new(len: usize) -> Self {
        Self {
            values: Arc::new(Mutex::new((0..len).map(|_| None).collect())),
            progress: Arc::new(Status::new(Progress {
                len,
                done: 0,
                panic: None,
                abandoned: false,
            })),
        }
    }

    /// Records the result of the task at the given index, consuming this
    /// handle.
    ///
    /// The handle to the result slots is released before the completion is
    /// signaled, so that the waiter holds the last reference to the results
    /// once it observes the batch as complete.
    pub fn set(self, index: usize, value: R) {
        let Self { values, progress } = self;
        {
            let mut values = values.lock().unwrap_or_else(PoisonError::into_inner);
            debug_assert!(values[index].is_none(), "result slot {index} written twice");
            values[index] = Some(value);
        }
        drop(values);
        Self::complete_one(&progress);
    }

    /// Records the completion of the task at the given index without any
    /// result, consuming this handle. This is used for tasks that panicked or
    /// were skipped.
    pub fn skip(self, _index: usize) {
        let Self { values, progress } = self;
        drop(values);
        Self::complete_one(&progress);
    }

    /// Records a panic caught in one of the tasks. Only the first panic of the
    /// batch is kept.
    ///
    /// This doesn't count as a completion: the task must still call
    /// [`skip()`](Self::skip).
    pub fn set_exception(&self, payload: PanicPayload) {
        let mut progress = self.progress.lock();
        if progress.panic.is_none() {
            progress.panic = Some(payload);
        }
    }

    /// Marks the batch as abandoned: tasks that haven't started yet should
    /// skip their work.
    pub fn abandon(&self) {
        self.progress.lock().abandoned = true;
    }

    /// Returns whether the batch was abandoned.
    pub fn is_abandoned(&self) -> bool {
        self.progress.lock().abandoned
    }

    fn complete_one(status: &Status<Progress>) {
        let mut progress = status.lock();
        progress.done += 1;
        debug_assert!(progress.done <= progress.len);
        if progress.done == progress.len {
            drop(progress);
            status.notify_all();
        }
    }

    /// Blocks until all the tasks of the batch completed, without inspecting
    /// the results.
    pub fn wait(&self) {
        drop(self.progress.wait_while(|p| p.done < p.len));
    }

    /// Blocks until all the tasks of the batch completed. If a task panicked,
    /// the first panic is resumed on the calling thread.
    pub fn await_completion(&self) {
        let mut progress = self.progress.wait_while(|p| p.done < p.len);
        if let Some(payload) = progress.panic.take() {
            drop(progress);
            std::panic::resume_unwind(payload);
        }
    }

    /// Blocks until all the tasks of the batch completed, and returns their
    /// results in submission order.
    ///
    /// If a task panicked, the first panic is resumed on the calling thread
    /// instead.
    pub fn await_all(&self) -> Vec<R> {
        self.await_completion();
        let values = std::mem::take(
            &mut *self.values.lock().unwrap_or_else(PoisonError::into_inner),
        );
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                value.unwrap_or_else(|| panic!("task {index} completed without a result"))
            })
            .collect()
    }
}

impl<R: Send> ResultCollector<R> {
    /// Same as [`await_all()`](Self::await_all), but returns early if the
    /// given token is cancelled.
    ///
    /// Tasks of the batch may still be running when this returns a
    /// cancellation error.
    pub fn await_all_with_token(&self, token: &CancellationToken) -> Result<Vec<R>, Cancelled> {
        let progress = self
            .progress
            .wait_while_or_cancelled(token, |p| p.done < p.len);
        let complete = progress.done == progress.len;
        drop(progress);
        if complete {
            Ok(self.await_all())
        } else {
            Err(Cancelled)
        }
    }
}

/// Waits for all the tasks of a batch to complete when dropped, including
/// while unwinding.
pub struct WaitOnDrop<'a, R>(pub &'a ResultCollector<R>);

impl<R> Drop for WaitOnDrop<'_, R> {
    fn drop(&mut self) {
        self.0.wait();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::time::Duration;

    #[test]
    fn test_empty_batch_is_ready() {
        let collector = ResultCollector::<u32>::new(0);
        assert_eq!(collector.await_all(), Vec::<u32>::new());
    }

    #[test]
    fn test_results_in_submission_order() {
        let collector = ResultCollector::new(4);
        std::thread::scope(|s| {
            for index in (0..4).rev() {
                let collector = collector.clone();
                s.spawn(move || {
                    std::thread::sleep(Duration::from_millis(5 * (4 - index) as u64));
                    collector.set(index, index * 10);
                });
            }
            assert_eq!(collector.await_all(), vec![0, 10, 20, 30]);
        });
    }

    #[test]
    fn test_first_panic_wins_after_full_completion() {
        let collector = ResultCollector::<u32>::new(3);
        collector.set_exception(Box::new("first"));
        collector.clone().skip(0);
        collector.set_exception(Box::new("second"));
        collector.clone().skip(1);

        let waiter = collector.clone();
        std::thread::scope(|s| {
            let handle = s.spawn(move || catch_unwind(AssertUnwindSafe(|| waiter.await_all())));
            std::thread::sleep(Duration::from_millis(20));
            assert!(!handle.is_finished());

            collector.clone().set(2, 2);
            let payload = handle.join().unwrap().unwrap_err();
            assert_eq!(payload.downcast_ref::<&str>(), Some(&"first"));
        });
    }

    #[test]
    fn test_await_cancelled() {
        let collector = ResultCollector::<u32>::new(2);
        let token = CancellationToken::new();
        collector.clone().set(0, 0);
        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                token.cancel();
            });
            assert_eq!(collector.await_all_with_token(&token), Err(Cancelled));
        });

        collector.abandon();
        assert!(collector.is_abandoned());
        collector.clone().skip(1);
        collector.wait();
    }

    #[test]
    fn test_await_with_token_completes() {
        let collector = ResultCollector::new(2);
        let token = CancellationToken::new();
        collector.clone().set(1, "b");
        collector.clone().set(0, "a");
        assert_eq!(collector.await_all_with_token(&token), Ok(vec!["a", "b"]));
    }

    #[test]
    fn test_wait_on_drop() {
        let collector = ResultCollector::new(1);
        std::thread::scope(|s| {
            let reporter = collector.clone();
            s.spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                reporter.set(0, ());
            });
            drop(WaitOnDrop(&collector));
            assert_eq!(collector.await_all(), vec![()]);
        });
    }
}
