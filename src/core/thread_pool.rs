// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! A fixed-size pool of worker threads executing batches of tasks.

use super::collector::{ResultCollector, WaitOnDrop};
use super::queue::{BoundedTaskQueue, Cancelled, Job, Task};
use super::sync::CancellationToken;
use super::util::{erase_lifetime, Status};
use crate::error::{Error, Result};
#[cfg(feature = "log_parallelism")]
use crate::macros::log_info;
use crate::macros::{log_debug, log_error, log_warn};
use crossbeam_utils::CachePadded;
// Platforms that support `libc::sched_setaffinity()`.
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
use nix::{
    sched::{sched_setaffinity, CpuSet},
    unistd::Pid,
};
use std::convert::TryFrom;
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

/// Number of threads to spawn in a worker pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadCount {
    /// Spawn the number of threads returned by
    /// [`std::thread::available_parallelism()`].
    AvailableParallelism,
    /// Spawn the given number of threads.
    Count(NonZeroUsize),
}

impl TryFrom<usize> for ThreadCount {
    type Error = <NonZeroUsize as TryFrom<usize>>::Error;

    fn try_from(thread_count: usize) -> std::result::Result<Self, Self::Error> {
        let count = NonZeroUsize::try_from(thread_count)?;
        Ok(ThreadCount::Count(count))
    }
}

/// Policy to pin worker threads to CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuPinningPolicy {
    /// Don't pin worker threads to CPUs.
    No,
    /// Pin each worker thread to a CPU, if CPU pinning is supported and
    /// implemented on this platform.
    IfSupported,
    /// Pin each worker thread to a CPU. If CPU pinning isn't supported on this
    /// platform (or not implemented), building a worker pool fails.
    Always,
}

/// A builder for [`WorkerPool`].
#[derive(Clone, Copy, Debug)]
pub struct WorkerPoolBuilder {
    /// Number of worker threads to spawn in the pool.
    pub num_threads: ThreadCount,
    /// Policy to pin worker threads to CPUs.
    pub cpu_pinning: CpuPinningPolicy,
    /// Maximum number of tasks waiting in the queue. Submitters block while the
    /// queue is full.
    pub queue_capacity: usize,
}

impl Default for WorkerPoolBuilder {
    fn default() -> Self {
        Self {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::No,
            queue_capacity: usize::MAX,
        }
    }
}

impl WorkerPoolBuilder {
    /// Spawns a worker pool.
    ///
    /// ```
    /// # use paramapper::{CpuPinningPolicy, ThreadCount, WorkerPoolBuilder};
    /// let pool = WorkerPoolBuilder {
    ///     num_threads: ThreadCount::AvailableParallelism,
    ///     cpu_pinning: CpuPinningPolicy::No,
    ///     queue_capacity: 64,
    /// }
    /// .build()
    /// .unwrap();
    ///
    /// let squares = pool
    ///     .submit_batch((1..=4).map(|x| move || x * x).collect())
    ///     .unwrap();
    /// assert_eq!(squares, [1, 4, 9, 16]);
    /// ```
    ///
    /// Fails with [`Error::InvalidQueueCapacity`] if `queue_capacity` is zero.
    pub fn build(&self) -> Result<WorkerPool> {
        WorkerPool::with_builder(self)
    }
}

/// A pool of worker threads, pulling tasks from a shared bounded queue.
///
/// Tasks are submitted by batches with
/// [`submit_batch()`](Self::submit_batch), which returns the results of the
/// batch in submission order. Tasks may borrow from the caller's stack, as a
/// batch never outlives the call that submitted it.
///
/// The pool is closed with [`close()`](Self::close) or when dropped.
pub struct WorkerPool {
    /// Queue of pending tasks.
    queue: BoundedTaskQueue,
    /// Lifecycle of the pool.
    state: Status<PoolState>,
    /// Cancelled when the pool closes, to stop the workers and unblock
    /// submitters waiting on a full queue.
    shutdown: CancellationToken,
    /// Handles to the worker threads, until they are joined.
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// Number of worker threads spawned in the pool.
    num_threads: NonZeroUsize,
    /// Number of tasks executed by each worker thread.
    executed: Arc<[CachePadded<AtomicU64>]>,
}

/// Lifecycle state of a [`WorkerPool`].
struct PoolState {
    /// Whether the pool was closed. Never reset once set.
    closed: bool,
    /// Number of batches currently enqueuing tasks.
    running: usize,
}

impl WorkerPool {
    /// Spawns a pool of `num_threads` worker threads, with an unbounded queue
    /// and no CPU pinning.
    ///
    /// Fails with [`Error::InvalidThreadCount`] if `num_threads` is zero.
    pub fn new(num_threads: usize) -> Result<Self> {
        WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(num_threads)
                .map_err(|_| Error::InvalidThreadCount)?,
            ..WorkerPoolBuilder::default()
        }
        .build()
    }

    fn with_builder(builder: &WorkerPoolBuilder) -> Result<Self> {
        if builder.queue_capacity == 0 {
            return Err(Error::InvalidQueueCapacity);
        }
        let num_threads: NonZeroUsize = match builder.num_threads {
            ThreadCount::AvailableParallelism => {
                std::thread::available_parallelism().map_err(Error::AvailableParallelism)?
            }
            ThreadCount::Count(count) => count,
        };

        #[cfg(any(
            miri,
            not(any(
                target_os = "android",
                target_os = "dragonfly",
                target_os = "freebsd",
                target_os = "linux"
            ))
        ))]
        match builder.cpu_pinning {
            CpuPinningPolicy::No => (),
            CpuPinningPolicy::IfSupported => {
                log_warn!("Pinning threads to CPUs is not implemented on this platform.")
            }
            CpuPinningPolicy::Always => {
                return Err(Error::CpuPinning {
                    id: 0,
                    reason: "pinning threads to CPUs is not implemented on this platform".into(),
                })
            }
        }

        let pool = Self {
            queue: BoundedTaskQueue::new(builder.queue_capacity),
            state: Status::new(PoolState {
                closed: false,
                running: 0,
            }),
            shutdown: CancellationToken::new(),
            workers: Mutex::new(Vec::with_capacity(num_threads.get())),
            num_threads,
            executed: (0..num_threads.get())
                .map(|_| CachePadded::new(AtomicU64::new(0)))
                .collect(),
        };

        let (report_sender, report_receiver) = mpsc::channel();
        for id in 0..num_threads.get() {
            let context = WorkerContext {
                id,
                queue: pool.queue.clone(),
                shutdown: pool.shutdown.clone(),
                executed: pool.executed.clone(),
            };
            let report_sender = report_sender.clone();
            let cpu_pinning = builder.cpu_pinning;
            // On error, dropping the pool joins the workers spawned so far.
            let handle = std::thread::Builder::new()
                .name(format!("paramapper-worker-{id}"))
                .spawn(move || {
                    let pinned = pin_current_thread(id, cpu_pinning);
                    let start = pinned.is_ok();
                    // The receiver outlives the build, unless building already
                    // failed.
                    let _ = report_sender.send((id, pinned));
                    drop(report_sender);
                    if start {
                        context.run();
                    }
                })
                .map_err(|source| Error::Spawn { id, source })?;
            pool.workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle);
        }
        drop(report_sender);
        log_debug!("[main thread] Spawned {num_threads} worker threads");

        for (id, pinned) in report_receiver {
            if let Err(reason) = pinned {
                return Err(Error::CpuPinning { id, reason });
            }
        }

        Ok(pool)
    }

    /// Returns the number of worker threads that have been spawned in this
    /// pool.
    pub fn num_threads(&self) -> NonZeroUsize {
        self.num_threads
    }

    /// Returns whether [`close()`](Self::close) was called on this pool.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of tasks executed so far by each worker thread.
    ///
    /// Tasks run by the thread calling [`close()`](Self::close) aren't counted.
    pub fn tasks_executed(&self) -> Vec<u64> {
        self.executed
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    /// Runs a batch of tasks on the pool, and returns their results in
    /// submission order.
    ///
    /// This blocks until every task of the batch completed. If one or more
    /// tasks panicked, the remaining tasks still run, and the first recorded
    /// panic is then resumed on the calling thread.
    ///
    /// Fails with [`Error::PoolClosed`] if the pool was closed.
    ///
    /// ```
    /// # use paramapper::WorkerPool;
    /// let pool = WorkerPool::new(2).unwrap();
    /// let words = ["hello", "parallel", "world"];
    /// let lengths = pool
    ///     .submit_batch(words.iter().map(|word| move || word.len()).collect())
    ///     .unwrap();
    /// assert_eq!(lengths, [5, 8, 5]);
    /// ```
    pub fn submit_batch<'env, F, R>(&self, tasks: Vec<F>) -> Result<Vec<R>>
    where
        F: FnOnce() -> R + Send + 'env,
        R: Send + 'env,
    {
        self.run_batch(tasks, None)
    }

    /// Same as [`submit_batch()`](Self::submit_batch), but stops waiting for
    /// the batch when the given token is cancelled.
    ///
    /// Upon cancellation, tasks of the batch that haven't started yet are
    /// skipped, tasks that are already running finish normally, and this
    /// returns [`Error::Cancelled`] once no task of the batch is running
    /// anymore.
    pub fn submit_batch_with_token<'env, F, R>(
        &self,
        tasks: Vec<F>,
        token: &CancellationToken,
    ) -> Result<Vec<R>>
    where
        F: FnOnce() -> R + Send + 'env,
        R: Send + 'env,
    {
        self.run_batch(tasks, Some(token))
    }

    fn run_batch<'env, F, R>(
        &self,
        tasks: Vec<F>,
        token: Option<&CancellationToken>,
    ) -> Result<Vec<R>>
    where
        F: FnOnce() -> R + Send + 'env,
        R: Send + 'env,
    {
        let running = self.register_batch()?;
        log_debug!("[main thread] Submitting a batch of {} tasks", tasks.len());

        let collector = ResultCollector::new(tasks.len());
        let wait_on_drop = WaitOnDrop(&collector);

        let tasks = tasks
            .into_iter()
            .enumerate()
            .map(|(index, func)| {
                let job: Box<dyn Job + Send + 'env> = Box::new(BatchTask {
                    func: Some(func),
                    index,
                    collector: Some(collector.clone()),
                });
                // SAFETY: Every task of the batch reports to the collector when it
                // is run or dropped, after releasing its captures. The
                // `wait_on_drop` guard blocks until all of them did so, including
                // when unwinding, therefore no task outlives the `'env` lifetime.
                unsafe { erase_lifetime(job) }
            })
            .collect::<Vec<Task>>();

        let mut tokens = vec![&self.shutdown];
        tokens.extend(token);
        let mut tasks = tasks.into_iter();
        for task in tasks.by_ref() {
            match self.queue.enqueue(task, &tokens) {
                Ok(()) => (),
                Err(task) if token.is_some_and(CancellationToken::is_cancelled) => {
                    log_debug!("[main thread] Batch cancelled while the queue was full");
                    collector.abandon();
                    drop(task);
                    break;
                }
                // Otherwise the pool is closing, and the submitter runs the task
                // itself.
                Err(task) => task.run(),
            }
        }
        // Dropping the tasks that weren't enqueued reports them as skipped.
        drop(tasks);
        drop(running);

        let result = match token {
            None => Ok(collector.await_all()),
            Some(token) => match collector.await_all_with_token(token) {
                Ok(values) => Ok(values),
                Err(Cancelled) => {
                    log_debug!("[main thread] Batch cancelled");
                    collector.abandon();
                    collector.await_completion();
                    Err(Error::Cancelled)
                }
            },
        };
        drop(wait_on_drop);
        result
    }

    /// Registers a new batch as running, unless the pool is closed.
    fn register_batch(&self) -> Result<RunningGuard<'_>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::PoolClosed);
        }
        state.running += 1;
        Ok(RunningGuard { state: &self.state })
    }

    /// Closes the pool.
    ///
    /// This stops and joins all the worker threads, waits until all the
    /// batches being submitted finished enqueuing their tasks, and runs the
    /// tasks that remain in the queue on the calling thread. Batches submitted
    /// before the pool was closed therefore complete normally.
    ///
    /// This is idempotent, and is called when the pool is dropped.
    pub fn close(&self) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let was_closed = std::mem::replace(&mut self.state.lock().closed, true);
        if !was_closed {
            log_debug!("[main thread] Closing the pool...");
        }
        self.shutdown.cancel();

        for (_i, handle) in workers.drain(..).enumerate() {
            match handle.join() {
                Ok(()) => log_debug!("[main thread] Worker #{_i} joined"),
                Err(_e) => log_error!("[main thread] Worker #{_i} panicked: {_e:?}"),
            }
        }
        drop(self.state.wait_while(|state| state.running > 0));

        let remaining = self.queue.drain();
        if !remaining.is_empty() {
            log_debug!(
                "[main thread] Running {} pending tasks on the closing thread",
                remaining.len()
            );
        }
        for task in remaining {
            task.run();
        }

        if !was_closed {
            log_debug!("[main thread] Closed the pool.");
            #[cfg(feature = "log_parallelism")]
            self.print_statistics();
        }
    }

    #[cfg(feature = "log_parallelism")]
    fn print_statistics(&self) {
        let executed = self.tasks_executed();
        log_info!("Worker pool statistics:");
        for (id, count) in executed.iter().enumerate() {
            log_info!("- worker #{id}: {count} tasks");
        }
        log_info!("- total: {} tasks", executed.iter().sum::<u64>());
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("num_threads", &self.num_threads)
            .field("queue_capacity", &self.queue.capacity())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerPool {
    /// Closes the pool, joining all the threads in the pool.
    fn drop(&mut self) {
        self.close();
    }
}

/// Marks a batch as running while it is being enqueued.
struct RunningGuard<'a> {
    state: &'a Status<PoolState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.update_and_notify_all(|state| state.running -= 1);
    }
}

/// A task of a batch, reporting its outcome to the batch's collector.
struct BatchTask<F, R> {
    /// Function to run, until it is consumed.
    func: Option<F>,
    /// Index of this task in the batch.
    index: usize,
    /// Collector of the batch, until the outcome is reported.
    collector: Option<ResultCollector<R>>,
}

impl<F, R> Job for BatchTask<F, R>
where
    F: FnOnce() -> R,
{
    fn run(mut self: Box<Self>) {
        let (Some(func), Some(collector)) = (self.func.take(), self.collector.take()) else {
            return;
        };
        if collector.is_abandoned() {
            drop(func);
            collector.skip(self.index);
            return;
        }
        match catch_unwind(AssertUnwindSafe(func)) {
            Ok(value) => collector.set(self.index, value),
            Err(payload) => {
                collector.set_exception(payload);
                collector.skip(self.index);
            }
        }
    }
}

impl<F, R> Drop for BatchTask<F, R> {
    /// Accounts for a task that was dropped without running.
    fn drop(&mut self) {
        drop(self.func.take());
        if let Some(collector) = self.collector.take() {
            collector.skip(self.index);
        }
    }
}

/// Context object owned by a worker thread.
struct WorkerContext {
    /// Thread index.
    id: usize,
    /// Queue of tasks shared with the other workers.
    queue: BoundedTaskQueue,
    /// Cancelled when the pool closes.
    shutdown: CancellationToken,
    /// Executed-task counters of all the workers.
    executed: Arc<[CachePadded<AtomicU64>]>,
}

impl WorkerContext {
    /// Main function run by this thread.
    fn run(&self) {
        log_debug!("[thread {}] Started", self.id);
        while let Ok(task) = self.queue.dequeue(&self.shutdown) {
            task.run();
            self.executed[self.id].fetch_add(1, Ordering::Relaxed);
        }
        log_debug!("[thread {}] Stopped", self.id);
    }
}

/// Pins the current thread to the CPU with the given index, according to the
/// policy. Failures are only reported with [`CpuPinningPolicy::Always`].
#[cfg(all(
    not(miri),
    any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    )
))]
fn pin_current_thread(id: usize, policy: CpuPinningPolicy) -> std::result::Result<(), String> {
    fn set_affinity(id: usize) -> nix::Result<()> {
        let mut cpu_set = CpuSet::new();
        cpu_set.set(id)?;
        sched_setaffinity(Pid::from_raw(0), &cpu_set)
    }

    match policy {
        CpuPinningPolicy::No => Ok(()),
        CpuPinningPolicy::IfSupported => {
            match set_affinity(id) {
                Ok(()) => log_debug!("Pinned thread #{id} to CPU #{id}"),
                Err(_e) => log_warn!("Failed to set CPU affinity for thread #{id}: {_e}"),
            }
            Ok(())
        }
        CpuPinningPolicy::Always => {
            set_affinity(id).map_err(|e| e.to_string())?;
            log_debug!("Pinned thread #{id} to CPU #{id}");
            Ok(())
        }
    }
}

#[cfg(any(
    miri,
    not(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "linux"
    ))
))]
fn pin_current_thread(_id: usize, _policy: CpuPinningPolicy) -> std::result::Result<(), String> {
    // Unsupported policies were already rejected when building the pool.
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    #[test]
    fn test_thread_count_try_from_usize() {
        assert!(ThreadCount::try_from(0).is_err());
        assert_eq!(
            ThreadCount::try_from(1),
            Ok(ThreadCount::Count(NonZeroUsize::try_from(1).unwrap()))
        );
    }

    #[test]
    fn test_new_zero_threads() {
        assert!(matches!(WorkerPool::new(0), Err(Error::InvalidThreadCount)));
    }

    #[test]
    fn test_num_threads() {
        let pool = WorkerPoolBuilder::default().build().unwrap();
        assert_eq!(
            pool.num_threads(),
            std::thread::available_parallelism().unwrap()
        );

        let pool = WorkerPool::new(4).unwrap();
        assert_eq!(pool.num_threads(), NonZeroUsize::try_from(4).unwrap());
        assert_eq!(pool.tasks_executed().len(), 4);
    }

    #[test]
    fn test_build_pool_cpu_pinning_if_supported() {
        let pool = WorkerPoolBuilder {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::IfSupported,
            queue_capacity: usize::MAX,
        }
        .build()
        .unwrap();

        let sum = pool
            .submit_batch((1..=10).map(|i| move || i).collect())
            .unwrap()
            .into_iter()
            .sum::<i32>();
        assert_eq!(sum, 5 * 11);
    }

    #[cfg(all(
        not(miri),
        any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        )
    ))]
    #[test]
    fn test_build_pool_cpu_pinning_always() {
        let pool = WorkerPoolBuilder {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::Always,
            queue_capacity: usize::MAX,
        }
        .build()
        .unwrap();

        let sum = pool
            .submit_batch((1..=10).map(|i| move || i).collect())
            .unwrap()
            .into_iter()
            .sum::<i32>();
        assert_eq!(sum, 5 * 11);
    }

    #[cfg(any(
        miri,
        not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "linux"
        ))
    ))]
    #[test]
    fn test_build_pool_cpu_pinning_always_not_supported() {
        let result = WorkerPoolBuilder {
            num_threads: ThreadCount::AvailableParallelism,
            cpu_pinning: CpuPinningPolicy::Always,
            queue_capacity: usize::MAX,
        }
        .build();
        assert!(matches!(result, Err(Error::CpuPinning { .. })));
    }

    #[test]
    fn test_build_pool_zero_capacity() {
        let result = WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(2).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            queue_capacity: 0,
        }
        .build();
        assert!(matches!(result, Err(Error::InvalidQueueCapacity)));
    }

    #[test]
    fn test_empty_batch() {
        let pool = WorkerPool::new(2).unwrap();
        let tasks: Vec<fn() -> u32> = Vec::new();
        assert_eq!(pool.submit_batch(tasks).unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn test_results_in_submission_order() {
        let pool = WorkerPool::new(4).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let delays = (0..32)
            .map(|_| rng.random_range(0..5))
            .collect::<Vec<u64>>();

        let results = pool
            .submit_batch(
                delays
                    .iter()
                    .enumerate()
                    .map(|(i, &delay)| {
                        move || {
                            std::thread::sleep(Duration::from_millis(delay));
                            i * i
                        }
                    })
                    .collect(),
            )
            .unwrap();
        assert_eq!(results, (0..32).map(|i| i * i).collect::<Vec<_>>());
    }

    #[test]
    fn test_tasks_borrow_local_data() {
        let pool = WorkerPool::new(3).unwrap();
        let input = (1..=100).collect::<Vec<u64>>();
        let sums = pool
            .submit_batch(
                input
                    .chunks(10)
                    .map(|chunk| move || chunk.iter().sum::<u64>())
                    .collect(),
            )
            .unwrap();
        assert_eq!(sums.len(), 10);
        assert_eq!(sums.iter().sum::<u64>(), 5050);
    }

    #[test]
    fn test_small_queue_capacity() {
        let pool = WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(2).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            queue_capacity: 1,
        }
        .build()
        .unwrap();

        let results = pool
            .submit_batch((0..100).map(|i| move || i + 1).collect())
            .unwrap();
        assert_eq!(results, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_submitters() {
        let pool = WorkerPool::new(3).unwrap();
        std::thread::scope(|s| {
            for offset in 0..4 {
                let pool = &pool;
                s.spawn(move || {
                    for _ in 0..10 {
                        let results = pool
                            .submit_batch((0..20).map(|i| move || offset * 100 + i).collect())
                            .unwrap();
                        assert_eq!(
                            results,
                            (0..20).map(|i| offset * 100 + i).collect::<Vec<_>>()
                        );
                    }
                });
            }
        });
    }

    #[test]
    #[should_panic(expected = "task 3 failed")]
    fn test_panic_propagates() {
        let pool = WorkerPool::new(4).unwrap();
        let _ = pool.submit_batch(
            (0..8)
                .map(|i| {
                    move || {
                        if i == 3 {
                            panic!("task 3 failed");
                        }
                        i
                    }
                })
                .collect(),
        );
    }

    #[test]
    fn test_panic_waits_for_siblings() {
        let pool = WorkerPool::new(4).unwrap();
        let completed = AtomicUsize::new(0);
        let result = catch_unwind(AssertUnwindSafe(|| {
            pool.submit_batch(
                (0..8)
                    .map(|i| {
                        let completed = &completed;
                        move || {
                            if i == 0 {
                                panic!("task 0 failed");
                            }
                            std::thread::sleep(Duration::from_millis(10));
                            completed.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .collect(),
            )
        }));

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"task 0 failed"));
        assert_eq!(completed.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_first_panic_wins() {
        // With a single worker, tasks run in submission order.
        let pool = WorkerPool::new(1).unwrap();
        let result = catch_unwind(AssertUnwindSafe(|| {
            pool.submit_batch(
                (0..6)
                    .map(|i| {
                        move || {
                            if i == 2 {
                                panic!("task 2 failed");
                            }
                            if i == 4 {
                                panic!("task 4 failed");
                            }
                        }
                    })
                    .collect(),
            )
        }));

        let payload = result.unwrap_err();
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"task 2 failed"));

        // The pool remains usable.
        assert_eq!(pool.submit_batch(vec![|| 1]).unwrap(), vec![1]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let pool = WorkerPool::new(2).unwrap();
        assert!(!pool.is_closed());
        pool.close();
        assert!(pool.is_closed());
        pool.close();
        assert!(pool.is_closed());
    }

    #[test]
    fn test_submit_to_closed_pool() {
        let pool = WorkerPool::new(2).unwrap();
        pool.close();
        let result = pool.submit_batch(vec![|| 1]);
        assert!(matches!(result, Err(Error::PoolClosed)));
    }

    #[test]
    fn test_close_completes_pending_batch() {
        let pool = WorkerPool::new(1).unwrap();
        std::thread::scope(|s| {
            let submitter = s.spawn(|| {
                pool.submit_batch(
                    (0..10)
                        .map(|i| {
                            move || {
                                std::thread::sleep(Duration::from_millis(10));
                                i
                            }
                        })
                        .collect(),
                )
            });
            std::thread::sleep(Duration::from_millis(25));
            pool.close();

            let results = submitter.join().unwrap().unwrap();
            assert_eq!(results, (0..10).collect::<Vec<_>>());
        });
        assert!(pool.is_closed());
    }

    #[test]
    fn test_close_unblocks_full_queue() {
        let pool = WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(1).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            queue_capacity: 1,
        }
        .build()
        .unwrap();

        std::thread::scope(|s| {
            let submitter = s.spawn(|| {
                pool.submit_batch(
                    (0..20)
                        .map(|i| {
                            move || {
                                std::thread::sleep(Duration::from_millis(5));
                                i
                            }
                        })
                        .collect(),
                )
            });
            std::thread::sleep(Duration::from_millis(12));
            pool.close();

            let results = submitter.join().unwrap().unwrap();
            assert_eq!(results, (0..20).collect::<Vec<_>>());
        });
    }

    #[test]
    fn test_cancelled_batch() {
        let pool = WorkerPool::new(1).unwrap();
        let token = CancellationToken::new();
        let started = AtomicUsize::new(0);

        std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(30));
                token.cancel();
            });
            let result = pool.submit_batch_with_token(
                (0..20)
                    .map(|_| {
                        let started = &started;
                        move || {
                            started.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    })
                    .collect(),
                &token,
            );
            assert!(matches!(result, Err(Error::Cancelled)));
        });

        // No task of the batch runs after the call returned.
        let count = started.load(Ordering::SeqCst);
        assert!(count < 20);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(started.load(Ordering::SeqCst), count);

        // The pool remains usable.
        let results = pool.submit_batch((0..4).map(|i| move || i).collect()).unwrap();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cancel_while_queue_full() {
        let pool = WorkerPoolBuilder {
            num_threads: ThreadCount::try_from(1).unwrap(),
            cpu_pinning: CpuPinningPolicy::No,
            queue_capacity: 1,
        }
        .build()
        .unwrap();
        let token = CancellationToken::new();
        let started = AtomicUsize::new(0);

        let elapsed = std::thread::scope(|s| {
            s.spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                token.cancel();
            });
            let start = Instant::now();
            let result = pool.submit_batch_with_token(
                (0..8)
                    .map(|_| {
                        let started = &started;
                        move || {
                            started.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(200));
                        }
                    })
                    .collect(),
                &token,
            );
            assert!(matches!(result, Err(Error::Cancelled)));
            start.elapsed()
        });

        // Only the task running when the token was cancelled completed.
        assert!(elapsed < Duration::from_millis(500), "{elapsed:?}");
        assert_eq!(started.load(Ordering::SeqCst), 1);

        // The pool remains usable.
        let results = pool.submit_batch((0..4).map(|i| move || i).collect()).unwrap();
        assert_eq!(results, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tasks_executed() {
        let pool = WorkerPool::new(2).unwrap();
        for _ in 0..5 {
            pool.submit_batch((0..10).map(|i| move || i).collect())
                .unwrap();
        }
        pool.close();
        assert_eq!(pool.tasks_executed().iter().sum::<u64>(), 50);
    }
}
