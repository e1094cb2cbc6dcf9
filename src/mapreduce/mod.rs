// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Split/map/reduce orchestration over slices.

mod ops;

use crate::core::{split, CancellationToken, Cancelled, ResultCollector, WorkerPool};
use crate::error::{Error, Result};
use crate::macros::log_debug;
use std::panic::{catch_unwind, AssertUnwindSafe};

pub use ops::Monoid;

/// Splits slices into contiguous blocks, processes each block in parallel and
/// combines the per-block results in block order.
///
/// Blocks are processed either by a [`WorkerPool`] (see
/// [`with_pool()`](Self::with_pool)), or by threads spawned for each call (see
/// [`new()`](Self::new)).
///
/// ```rust
/// # use paramapper::{MapReduce, WorkerPool};
/// let values = [5, 3, 8, 1, 9, 2];
///
/// // With threads spawned for the call.
/// let max = MapReduce::new()
///     .work(
///         3,
///         &values,
///         |block| *block.iter().max().unwrap(),
///         |maxima| maxima.into_iter().max().unwrap(),
///     )
///     .unwrap();
/// assert_eq!(max, 9);
///
/// // With a worker pool.
/// let pool = WorkerPool::new(2).unwrap();
/// let sum = MapReduce::with_pool(&pool)
///     .work(
///         4,
///         &values,
///         |block| block.iter().sum::<i32>(),
///         |sums| sums.into_iter().sum::<i32>(),
///     )
///     .unwrap();
/// assert_eq!(sum, 28);
/// ```
#[derive(Debug)]
pub struct MapReduce<'pool> {
    /// Where blocks are processed.
    dispatcher: Dispatcher<'pool>,
    /// Cancels the calls to [`work()`](Self::work).
    token: CancellationToken,
}

/// Strategy to process the blocks of a [`MapReduce`] call.
#[derive(Debug)]
enum Dispatcher<'pool> {
    /// Submit one task per block to a worker pool.
    Pool(&'pool WorkerPool),
    /// Spawn one scoped thread per block.
    Threads,
}

impl MapReduce<'static> {
    /// Creates an orchestrator that spawns one thread per block on each call.
    pub fn new() -> Self {
        Self {
            dispatcher: Dispatcher::Threads,
            token: CancellationToken::new(),
        }
    }
}

impl Default for MapReduce<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'pool> MapReduce<'pool> {
    /// Creates an orchestrator that processes blocks on the given pool.
    pub fn with_pool(pool: &'pool WorkerPool) -> Self {
        Self {
            dispatcher: Dispatcher::Pool(pool),
            token: CancellationToken::new(),
        }
    }

    /// Sets the token that cancels the calls of this orchestrator.
    pub fn with_token(self, token: CancellationToken) -> Self {
        Self { token, ..self }
    }

    /// Returns the token that cancels the calls of this orchestrator.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Splits `values` into at most `threads` contiguous blocks (see
    /// [`Partition`](crate::Partition)), applies `per_block` to each block in
    /// parallel and passes the per-block results, in block order, to
    /// `combine`.
    ///
    /// Fails with:
    /// - [`Error::InvalidThreadCount`] if `threads` is zero,
    /// - [`Error::PoolClosed`] if the worker pool was closed,
    /// - [`Error::Cancelled`] if the token of this orchestrator was cancelled
    ///   before the results of all blocks were available. In that case, blocks
    ///   that didn't start yet are skipped, and this returns only once no
    ///   block is being processed anymore.
    ///
    /// A panic in `per_block` is resumed on the calling thread once all the
    /// blocks were processed. If several blocks panicked, only one panic is
    /// resumed.
    pub fn work<'a, T, M, R>(
        &self,
        threads: usize,
        values: &'a [T],
        per_block: impl Fn(&'a [T]) -> M + Sync,
        combine: impl FnOnce(Vec<M>) -> R,
    ) -> Result<R>
    where
        T: Sync,
        M: Send,
    {
        let blocks = split(threads, values)?;
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        log_debug!(
            "[main thread] Processing {} items in {} blocks",
            values.len(),
            blocks.len()
        );

        let per_block = &per_block;
        let partials = match self.dispatcher {
            Dispatcher::Pool(pool) => pool.submit_batch_with_token(
                blocks
                    .into_iter()
                    .map(|block| move || per_block(block))
                    .collect(),
                &self.token,
            )?,
            Dispatcher::Threads => self.map_on_threads(blocks, per_block)?,
        };
        Ok(combine(partials))
    }

    /// Processes each block on a dedicated scoped thread.
    fn map_on_threads<'a, T, M>(
        &self,
        blocks: Vec<&'a [T]>,
        per_block: &(impl Fn(&'a [T]) -> M + Sync),
    ) -> Result<Vec<M>>
    where
        T: Sync,
        M: Send,
    {
        let collector = ResultCollector::new(blocks.len());
        // Cancelled to skip the blocks that didn't start yet.
        let stop = CancellationToken::new();

        std::thread::scope(|s| {
            for (index, block) in blocks.into_iter().enumerate() {
                let collector = collector.clone();
                let stop = &stop;
                let spawned = std::thread::Builder::new()
                    .name(format!("paramapper-block-{index}"))
                    .spawn_scoped(s, move || {
                        if stop.is_cancelled() {
                            collector.skip(index);
                            return;
                        }
                        match catch_unwind(AssertUnwindSafe(|| per_block(block))) {
                            Ok(value) => collector.set(index, value),
                            Err(payload) => {
                                collector.set_exception(payload);
                                collector.skip(index);
                            }
                        }
                    });
                if let Err(source) = spawned {
                    // The threads spawned so far are joined at the end of the scope.
                    stop.cancel();
                    return Err(Error::Spawn { id: index, source });
                }
            }

            match collector.await_all_with_token(&self.token) {
                Ok(values) => Ok(values),
                Err(Cancelled) => {
                    log_debug!("[main thread] Cancelled, joining the block threads...");
                    stop.cancel();
                    Err(Error::Cancelled)
                }
            }
        })
    }
}
