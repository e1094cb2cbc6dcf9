// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use crate::core::Cancelled;
use std::io;
use thiserror::Error;

/// Error type for worker pool and map-reduce operations.
///
/// Panics raised by user functions are not reported through this type: they
/// are propagated to the calling thread as panics.
#[derive(Error, Debug)]
pub enum Error {
    /// A non-positive number of threads was requested.
    #[error("a positive number of threads was expected")]
    InvalidThreadCount,

    /// A worker pool was configured with a zero queue capacity.
    #[error("a positive queue capacity was expected")]
    InvalidQueueCapacity,

    /// The operation isn't defined on an empty input.
    #[error("expected a non-empty input")]
    EmptyInput,

    /// Tasks were submitted to a worker pool that is closed.
    #[error("the worker pool is closed")]
    PoolClosed,

    /// The operation observed a cancelled token.
    #[error("the operation was cancelled")]
    Cancelled,

    /// Querying the available parallelism failed.
    #[error("failed to query the available parallelism: {0}")]
    AvailableParallelism(#[source] io::Error),

    /// Spawning a worker thread failed.
    #[error("failed to spawn worker thread #{id}: {source}")]
    Spawn {
        /// Index of the worker thread.
        id: usize,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Pinning a worker thread to a CPU failed.
    #[error("failed to pin worker thread #{id} to a CPU: {reason}")]
    CpuPinning {
        /// Index of the worker thread.
        id: usize,
        /// Description of the failure.
        reason: String,
    },
}

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Error::Cancelled
    }
}

/// Result type alias for worker pool and map-reduce operations.
pub type Result<T> = std::result::Result<T, Error>;
