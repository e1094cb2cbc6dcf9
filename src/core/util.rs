// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use super::queue::{Job, Task};
use super::sync::{CancellationToken, Wakeable};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

/// An ergonomic wrapper around a [`Mutex`]-[`Condvar`] pair.
///
/// Poisoning is ignored: every critical section guarded by a [`Status`] in
/// this crate leaves the value consistent before running any user code.
pub struct Status<T> {
    mutex: Mutex<T>,
    condvar: Condvar,
}

impl<T> Status<T> {
    /// Creates a new status initialized with the given value.
    pub fn new(t: T) -> Self {
        Self {
            mutex: Mutex::new(t),
            condvar: Condvar::new(),
        }
    }

    /// Locks the status.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Notifies all waiting threads. The caller is expected to hold the lock
    /// (or to have just released it) after modifying the status.
    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Applies the given function to the status and notifies all waiting
    /// threads.
    pub fn update_and_notify_all(&self, f: impl FnOnce(&mut T)) {
        f(&mut *self.lock());
        self.condvar.notify_all();
    }

    /// Waits until the predicate is false on this status.
    ///
    /// This returns a [`MutexGuard`], allowing to further inspect or modify the
    /// status.
    pub fn wait_while(&self, predicate: impl FnMut(&mut T) -> bool) -> MutexGuard<'_, T> {
        self.condvar
            .wait_while(self.lock(), predicate)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until the predicate is false on this status, or until the given
    /// token is cancelled.
    pub fn wait_while_or_cancelled(
        self: &Arc<Self>,
        token: &CancellationToken,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'_, T>
    where
        T: Send + 'static,
    {
        let _listener = token.listen(self.clone());
        self.wait_while(|t| !token.is_cancelled() && predicate(t))
    }
}

impl<T: Send> Wakeable for Status<T> {
    fn wake(&self) {
        // Taking the lock orders this notification after any concurrent check of
        // the cancellation flag by a waiter.
        drop(self.lock());
        self.condvar.notify_all();
    }
}

/// Erases the lifetime of a boxed job, so that it can be sent to the worker
/// threads of a pool.
///
/// # Safety
///
/// The caller must guarantee that the returned task is either run or dropped
/// before the end of the `'env` lifetime.
pub unsafe fn erase_lifetime<'env>(job: Box<dyn Job + Send + 'env>) -> Task {
    // SAFETY: Both types are fat pointers to the same vtable and only differ by
    // their lifetime bound. The caller guarantees that the job doesn't outlive
    // `'env`.
    unsafe { std::mem::transmute::<Box<dyn Job + Send + 'env>, Task>(job) }
}
