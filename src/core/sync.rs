// Copyright 2024-2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Synchronization primitives

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Something that threads may be blocked on, and that must be woken up when a
/// [`CancellationToken`] they observe is cancelled.
pub trait Wakeable: Send + Sync {
    /// Wakes up all the threads waiting on this object, so that they re-check
    /// their cancellation token.
    fn wake(&self);
}

/// A cooperative cancellation signal.
///
/// Cloning a token yields a handle to the same signal. Once
/// [`cancel()`](Self::cancel) has been called on any handle, all blocking
/// operations of this crate that observe the token return promptly with a
/// cancellation error. Nothing is ever interrupted forcefully: a task that is
/// already running finishes normally.
///
/// ```rust
/// # use paramapper::{CancellationToken, Error, MapReduce};
/// let token = CancellationToken::new();
/// let mapper = MapReduce::new().with_token(token.clone());
///
/// token.cancel();
/// let result = mapper.work(4, &[1, 2, 3, 4], |block| block.len(), |lens| lens.len());
/// assert!(matches!(result, Err(Error::Cancelled)));
/// ```
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    /// Whether the token was cancelled. Never reset once set.
    cancelled: AtomicBool,
    /// Objects that threads observing this token are currently waiting on.
    listeners: Mutex<Listeners>,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    wakeables: Vec<(u64, Arc<dyn Wakeable>)>,
}

impl CancellationToken {
    /// Creates a new token, which isn't cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation of every operation observing this token.
    ///
    /// This is idempotent.
    pub fn cancel(&self) {
        if self.inner.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wake up outside of the listeners lock, as waking up takes the lock of
        // each listener.
        let wakeables = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wakeables
            .iter()
            .map(|(_, wakeable)| wakeable.clone())
            .collect::<Vec<_>>();
        for wakeable in wakeables {
            wakeable.wake();
        }
    }

    /// Returns whether [`cancel()`](Self::cancel) was called on this token.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Registers the given object to be woken up upon cancellation, for as long
    /// as the returned [`Listener`] is alive.
    pub(crate) fn listen(&self, wakeable: Arc<dyn Wakeable>) -> Listener<'_> {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.wakeables.push((id, wakeable));
        Listener {
            token: &self.inner,
            id,
        }
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Registration of a [`Wakeable`] on a [`CancellationToken`], removed when
/// dropped.
pub(crate) struct Listener<'a> {
    token: &'a TokenInner,
    id: u64,
}

impl Drop for Listener<'_> {
    fn drop(&mut self) {
        self.token
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .wakeables
            .retain(|(id, _)| *id != self.id);
    }
}
