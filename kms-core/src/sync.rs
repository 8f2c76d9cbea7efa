/*
 * Copyright (C) 2021-2024 The KMS Core Developers.
 *
 * This file is part of KMS Core.
 *
 * KMS Core is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * KMS Core is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with KMS Core. If not, see <https://www.gnu.org/licenses/>.
 */

//! A small wait/wake primitive standing in for the kernel-side `WaitQueue`/`BlockQueue` this
//! codebase builds against a scheduler: here there is no scheduler to suspend a task on, so
//! waiting is just a condition variable parked on the calling thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A single condition, signaled by `notify`/`notify_all` and observed by `wait`/`wait_timeout`.
/// Unlike a bare `Condvar` it remembers whether anyone is cancelling a wait, so a `Bell` used as
/// a cancellation token composes with the event bell it's guarding.
pub struct Bell {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl Bell {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()), condvar: Condvar::new() }
    }

    /// Blocks the calling thread until `cond` returns `true`, re-checking it every time the
    /// bell is notified. Never spuriously returns with `cond` still false.
    pub fn wait_while<F>(&self, mut cond: F)
    where
        F: FnMut() -> bool,
    {
        let guard = self.lock.lock().unwrap();
        let _unused = self.condvar.wait_while(guard, |_| cond()).unwrap();
    }

    /// Like [`Bell::wait_while`], but gives up once `timeout` elapses, returning `false` in that
    /// case. Used by cancellable waits where the cancellation token has its own deadline.
    pub fn wait_while_timeout<F>(&self, mut cond: F, timeout: Duration) -> bool
    where
        F: FnMut() -> bool,
    {
        let guard = self.lock.lock().unwrap();
        let (_unused, result) = self.condvar.wait_timeout_while(guard, timeout, |_| cond()).unwrap();
        !result.timed_out()
    }

    pub fn notify_one(&self) {
        let _guard = self.lock.lock().unwrap();
        self.condvar.notify_one();
    }

    pub fn notify_all(&self) {
        let _guard = self.lock.lock().unwrap();
        self.condvar.notify_all();
    }
}

impl Default for Bell {
    fn default() -> Self {
        Self::new()
    }
}

/// A flag a waiter can poll to cancel a [`Bell::wait_while`] from another thread, matching the
/// "cancellation token" shape `pollWait` accepts.
///
/// A thread parked in `wait_while` only re-checks its condition when the bell it's waiting on
/// is notified, so `cancel()` alone would leave a parked waiter asleep until something else
/// happens to notify it. `bind` records which bell a wait is parked against, so `cancel()` can
/// notify that bell itself.
#[derive(Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    bell: Mutex<Option<Arc<Bell>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self { cancelled: AtomicBool::new(false), bell: Mutex::new(None) }
    }

    /// Records the bell a waiter is about to park on. Call this immediately before the
    /// matching `wait_while`/`wait_while_timeout`, so a concurrent `cancel()` is guaranteed to
    /// find it.
    pub fn bind(&self, bell: Arc<Bell>) {
        *self.bell.lock().unwrap() = Some(bell);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(bell) = self.bell.lock().unwrap().as_ref() {
            bell.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn notify_wakes_a_waiting_thread() {
        let bell = Arc::new(Bell::new());
        let ready = Arc::new(AtomicBool::new(false));

        let bell2 = bell.clone();
        let ready2 = ready.clone();
        let handle = thread::spawn(move || {
            bell2.wait_while(|| !ready2.load(Ordering::Acquire));
        });

        ready.store(true, Ordering::Release);
        bell.notify_all();
        handle.join().unwrap();
    }

    #[test]
    fn cancel_token_observed_by_waiter() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancelling_a_bound_token_wakes_the_parked_waiter() {
        let bell = Arc::new(Bell::new());
        let token = Arc::new(CancelToken::new());
        token.bind(bell.clone());

        let bell2 = bell.clone();
        let token2 = token.clone();
        let handle = thread::spawn(move || {
            bell2.wait_while(|| !token2.is_cancelled());
        });

        // Give the spawned thread a real chance to actually park in wait_while before
        // cancelling, so this exercises the wake path rather than a pre-cancel fast path.
        thread::sleep(std::time::Duration::from_millis(50));
        token.cancel();

        handle.join().unwrap();
    }
}
