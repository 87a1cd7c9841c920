// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(test)]
use crate::test::{terminates, terminates_async};

/// A control block for one parked attempt.
///
/// An attempt that hit a retry blocks on all the cells it read; the cells
/// use this block to signal the attempt once one of them is published.
///
/// Be careful when using this directly, it is easy to create deadlocks.
pub(crate) struct ControlBlock {
    /// True while the block is still waiting for a change.
    ///
    /// Kept outside the mutex so a commit releasing many cells does not
    /// serialize on threads that are just about to wake.
    blocked: AtomicBool,

    /// Lock backing the condition variable.
    lock: Mutex<()>,

    /// Condition variable used for pausing and waking the thread.
    wait_cvar: Condvar,
}

impl ControlBlock {
    pub(crate) fn new() -> ControlBlock {
        ControlBlock {
            blocked: AtomicBool::new(true),
            lock: Mutex::new(()),
            wait_cvar: Condvar::new(),
        }
    }

    /// Inform the block that a cell it waits on has changed.
    ///
    /// Idempotent; racing callers are fine, the first one wins. The store
    /// and the notify happen under the lock so a concurrent [`wait`] cannot
    /// check the flag and then miss the notification.
    ///
    /// [`wait`]: ControlBlock::wait
    pub(crate) fn set_changed(&self) {
        let _guard = self.lock.lock();
        self.blocked.store(false, Ordering::SeqCst);
        self.wait_cvar.notify_one();
    }

    /// Block until a cell has changed.
    ///
    /// Returns immediately if [`set_changed`] already fired.
    ///
    /// [`set_changed`]: ControlBlock::set_changed
    pub(crate) fn wait(&self) {
        let mut guard = self.lock.lock();
        while self.blocked.load(Ordering::SeqCst) {
            self.wait_cvar.wait(&mut guard);
        }
    }
}

// TESTS

/// Test if ControlBlock correctly blocks on `wait`.
#[test]
fn test_blocked() {
    let ctrl = ControlBlock::new();
    assert!(!terminates(100, move || ctrl.wait()));
}

/// A ControlBlock returns immediately when it was set to changed before
/// waiting.
///
/// This can occur when a variable changes while the attempt is still
/// registering on other variables.
#[test]
fn test_wait_after_change() {
    let ctrl = ControlBlock::new();
    ctrl.set_changed();
    assert!(terminates(50, move || ctrl.wait()));
}

/// Test calling `set_changed` multiple times.
#[test]
fn test_wait_after_multiple_changes() {
    let ctrl = ControlBlock::new();
    ctrl.set_changed();
    ctrl.set_changed();
    ctrl.set_changed();

    assert!(terminates(50, move || ctrl.wait()));
}

/// Perform a wakeup from another thread.
#[test]
fn test_wait_threaded_wakeup() {
    use std::sync::Arc;

    let ctrl = Arc::new(ControlBlock::new());
    let ctrl2 = ctrl.clone();
    let terminated = terminates_async(500, move || ctrl.wait(), move || ctrl2.set_changed());

    assert!(terminated);
}
