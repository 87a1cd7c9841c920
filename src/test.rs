// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Helpers for tests that exercise blocking behavior.
//!
//! A helper thread runs the operation under test and reports back over a
//! channel; the caller decides how long it is willing to wait for the
//! report. Tests use this to pin down both directions: an operation that
//! must finish once woken, and one that must still be blocked when the
//! deadline passes.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Check if `f` terminates within the given timeframe.
pub fn terminates<F>(duration_ms: u64, f: F) -> bool
where
    F: Send + FnOnce() + 'static,
{
    terminates_async(duration_ms, f, || {})
}

/// Check if `f` terminates within the given timeframe, while `g` runs
/// concurrently on the current thread.
pub fn terminates_async<F, G>(duration_ms: u64, f: F, g: G) -> bool
where
    F: Send + FnOnce() + 'static,
    G: FnOnce(),
{
    run_async(duration_ms, f, g).is_some()
}

/// Run `f` in a helper thread and `g` on the current one, then wait up to
/// `duration_ms` for `f`'s result.
///
/// `None` means `f` did not finish in time. Its thread is not killed, it
/// stays alive for the rest of the test run, so don't stack many failing
/// calls in one process.
pub fn run_async<T, F, G>(duration_ms: u64, f: F, g: G) -> Option<T>
where
    F: Send + FnOnce() -> T + 'static,
    G: FnOnce(),
    T: Send + 'static,
{
    let (done, result) = mpsc::channel();

    thread::spawn(move || {
        let _ = done.send(f());
    });

    g();

    result.recv_timeout(Duration::from_millis(duration_ms)).ok()
}
