// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transactional queues built on top of [`TVar`](crate::TVar).

mod tchan;
mod tqueue;

pub use tchan::TChan;
pub use tqueue::TQueue;

use crate::Stm;

/// Transactional queue-like structure.
///
/// A common interface between the various implementations in Simon Marlow's
/// book. All operations compose into larger transactions like any other
/// [`Stm`] value.
pub trait TQueueLike<T>: Clone + Send {
    /// Push to the end of the queue.
    fn push(&self, value: T) -> Stm<()>;

    /// Pop the head of the queue, retrying while it is empty.
    fn pop(&self) -> Stm<T>;

    /// Check if the queue is empty.
    fn is_empty(&self) -> Stm<bool>;
}

#[cfg(test)]
mod test {
    use std::thread;
    use std::time::Duration;

    use super::TQueueLike;
    use crate::test;
    use crate::Runtime;

    pub fn test_push_and_pop_back<Q: 'static + TQueueLike<i32> + Sync>(make: fn(&Runtime) -> Q) {
        let rt = Runtime::new();
        let queue = make(&rt);

        let stm = queue.push(42).and(&queue.push(31)).and(&queue.pop().and_then({
            let queue = queue.clone();
            move |x| queue.pop().map(move |y| (x, y))
        }));
        let (x, y) = rt.atomically(&stm).unwrap();

        assert_eq!(42, x);
        assert_eq!(31, y);
    }

    /// Run multiple threads.
    ///
    /// Thread 1: pop from the queue, blocking until it is non-empty.
    ///
    /// Thread 2: wait a bit, then push a value.
    ///
    /// Check that thread 1 is woken up to read the value written by
    /// thread 2.
    pub fn test_threaded<Q: 'static + TQueueLike<i32>>(make: fn(&Runtime) -> Q) {
        let rt = Runtime::new();
        let queue1 = make(&rt);
        // Clone for thread 2.
        let queue2 = queue1.clone();

        let x = test::run_async(
            500,
            {
                let rt = rt.clone();
                move || rt.atomically(&queue2.pop()).unwrap()
            },
            {
                let rt = rt.clone();
                move || {
                    thread::sleep(Duration::from_millis(100));
                    rt.atomically(&queue1.push(42)).unwrap();
                }
            },
        )
        .unwrap();

        assert_eq!(42, x);
    }

    pub fn test_is_empty<Q: 'static + TQueueLike<i32>>(make: fn(&Runtime) -> Q) {
        let rt = Runtime::new();
        let queue = make(&rt);

        let is_empty = rt.atomically(&queue.is_empty()).unwrap();

        assert!(is_empty);
    }

    pub fn test_non_empty<Q: 'static + TQueueLike<i32>>(make: fn(&Runtime) -> Q) {
        let rt = Runtime::new();
        let queue = make(&rt);

        rt.atomically(&queue.push(42)).unwrap();
        let is_empty = rt.atomically(&queue.is_empty()).unwrap();

        assert!(!is_empty);
    }
}

/// Reuse the same test definitions for each implementation of the
/// [`TQueueLike`] trait by calling this macro with a function creating a
/// new instance of the queue.
///
/// For example:
/// ```text
/// test_queue_mod!(|rt| crate::queues::tchan::TChan::<i32>::new(rt));
/// ```
macro_rules! test_queue_mod {
    ($make:expr) => {
    };
}

pub(crate) use test_queue_mod;
