// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! This library implements
//! [software transactional memory](https://en.wikipedia.org/wiki/Software_transactional_memory),
//! often abbreviated with STM.
//!
//! With locks, the sequential composition of two threadsafe actions is no
//! longer threadsafe, because other threads may interfere in between.
//! Protecting both with a third lock brings back the usual suspects,
//! deadlocks and race conditions. Software transactional memory composes:
//! reads and writes of [`TVar`]s are recorded in a per-attempt log, and when
//! the transaction finishes and every value it read is still current, the
//! writes are committed as a single atomic operation. Otherwise the
//! computation reruns. That may lead to starvation under heavy contention,
//! but avoids the common sources of bugs.
//!
//! Transactions here are plain values. An [`Stm<T>`] describes work over
//! cells without doing any of it; [`Runtime::atomically`] runs the
//! description, and the same value can be stored and run as often as you
//! like, concurrently if you want, each run being an independent attempt.
//!
//! ```
//! use txcell::Runtime;
//!
//! let rt = Runtime::new();
//! let var = rt.new_tvar(0);
//!
//! let x = rt.atomically(&var.set(21).and(&var.modify(|x| x * 2)).and(&var.get())).unwrap();
//!
//! assert_eq!(x, 42);
//! ```
//!
//! Blocking is expressed inside the transaction: [`Stm::retry`] (usually via
//! [`guard`]) parks the calling thread until another commit changes one of
//! the cells the attempt read, and [`Stm::or`] tries an alternative branch
//! when the first one retries.
//!
//! # Transaction safety
//!
//! Everything here is safe in the Rust sense; these rules are about keeping
//! the transactional semantics intact:
//!
//! * Don't run code with side effects inside `and_then`, `map` or `modify`
//!   closures, especially no IO. Attempts rerun on conflict and on wakeup,
//!   and reruns repeat whatever the closure does. Return a closure from the
//!   transaction if you have to.
//! * Don't use locks or other blocking mechanisms inside a transaction.
//!   They interact badly with parking and can deadlock.
//! * Don't use inner mutability to change the content of a [`TVar`].
//!
//! A panic inside a transaction is contained: the attempt is discarded
//! without committing anything and the panic surfaces as
//! [`TxError::Failed`]. A deliberate [`Stm::abort`] surfaces as
//! [`TxError::Aborted`] with the error the transaction supplied. The two
//! stay distinguishable.
//!
//! # Speed
//!
//! Keep your atomic blocks small. The more cells a transaction touches and
//! the longer it runs, the more likely it collides with other threads.
//! Reading a `TVar` looks the value up in the attempt's log every time, so
//! keep the number of accessed cells as low as the logic allows.

mod ids;
pub mod queues;
mod result;
mod runtime;
mod stm;
mod transaction;
mod tvar;

#[cfg(test)]
mod test;

pub use ids::{TxnId, VarId};
pub use result::{DynError, TxError, TxResult};
pub use runtime::{CancelToken, Runtime};
pub use stm::Stm;
pub use tvar::TVar;

use std::any::Any;

/// Retry unless `cond` holds.
///
/// The transactional guard: downstream code runs only once the condition is
/// true, and the attempt sleeps until the cells it read make it so.
///
/// # Example
///
/// ```
/// # use txcell::{guard, Runtime};
/// let rt = Runtime::new();
/// let var = rt.new_tvar(42);
///
/// let v = rt.atomically(
///     &var.get().and_then(|x| guard(x == 42).map(move |_| x))
/// ).unwrap();
///
/// assert_eq!(v, 42);
/// ```
pub fn guard(cond: bool) -> Stm<()> {
    if cond {
        Stm::pure(())
    } else {
        Stm::retry()
    }
}

/// Yield the inner value of an `Option`, or retry if there is none.
///
/// `unwrap_or_retry` is the inverse of [`optionally`].
///
/// # Example
///
/// ```
/// # use txcell::{unwrap_or_retry, Runtime};
/// let rt = Runtime::new();
///
/// let x = rt.atomically(&unwrap_or_retry(Some(42))).unwrap();
///
/// assert_eq!(x, 42);
/// ```
pub fn unwrap_or_retry<T>(option: Option<T>) -> Stm<T>
where
    T: Any + Send + Sync + Clone,
{
    match option {
        Some(x) => Stm::pure(x),
        None => Stm::retry(),
    }
}

/// Run `stm`, but recover a retry as `None` instead of blocking.
///
/// Note that `optionally` does not shield the transaction from conflicts;
/// only the retry signal is converted.
///
/// `optionally` is the inverse of [`unwrap_or_retry`].
///
/// # Example
///
/// ```
/// # use txcell::{optionally, Runtime, Stm};
/// let rt = Runtime::new();
///
/// let x: Option<i32> = rt.atomically(&optionally(&Stm::retry())).unwrap();
///
/// assert_eq!(x, None);
/// ```
pub fn optionally<T>(stm: &Stm<T>) -> Stm<Option<T>>
where
    T: Any + Send + Sync + Clone,
{
    stm.map(Some).or(&Stm::pure(None))
}

#[cfg(test)]
mod test_lib {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn infinite_retry_blocks() {
        let terminated = test::terminates(300, || {
            let rt = Runtime::new();
            let _infinite: TxResult<i32> = rt.atomically(&Stm::retry());
        });
        assert!(!terminated);
    }

    #[test]
    fn write_then_read() {
        let rt = Runtime::new();
        let var = rt.new_tvar(0);

        let x = rt.atomically(&var.set(42).and(&var.get())).unwrap();

        assert_eq!(42, x);
    }

    /// Run multiple threads.
    ///
    /// Thread 1: read a cell, block until it is not 0, then return it.
    ///
    /// Thread 2: wait a bit, then write a value.
    ///
    /// Check that thread 1 is woken up correctly.
    #[test]
    fn threaded_wakeup() {
        let rt = Runtime::new();
        let var = rt.new_tvar(0);

        let stm = var.get().and_then(|x| guard(x != 0).map(move |_| x));

        let x = test::run_async(
            800,
            {
                let rt = rt.clone();
                move || rt.atomically(&stm).unwrap()
            },
            {
                let rt = rt.clone();
                let var = var.clone();
                move || {
                    thread::sleep(Duration::from_millis(100));
                    rt.atomically(&var.set(42)).unwrap();
                }
            },
        )
        .unwrap();

        assert_eq!(42, x);
    }

    /// A slow transaction is rerun when a cell changes under it while it is
    /// still evaluating.
    #[test]
    fn read_write_interfere() {
        let rt = Runtime::new();
        let var = rt.new_tvar(0);

        let handle = {
            let rt = rt.clone();
            let var = var.clone();
            thread::spawn(move || {
                let slow = var.get().and_then({
                    let var = var.clone();
                    move |x| {
                        thread::sleep(Duration::from_millis(500));
                        var.set(x + 10)
                    }
                });
                rt.atomically(&slow).unwrap();
            })
        };

        // Give the thread time to read the cell.
        thread::sleep(Duration::from_millis(100));

        rt.atomically(&var.set(32)).unwrap();

        let _ = handle.join();
        assert_eq!(42, var.read_atomic());
    }

    #[test]
    fn or_takes_the_second_branch() {
        let rt = Runtime::new();
        let var = rt.new_tvar(42);

        let x = rt.atomically(&Stm::retry().or(&var.get())).unwrap();

        assert_eq!(x, 42);
    }

    /// A cell written in a branch that was not taken stays untouched.
    #[test]
    fn or_does_not_commit_the_abandoned_branch() {
        let rt = Runtime::new();
        let var = rt.new_tvar(42);

        let first = var.set(23).and(&Stm::retry());
        let second = var.get();

        let x = rt.atomically(&first.or(&second)).unwrap();

        assert_eq!(x, 42);
        assert_eq!(var.read_atomic(), 42);
    }

    #[test]
    fn or_nested_in_the_first_branch() {
        let rt = Runtime::new();
        let var = rt.new_tvar(42);

        let stm = Stm::retry().or(&Stm::retry()).or(&var.get());
        let x = rt.atomically(&stm).unwrap();

        assert_eq!(x, 42);
    }

    #[test]
    fn or_nested_in_the_second_branch() {
        let rt = Runtime::new();
        let var = rt.new_tvar(42);

        let stm = Stm::retry().or(&var.get().or(&Stm::retry()));
        let x = rt.atomically(&stm).unwrap();

        assert_eq!(x, 42);
    }

    #[test]
    fn unwrap_some() {
        let rt = Runtime::new();
        let x = rt.atomically(&unwrap_or_retry(Some(42))).unwrap();
        assert_eq!(x, 42);
    }

    #[test]
    fn unwrap_none_retries() {
        let rt = Runtime::new();
        let x: Option<i32> = rt
            .atomically(&optionally(&unwrap_or_retry::<i32>(None)))
            .unwrap();
        assert_eq!(x, None);
    }

    #[test]
    fn guard_true_passes() {
        let rt = Runtime::new();
        let x = rt.atomically(&optionally(&guard(true))).unwrap();
        assert_eq!(x, Some(()));
    }

    #[test]
    fn guard_false_retries() {
        let rt = Runtime::new();
        let x = rt.atomically(&optionally(&guard(false))).unwrap();
        assert_eq!(x, None);
    }

    #[test]
    fn optionally_succeeds() {
        let rt = Runtime::new();
        let x = rt.atomically(&optionally(&Stm::pure(42))).unwrap();
        assert_eq!(x, Some(42));
    }

    // End-to-end scenarios.

    /// Move the whole balance from one account to another in one atomic
    /// step.
    #[test]
    fn transfer() {
        let rt = Runtime::new();
        let a = rt.new_tvar(100);
        let b = rt.new_tvar(0);

        let transfer = a.get().and_then({
            let a = a.clone();
            let b = b.clone();
            move |x| a.set(0).and(&b.modify(move |y| y + x))
        });
        rt.atomically(&transfer).unwrap();

        assert_eq!(a.read_atomic(), 0);
        assert_eq!(b.read_atomic(), 100);
    }

    /// An abort rolls back everything the transaction wrote before it.
    #[test]
    fn abort_undoes_earlier_writes() {
        use std::io;

        let rt = Runtime::new();
        let a = rt.new_tvar(100);
        let b = rt.new_tvar(0);

        let stm = a
            .modify(|x| x - 100)
            .and(&Stm::<()>::abort(io::Error::new(
                io::ErrorKind::Other,
                "changed my mind",
            )))
            .and(&b.set(1));
        let err = rt.atomically(&stm).unwrap_err();

        assert!(matches!(err, TxError::Aborted(_)));
        assert_eq!(a.read_atomic(), 100);
        assert_eq!(b.read_atomic(), 0);
    }

    /// A panic inside user code rolls back the same way, but is reported as
    /// a failure, not an abort.
    #[test]
    fn panic_undoes_earlier_writes() {
        let rt = Runtime::new();
        let a = rt.new_tvar(100);
        let b = rt.new_tvar(0);

        let stm = a.modify(|x| x - 100).and(&b.modify(|_: i32| panic!("boom")));
        let err = rt.atomically(&stm).unwrap_err();

        match err {
            TxError::Failed(message) => assert!(message.contains("boom")),
            other => panic!("expected Failed, got {:?}", other),
        }
        assert_eq!(a.read_atomic(), 100);
        assert_eq!(b.read_atomic(), 0);
    }

    /// A guarded transaction keeps blocking until a concurrent commit makes
    /// the guard pass, and its body observably reruns.
    #[test]
    fn guard_blocks_until_satisfied() {
        let rt = Runtime::new();
        let a = rt.new_tvar(100);
        let b = rt.new_tvar(0);
        let runs = Arc::new(AtomicUsize::new(0));

        let stm = a.get().and_then({
            let a = a.clone();
            let b = b.clone();
            let runs = runs.clone();
            move |x| {
                runs.fetch_add(1, Ordering::SeqCst);
                guard(x > 100)
                    .and(&a.modify(|y| y - 100))
                    .and(&b.modify(|y| y + 100))
            }
        });

        test::run_async(
            2000,
            {
                let rt = rt.clone();
                move || rt.atomically(&stm).unwrap()
            },
            {
                let rt = rt.clone();
                let a = a.clone();
                move || {
                    thread::sleep(Duration::from_millis(200));
                    rt.atomically(&a.modify(|x| x + 1)).unwrap();
                }
            },
        )
        .unwrap();

        assert_eq!(a.read_atomic(), 1);
        assert_eq!(b.read_atomic(), 100);
        assert!(runs.load(Ordering::SeqCst) > 1);
    }

    /// `or` picks the branch whose guard passes.
    #[test]
    fn or_chooses_the_live_branch() {
        let rt = Runtime::new();
        let a = rt.new_tvar(100);

        let first = a
            .get()
            .and_then(|x| guard(x > 100))
            .and(&a.modify(|x| x - 100));
        let second = a
            .get()
            .and_then(|x| guard(x > 50))
            .and(&a.modify(|x| x - 50));

        rt.atomically(&first.or(&second)).unwrap();

        assert_eq!(a.read_atomic(), 50);
    }

    /// Writes of a retrying branch are rolled back before the alternative
    /// runs.
    #[test]
    fn or_reverts_the_retrying_branch() {
        let rt = Runtime::new();
        let a = rt.new_tvar(100);
        let b = rt.new_tvar(100);

        let first = b.modify(|x| x - 100).and(&Stm::retry());
        let second = a
            .get()
            .and_then(|x| guard(x > 50))
            .and(&a.modify(|x| x - 50));

        rt.atomically(&first.or(&second)).unwrap();

        assert_eq!(a.read_atomic(), 50);
        assert_eq!(b.read_atomic(), 100);
    }

    /// Two copies of the same blocked transaction both wake when the cell
    /// they read is published, and no subscription is left behind.
    #[test]
    fn all_waiters_wake_on_publish() {
        let rt = Runtime::new();
        let flag = rt.new_tvar(false);
        let a = rt.new_tvar(0);

        let stm = flag
            .get()
            .and_then(|f| guard(f))
            .and(&a.modify(|x| x + 1));

        let workers: Vec<_> = (0..2)
            .map(|_| {
                let rt = rt.clone();
                let stm = stm.clone();
                thread::spawn(move || rt.atomically(&stm).unwrap())
            })
            .collect();

        thread::sleep(Duration::from_millis(200));
        rt.atomically(&flag.set(true)).unwrap();

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(a.read_atomic(), 2);
        assert_eq!(flag.control_block().waiter_count(), 0);
    }

    /// Many concurrent increments never lose an update.
    #[test]
    fn concurrent_increments_are_all_applied() {
        let rt = Runtime::new();
        let counter = rt.new_tvar(0);

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let rt = rt.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let bump = counter.modify(|x| x + 1);
                    for _ in 0..100 {
                        rt.atomically(&bump).unwrap();
                    }
                })
            })
            .collect();

        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(counter.read_atomic(), 800);
    }

    // Laws. Each side runs against its own runtime with the same initial
    // state; equal results and equal final cell contents mean the two
    // formulations are interchangeable.

    proptest! {
        /// Binding a pure value is the same as applying the continuation.
        #[test]
        fn bind_left_identity(x in any::<i32>(), d in any::<i32>()) {
            let k = move |v: i32| Stm::pure(v.wrapping_add(d));

            let rt = Runtime::new();
            let lhs = rt.atomically(&Stm::pure(x).and_then(k)).unwrap();
            let rhs = rt.atomically(&k(x)).unwrap();

            prop_assert_eq!(lhs, rhs);
        }

        /// Binding into `pure` changes nothing.
        #[test]
        fn bind_right_identity(x in any::<i32>()) {
            let rt = Runtime::new();
            let var = rt.new_tvar(x);

            let lhs = rt.atomically(&var.get().and_then(Stm::pure)).unwrap();
            let rhs = rt.atomically(&var.get()).unwrap();

            prop_assert_eq!(lhs, rhs);
        }

        /// Rebracketing a bind chain does not change results or effects.
        #[test]
        fn bind_associativity(x in any::<i32>(), d1 in any::<i32>(), d2 in any::<i32>()) {
            let run = |nested: bool| {
                let rt = Runtime::new();
                let var = rt.new_tvar(x);
                let k1 = {
                    let var = var.clone();
                    move |v: i32| var.replace(v.wrapping_add(d1))
                };
                let k2 = {
                    let var = var.clone();
                    move |v: i32| var.replace(v.wrapping_mul(d2))
                };

                let stm = if nested {
                    var.get().and_then(k1).and_then(k2)
                } else {
                    let k2 = k2.clone();
                    var.get().and_then(move |v| k1(v).and_then(k2.clone()))
                };
                let result = rt.atomically(&stm).unwrap();
                (result, var.read_atomic())
            };

            prop_assert_eq!(run(true), run(false));
        }

        /// A retrying first branch defers to the second.
        #[test]
        fn or_retry_is_left_identity(x in any::<i32>(), d in any::<i32>()) {
            let apply = |with_retry: bool| {
                let rt = Runtime::new();
                let var = rt.new_tvar(x);
                let t = var.modify(move |v| v.wrapping_add(d));
                let stm = if with_retry { Stm::retry().or(&t) } else { t };
                rt.atomically(&stm).unwrap();
                var.read_atomic()
            };

            prop_assert_eq!(apply(true), apply(false));
        }

        /// A non-retrying first branch wins regardless of the second.
        #[test]
        fn or_prefers_a_live_left_branch(x in any::<i32>(), d in any::<i32>()) {
            let apply = |with_alternative: bool| {
                let rt = Runtime::new();
                let var = rt.new_tvar(x);
                let t = var.modify(move |v| v.wrapping_add(d));
                let stm = if with_alternative { t.or(&Stm::retry()) } else { t };
                rt.atomically(&stm).unwrap();
                var.read_atomic()
            };

            prop_assert_eq!(apply(true), apply(false));
        }

        /// `modify` is exactly a read bound into a write.
        #[test]
        fn modify_is_get_then_set(x in any::<i32>(), d in any::<i32>()) {
            let apply = |sugared: bool| {
                let rt = Runtime::new();
                let var = rt.new_tvar(x);
                let f = move |v: i32| v.wrapping_add(d);

                let stm = if sugared {
                    var.modify(f)
                } else {
                    let var2 = var.clone();
                    var.get().and_then(move |v| var2.set(f(v)))
                };
                rt.atomically(&stm).unwrap();
                var.read_atomic()
            };

            prop_assert_eq!(apply(true), apply(false));
        }
    }
}
