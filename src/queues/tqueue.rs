// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::any::Any;

use super::TQueueLike;
use crate::queues::test_queue_mod;
use crate::{Runtime, Stm, TVar};

/// Unbounded queue using two vectors.
///
/// Writes go to one vector and reads come from the other until the read
/// vector runs dry and the two are swapped. Reads don't block writes most
/// of the time, and the amortised cost is O(1).
#[derive(Clone)]
pub struct TQueue<T> {
    read: TVar<Vec<T>>,
    write: TVar<Vec<T>>,
}

impl<T> TQueue<T>
where
    T: Any + Send + Sync + Clone,
{
    /// Create an empty `TQueue` whose cells live in `runtime`.
    pub fn new(runtime: &Runtime) -> TQueue<T> {
        TQueue {
            read: runtime.new_tvar(Vec::new()),
            write: runtime.new_tvar(Vec::new()),
        }
    }
}

impl<T> TQueueLike<T> for TQueue<T>
where
    T: Any + Send + Sync + Clone,
{
    fn push(&self, value: T) -> Stm<()> {
        let write = self.write.clone();
        self.write.get().and_then(move |mut v: Vec<T>| {
            v.push(value.clone());
            write.set(v)
        })
    }

    fn pop(&self) -> Stm<T> {
        let read = self.read.clone();
        let write = self.write.clone();
        self.read.get().and_then(move |mut rv: Vec<T>| {
            // Elements are stored in reverse order.
            match rv.pop() {
                Some(value) => read.set(rv).map(move |_| value.clone()),
                None => {
                    let read = read.clone();
                    let swap_out = write.clone();
                    write.get().and_then(move |mut wv: Vec<T>| {
                        if wv.is_empty() {
                            Stm::retry()
                        } else {
                            wv.reverse();
                            let value = wv.pop().unwrap();
                            read.set(wv)
                                .and(&swap_out.set(Vec::new()))
                                .map(move |_| value.clone())
                        }
                    })
                }
            }
        })
    }

    fn is_empty(&self) -> Stm<bool> {
        let write = self.write.clone();
        self.read.get().and_then(move |rv: Vec<T>| {
            if rv.is_empty() {
                write.get().map(|wv: Vec<T>| wv.is_empty())
            } else {
                Stm::pure(false)
            }
        })
    }
}

test_queue_mod!(|rt| crate::queues::TQueue::<i32>::new(rt));
