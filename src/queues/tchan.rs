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

/// A cell that is either empty or a cons of an item and the tail of the
/// list, which is again such a cell.
type TVarList<T> = TVar<TList<T>>;

/// A linked list of cells.
#[derive(Clone)]
enum TList<T> {
    Nil,
    Cons(T, TVarList<T>),
}

/// Unbounded queue using a linked list of cells.
///
/// A read pointer and a write pointer chase each other down the list, so
/// reads don't invalidate writes the way a single cell holding the whole
/// queue would. Pushing allocates a fresh tail cell inside the transaction,
/// which is why the channel keeps a [`Runtime`] handle.
#[derive(Clone)]
pub struct TChan<T> {
    runtime: Runtime,
    read: TVar<TVarList<T>>,
    write: TVar<TVarList<T>>,
}

impl<T> TChan<T>
where
    T: Any + Send + Sync + Clone,
{
    /// Create an empty `TChan`.
    ///
    /// Both pointers start at a shared hole holding the empty list.
    /// ```text
    ///    [Nil]
    ///   /     \
    /// [*]     [*]
    /// read    write
    /// ```
    pub fn new(runtime: &Runtime) -> TChan<T> {
        let hole = runtime.new_tvar(TList::Nil);
        TChan {
            runtime: runtime.clone(),
            read: runtime.new_tvar(hole.clone()),
            write: runtime.new_tvar(hole),
        }
    }

    fn is_empty_list(end: &TVar<TVarList<T>>) -> Stm<bool> {
        end.get()
            .and_then(|cell: TVarList<T>| cell.get().map(|list| matches!(list, TList::Nil)))
    }
}

impl<T> TQueueLike<T> for TChan<T>
where
    T: Any + Send + Sync + Clone,
{
    /// Push to the end of the queue.
    ///
    /// Fills the current write hole with a cons and points the write end at
    /// a fresh hole.
    /// ```text
    ///  [Cons(x, [Cons(y, [Nil])])]
    ///  |        |        |
    /// [*]      [ ]      [*]
    /// read     write0 -> write1
    /// ```
    fn push(&self, value: T) -> Stm<()> {
        let runtime = self.runtime.clone();
        let write = self.write.clone();
        self.write.get().and_then(move |tail: TVarList<T>| {
            let hole = runtime.new_tvar(TList::Nil);
            tail.set(TList::Cons(value.clone(), hole.clone()))
                .and(&write.set(hole))
        })
    }

    /// Pop the head of the queue, retrying while it is empty.
    ///
    /// Moves the read pointer down the list to the next cell.
    /// ```text
    ///  [Cons(x, [Cons(y, [Nil])])]
    ///  |        |        |
    /// [ ]      [*]      [*]
    /// read0 -> read1    write
    /// ```
    fn pop(&self) -> Stm<T> {
        let read = self.read.clone();
        self.read.get().and_then(move |head: TVarList<T>| {
            let read = read.clone();
            head.get().and_then(move |list| match list {
                TList::Nil => Stm::retry(),
                TList::Cons(value, tail) => read.set(tail).map(move |_| value.clone()),
            })
        })
    }

    fn is_empty(&self) -> Stm<bool> {
        let write = self.write.clone();
        Self::is_empty_list(&self.read).and_then(move |empty| {
            if empty {
                Self::is_empty_list(&write)
            } else {
                Stm::pure(false)
            }
        })
    }
}

test_queue_mod!(|rt| crate::queues::TChan::<i32>::new(rt));
