// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::mem;
use std::sync::{Arc, Weak};

use crate::ids::{TxnId, VarId};
use crate::runtime::Runtime;
use crate::stm::{downcast, Stm};
use crate::transaction::control_block::ControlBlock;

/// Type-erased committed value of a cell.
pub(crate) type ArcAny = Arc<dyn Any + Send + Sync>;

/// One parked attempt's subscription on a cell.
///
/// The block is held weakly; the parked attempt owns it. The id lets the
/// attempt, or whoever cancels it, remove the subscription precisely.
struct Waiter {
    txn: TxnId,
    block: Weak<ControlBlock>,
}

/// `VarControlBlock` is the shared, untyped inner of a [`TVar`].
///
/// The control block is accessed from other threads directly whereas `TVar`
/// is just a typesafe wrapper around it.
pub(crate) struct VarControlBlock {
    id: VarId,

    /// Attempts parked on this cell. Mutated only under the commit gate.
    waiters: Mutex<Vec<Waiter>>,

    /// The committed value.
    ///
    /// The `Arc` doubles as the version: every publish installs a fresh
    /// allocation and logs keep the allocation they observed alive, so
    /// pointer identity detects any intervening publish.
    value: RwLock<ArcAny>,
}

impl VarControlBlock {
    pub(crate) fn new<T>(id: VarId, val: T) -> Arc<VarControlBlock>
    where
        T: Any + Send + Sync,
    {
        Arc::new(VarControlBlock {
            id,
            waiters: Mutex::new(Vec::new()),
            value: RwLock::new(Arc::new(val)),
        })
    }

    pub(crate) fn id(&self) -> VarId {
        self.id
    }

    /// Point read of the committed value.
    ///
    /// Commit-path callers hold the gate; [`TVar::read_atomic`] calls it
    /// bare and gets the last published value.
    pub(crate) fn snapshot(&self) -> ArcAny {
        self.value.read().clone()
    }

    /// True if the committed value is still the exact allocation `observed`.
    ///
    /// Call with the commit gate held.
    pub(crate) fn value_is(&self, observed: &ArcAny) -> bool {
        Arc::ptr_eq(&*self.value.read(), observed)
    }

    /// Overwrite the committed value and drain the waiter list.
    ///
    /// Call with the commit gate held. The returned blocks must be fired
    /// only after the gate is released.
    pub(crate) fn publish(&self, value: ArcAny) -> Vec<Arc<ControlBlock>> {
        *self.value.write() = value;

        let drained = {
            let mut guard = self.waiters.lock();
            mem::take(&mut *guard)
        };

        // Entries whose attempt is already gone just drop here.
        drained.iter().filter_map(|w| w.block.upgrade()).collect()
    }

    /// Subscribe a parked attempt. Call with the commit gate held.
    pub(crate) fn park(&self, txn: TxnId, block: &Arc<ControlBlock>) {
        self.waiters.lock().push(Waiter {
            txn,
            block: Arc::downgrade(block),
        });
    }

    /// Drop an attempt's subscription if it is still present.
    ///
    /// Call with the commit gate held. Idempotent.
    pub(crate) fn unpark(&self, txn: TxnId) {
        self.waiters.lock().retain(|w| w.txn != txn);
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

/// A cell that can be read and written from inside a transaction.
///
/// `TVar` is `Clone`; clones refer to the same cell. The committed value
/// only ever changes when a transaction that wrote the cell commits.
#[derive(Clone)]
pub struct TVar<T> {
    /// The control block is the shared inner of the variable.
    ///
    /// The rest of `TVar` is just the typesafe interface.
    control_block: Arc<VarControlBlock>,

    /// This marker is needed so that the variable can be used in a typesafe
    /// manner.
    _marker: PhantomData<T>,
}

impl<T> TVar<T>
where
    T: Any + Send + Sync + Clone,
{
    /// Create a cell owned by `runtime`, committed immediately.
    ///
    /// Equivalent to [`Runtime::new_tvar`].
    pub fn new(runtime: &Runtime, value: T) -> TVar<T> {
        TVar {
            control_block: VarControlBlock::new(runtime.next_var_id(), value),
            _marker: PhantomData,
        }
    }

    /// Read the cell.
    ///
    /// Inside one transaction, a read after a write sees the pending write,
    /// not the committed value.
    pub fn get(&self) -> Stm<T> {
        Stm::read_var(self.control_block.clone())
    }

    /// Overwrite the cell.
    ///
    /// The write is not visible to other transactions until commit.
    pub fn set(&self, value: T) -> Stm<()> {
        Stm::write_var(self.control_block.clone(), Arc::new(value))
    }

    /// Apply `f` to the content of the cell.
    ///
    /// ```
    /// # use txcell::Runtime;
    /// let rt = Runtime::new();
    /// let var = rt.new_tvar(21);
    ///
    /// rt.atomically(&var.modify(|x| x * 2)).unwrap();
    ///
    /// assert_eq!(var.read_atomic(), 42);
    /// ```
    pub fn modify<F>(&self, f: F) -> Stm<()>
    where
        F: Fn(T) -> T + Send + Sync + 'static,
    {
        let var = self.clone();
        self.get().and_then(move |x| var.set(f(x)))
    }

    /// Replace the value of the cell, yielding the old one.
    ///
    /// ```
    /// # use txcell::Runtime;
    /// let rt = Runtime::new();
    /// let var = rt.new_tvar(0);
    ///
    /// let old = rt.atomically(&var.replace(42)).unwrap();
    ///
    /// assert_eq!(old, 0);
    /// assert_eq!(var.read_atomic(), 42);
    /// ```
    pub fn replace(&self, value: T) -> Stm<T> {
        let var = self.clone();
        self.get()
            .and_then(move |old| var.set(value.clone()).map(move |_| old.clone()))
    }

    /// Read the last committed value without a transaction.
    ///
    /// The read bypasses the commit gate. It returns the most recently
    /// published value and never blocks a committer; use it to inspect
    /// state from outside, not to build transactional logic.
    pub fn read_atomic(&self) -> T {
        downcast(&self.control_block.snapshot())
    }

    /// Check if two `TVar`s refer to the same cell.
    pub fn ref_eq(this: &TVar<T>, other: &TVar<T>) -> bool {
        Arc::ptr_eq(&this.control_block, &other.control_block)
    }

    pub(crate) fn control_block(&self) -> &Arc<VarControlBlock> {
        &self.control_block
    }
}

/// Note that this does not print the cell atomically with respect to a
/// running commit. If a commit publishes at the same time, the printed
/// value may be either side of it.
impl<T> Debug for TVar<T>
where
    T: Any + Send + Sync + Clone + Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let x = self.read_atomic();
        f.debug_struct("TVar").field("value", &x).finish()
    }
}
