// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The runtime: commit gate, id streams, and the drive loop.

use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::ids::{IdSource, TxnId, VarId};
use crate::result::{TxError, TxResult};
use crate::stm::{downcast, Stm};
use crate::transaction::control_block::ControlBlock;
use crate::transaction::{Attempt, Commit, Eval, Park};
use crate::tvar::{TVar, VarControlBlock};

struct RuntimeInner {
    /// Serializes every commit. Validation, publication, parking and waiter
    /// removal all happen under this lock; snapshots taken during
    /// evaluation take it briefly too.
    commit_gate: Mutex<()>,

    ids: IdSource,
}

/// A self-contained transactional world.
///
/// All cells created through one runtime commit against its gate. Separate
/// runtimes are fully isolated from each other, which keeps tests hermetic;
/// most programs create exactly one. The handle is cheap to clone and share
/// between threads.
///
/// Do not mix cells of different runtimes in one transaction. Nothing
/// breaks memory-wise, but the atomicity guarantee only covers cells whose
/// gate the committing runtime holds.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new() -> Runtime {
        Runtime {
            inner: Arc::new(RuntimeInner {
                commit_gate: Mutex::new(()),
                ids: IdSource::new(),
            }),
        }
    }

    /// Create a cell committed immediately.
    pub fn new_tvar<T>(&self, value: T) -> TVar<T>
    where
        T: Any + Send + Sync + Clone,
    {
        TVar::new(self, value)
    }

    /// Run a transaction to completion.
    ///
    /// Evaluates `stm`, commits on success and silently reruns when another
    /// commit invalidated a read. A [`retry`](Stm::retry) parks the calling
    /// thread until one of the cells the attempt read is published again.
    /// [`Stm::abort`] and panics inside the transaction surface as errors
    /// without any cell having changed.
    ///
    /// ```
    /// # use txcell::Runtime;
    /// let rt = Runtime::new();
    /// let var = rt.new_tvar(0);
    ///
    /// let x = rt.atomically(&var.set(42).and(&var.get())).unwrap();
    ///
    /// assert_eq!(x, 42);
    /// ```
    pub fn atomically<T>(&self, stm: &Stm<T>) -> TxResult<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.drive(stm, None)
    }

    /// Like [`Runtime::atomically`], but the call can be cancelled from
    /// another thread, even while it is parked on a retry.
    pub fn atomically_with_cancel<T>(&self, stm: &Stm<T>, cancel: &CancelToken) -> TxResult<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.drive(stm, Some(cancel))
    }

    /// Fresh token for cancelling one [`Runtime::atomically_with_cancel`]
    /// call.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                parked: Mutex::new(None),
            }),
            runtime: self.clone(),
        }
    }

    pub(crate) fn next_var_id(&self) -> VarId {
        self.inner.ids.next_var()
    }

    pub(crate) fn next_txn_id(&self) -> TxnId {
        self.inner.ids.next_txn()
    }

    pub(crate) fn gate(&self) -> MutexGuard<'_, ()> {
        self.inner.commit_gate.lock()
    }

    pub(crate) fn with_gate<R>(&self, f: impl FnOnce() -> R) -> R {
        let _gate = self.gate();
        f()
    }

    fn drive<T>(&self, stm: &Stm<T>, cancel: Option<&CancelToken>) -> TxResult<T>
    where
        T: Any + Send + Sync + Clone,
    {
        let expr = stm.expr();

        loop {
            if cancel.map_or(false, CancelToken::is_cancelled) {
                return Err(TxError::Cancelled);
            }

            let txn = self.next_txn_id();
            let mut attempt = Attempt::new(txn);

            let evaluated = panic::catch_unwind(AssertUnwindSafe(|| attempt.eval(self, expr)));

            match evaluated {
                Err(payload) => {
                    let message = panic_message(payload);
                    tracing::debug!(txn = txn.raw(), %message, "user code panicked, attempt discarded");
                    return Err(TxError::Failed(message));
                }

                Ok(Eval::Abort(err)) => {
                    tracing::debug!(txn = txn.raw(), %err, "aborted");
                    return Err(TxError::Aborted(err));
                }

                Ok(Eval::Done(value)) => match attempt.commit(self, cancel) {
                    Commit::Committed => return Ok(downcast::<T>(&value)),
                    Commit::Conflict => {
                        tracing::trace!(txn = txn.raw(), "conflict, rerunning");
                        continue;
                    }
                    Commit::Cancelled => return Err(TxError::Cancelled),
                },

                Ok(Eval::Retry) => match attempt.park_and_wait(self, cancel) {
                    Park::Woken | Park::Stale => continue,
                    Park::Cancelled => return Err(TxError::Cancelled),
                },
            }
        }
    }
}

impl Default for Runtime {
    fn default() -> Runtime {
        Runtime::new()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The registration a parked attempt leaves with its cancel token.
struct ParkedAttempt {
    txn: TxnId,
    cells: Vec<Arc<VarControlBlock>>,
    block: Arc<ControlBlock>,
}

/// Cancels one in-flight [`Runtime::atomically_with_cancel`] call.
///
/// Cancellation is idempotent. A cancelled attempt never publishes a write,
/// and a parked attempt's subscriptions are removed from every cell before
/// [`CancelToken::cancel`] returns.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
    runtime: Runtime,
}

struct CancelInner {
    cancelled: AtomicBool,
    parked: Mutex<Option<ParkedAttempt>>,
}

impl CancelToken {
    /// Cancel the commit this token was handed to.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);

        let parked = self.inner.parked.lock().take();
        if let Some(parked) = parked {
            {
                let _gate = self.runtime.gate();
                for cell in &parked.cells {
                    cell.unpark(parked.txn);
                }
            }
            parked.block.set_changed();
            tracing::debug!(txn = parked.txn.raw(), "parked attempt cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub(crate) fn register_parked(
        &self,
        txn: TxnId,
        cells: Vec<Arc<VarControlBlock>>,
        block: Arc<ControlBlock>,
    ) {
        *self.inner.parked.lock() = Some(ParkedAttempt { txn, cells, block });
    }

    pub(crate) fn clear_parked(&self) {
        self.inner.parked.lock().take();
    }
}
