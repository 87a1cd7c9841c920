// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Transactions as values.
//!
//! An [`Stm`] describes reads and writes without performing them. Building
//! one has no effect on any cell; only
//! [`Runtime::atomically`](crate::Runtime::atomically) runs it. Because the
//! description is immutable it can be stored, cloned cheaply, and committed
//! any number of times, from any number of threads, each run being an
//! independent attempt.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::result::DynError;
use crate::tvar::{ArcAny, VarControlBlock};

/// Continuation stored in a bind node.
///
/// Returns the expression to run next; it is re-invoked on every attempt,
/// so it must stay free of side effects outside the cells.
pub(crate) type Cont = Arc<dyn Fn(ArcAny) -> Arc<Expr> + Send + Sync>;

/// The closed set of operations a transaction is built from.
///
/// Values and cells are type-erased at this level; [`Stm`] is the typed
/// surface and recovers concrete types at the leaves. The executor matches
/// exhaustively on this enum and nothing else.
pub(crate) enum Expr {
    /// Yield a value, touching no cell.
    Pure(ArcAny),

    /// Yield the cell's value through the attempt's log.
    Read(Arc<VarControlBlock>),

    /// Record a pending write, yielding unit.
    Write(Arc<VarControlBlock>, ArcAny),

    /// Run the first expression, then feed its value to the continuation.
    ///
    /// A retry or abort in the first expression skips the continuation.
    Bind(Arc<Expr>, Cont),

    /// Block the attempt until a cell it has read changes.
    Retry,

    /// Run the left expression; only if it retries, roll its writes back
    /// and run the right one.
    OrElse(Arc<Expr>, Arc<Expr>),

    /// Fail the transaction with a user error.
    Abort(DynError),
}

/// Recover a typed value from the erased representation.
///
/// The typed constructors are the only way to build expressions, so a
/// mismatch here cannot be reached from safe callers.
pub(crate) fn downcast<T: Any + Clone>(value: &ArcAny) -> T {
    match value.downcast_ref::<T>() {
        Some(v) => v.clone(),
        None => unreachable!("transactional value has wrong type"),
    }
}

/// A transaction over [`TVar`](crate::TVar)s.
///
/// `Stm<T>` is a pure description of work yielding a `T`. Run it with
/// [`Runtime::atomically`](crate::Runtime::atomically), which either commits
/// every write it recorded or leaves the world unchanged.
pub struct Stm<T> {
    expr: Arc<Expr>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Stm<T> {
    fn clone(&self) -> Stm<T> {
        Stm {
            expr: self.expr.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> Stm<T>
where
    T: Any + Send + Sync + Clone,
{
    fn from_expr(expr: Expr) -> Stm<T> {
        Stm {
            expr: Arc::new(expr),
            _marker: PhantomData,
        }
    }

    pub(crate) fn expr(&self) -> &Arc<Expr> {
        &self.expr
    }

    /// A transaction that yields `value` and touches no cell.
    pub fn pure(value: T) -> Stm<T> {
        Stm::from_expr(Expr::Pure(Arc::new(value)))
    }

    pub(crate) fn read_var(var: Arc<VarControlBlock>) -> Stm<T> {
        Stm::from_expr(Expr::Read(var))
    }

    /// Feed the result of `self` to `f` and continue with the transaction
    /// it builds.
    ///
    /// `f` runs once per attempt. It must not have side effects beyond the
    /// cells; attempts rerun on conflict and on wakeup.
    pub fn and_then<U, F>(&self, f: F) -> Stm<U>
    where
        U: Any + Send + Sync + Clone,
        F: Fn(T) -> Stm<U> + Send + Sync + 'static,
    {
        let cont: Cont = Arc::new(move |value| f(downcast::<T>(&value)).expr.clone());
        Stm {
            expr: Arc::new(Expr::Bind(self.expr.clone(), cont)),
            _marker: PhantomData,
        }
    }

    /// Apply a plain function to the result of `self`.
    pub fn map<U, F>(&self, f: F) -> Stm<U>
    where
        U: Any + Send + Sync + Clone,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        self.and_then(move |x| Stm::pure(f(x)))
    }

    /// Run `self`, discard its result, then run `next`.
    pub fn and<U>(&self, next: &Stm<U>) -> Stm<U>
    where
        U: Any + Send + Sync + Clone,
    {
        let next = next.expr.clone();
        let cont: Cont = Arc::new(move |_| next.clone());
        Stm {
            expr: Arc::new(Expr::Bind(self.expr.clone(), cont)),
            _marker: PhantomData,
        }
    }

    /// Try `self`; if it retries, run `other` from the same starting state.
    ///
    /// If both sides retry, the attempt blocks on the cells read by either
    /// of them. An abort in `self` is final and never falls through to
    /// `other`.
    ///
    /// ```
    /// # use txcell::{Runtime, Stm};
    /// let rt = Runtime::new();
    /// let var = rt.new_tvar(42);
    ///
    /// let x = rt.atomically(&Stm::retry().or(&var.get())).unwrap();
    ///
    /// assert_eq!(x, 42);
    /// ```
    pub fn or(&self, other: &Stm<T>) -> Stm<T> {
        Stm::from_expr(Expr::OrElse(self.expr.clone(), other.expr.clone()))
    }

    /// Block the attempt until one of the cells it has read changes, then
    /// rerun it from scratch.
    ///
    /// A transaction that retries before reading anything waits forever.
    ///
    /// ```no_run
    /// # use txcell::{Runtime, Stm};
    /// let rt = Runtime::new();
    /// let forever: i32 = rt.atomically(&Stm::retry()).unwrap();
    /// ```
    pub fn retry() -> Stm<T> {
        Stm::from_expr(Expr::Retry)
    }

    /// Fail the transaction with `err`.
    ///
    /// Every pending write of the attempt is discarded and the error
    /// surfaces to the committer as
    /// [`TxError::Aborted`](crate::TxError::Aborted).
    ///
    /// ```
    /// # use std::io;
    /// # use txcell::{Runtime, Stm, TxError};
    /// let rt = Runtime::new();
    ///
    /// let stm: Stm<i32> = Stm::abort(io::Error::new(io::ErrorKind::Other, "insufficient funds"));
    /// let err = rt.atomically(&stm).unwrap_err();
    ///
    /// assert!(matches!(err, TxError::Aborted(_)));
    /// ```
    pub fn abort<E>(err: E) -> Stm<T>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Stm::from_expr(Expr::Abort(Arc::new(err)))
    }
}

impl Stm<()> {
    pub(crate) fn write_var(var: Arc<VarControlBlock>, value: ArcAny) -> Stm<()> {
        Stm::from_expr(Expr::Write(var, value))
    }
}
