// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Attempt execution: the per-attempt log, the commit path, and parking.

pub(crate) mod control_block;
pub(crate) mod log_entry;

use std::collections::btree_map::Entry::{Occupied, Vacant};
use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use self::control_block::ControlBlock;
use self::log_entry::LogEntry;
use crate::ids::{TxnId, VarId};
use crate::result::DynError;
use crate::runtime::{CancelToken, Runtime};
use crate::stm::Expr;
use crate::tvar::{ArcAny, VarControlBlock};

/// Signal produced by evaluating an expression.
pub(crate) enum Eval {
    /// The expression produced a value.
    Done(ArcAny),

    /// The expression asked to block until a cell it read changes.
    Retry,

    /// The expression failed with a user error.
    Abort(DynError),
}

/// Outcome of the commit step.
pub(crate) enum Commit {
    /// The write set was published.
    Committed,

    /// A cell changed between its snapshot and the commit; rerun from
    /// scratch. Callers never see this.
    Conflict,

    /// The caller cancelled before anything was published.
    Cancelled,
}

/// Outcome of parking on the read set.
pub(crate) enum Park {
    /// A commit published one of the cells; rerun.
    Woken,

    /// The world had already moved before the subscription went in; rerun
    /// without blocking.
    Stale,

    /// The caller cancelled the parked attempt.
    Cancelled,
}

fn unit() -> ArcAny {
    Arc::new(())
}

/// One execution of a transaction.
///
/// Tracks every cell the attempt has touched so commit can validate the
/// reads and a retry can block on them. Dropped wholesale on conflict; the
/// rerun starts over with a fresh id and an empty log.
pub(crate) struct Attempt {
    id: TxnId,

    /// Live footprint of the attempt, one entry per touched cell.
    log: BTreeMap<VarId, LogEntry>,

    /// Read footprints of alternative branches that were rolled back.
    ///
    /// Never validated and never published, but parked on alongside the
    /// live log: a change in a discarded branch can unblock the attempt.
    rolled_back: BTreeMap<VarId, LogEntry>,
}

impl Attempt {
    pub(crate) fn new(id: TxnId) -> Attempt {
        Attempt {
            id,
            log: BTreeMap::new(),
            rolled_back: BTreeMap::new(),
        }
    }

    /// Interpret `expr` against the log.
    ///
    /// Cells are only touched through gate-consistent point snapshots;
    /// evaluation itself never blocks on other attempts.
    pub(crate) fn eval(&mut self, runtime: &Runtime, expr: &Expr) -> Eval {
        match expr {
            Expr::Pure(value) => Eval::Done(value.clone()),

            Expr::Read(var) => Eval::Done(self.read(runtime, var)),

            Expr::Write(var, value) => {
                self.write(runtime, var, value.clone());
                Eval::Done(unit())
            }

            Expr::Bind(prev, cont) => match self.eval(runtime, prev) {
                Eval::Done(value) => {
                    let next = cont(value);
                    self.eval(runtime, &next)
                }
                signal => signal,
            },

            Expr::Retry => Eval::Retry,

            Expr::OrElse(left, right) => {
                let saved = self.log.clone();
                match self.eval(runtime, left) {
                    Eval::Retry => {
                        let abandoned = mem::replace(&mut self.log, saved);
                        self.keep_for_wakeup(abandoned);
                        self.eval(runtime, right)
                    }
                    signal => signal,
                }
            }

            Expr::Abort(err) => Eval::Abort(err.clone()),
        }
    }

    /// Read a cell through the log.
    ///
    /// First contact snapshots the committed value under the gate; later
    /// reads see the attempt's own pending value.
    fn read(&mut self, runtime: &Runtime, var: &Arc<VarControlBlock>) -> ArcAny {
        match self.log.entry(var.id()) {
            Occupied(entry) => entry.get().pending(),
            Vacant(entry) => {
                let observed = runtime.with_gate(|| var.snapshot());
                entry.insert(LogEntry::read(var.clone(), observed.clone()));
                observed
            }
        }
    }

    /// Record a write. A cell written before it was read still gets an
    /// observed snapshot, so commit validation covers blind writes too.
    fn write(&mut self, runtime: &Runtime, var: &Arc<VarControlBlock>, value: ArcAny) {
        match self.log.entry(var.id()) {
            Occupied(mut entry) => entry.get_mut().record_write(value),
            Vacant(entry) => {
                let observed = runtime.with_gate(|| var.snapshot());
                entry.insert(LogEntry::write(var.clone(), observed, value));
            }
        }
    }

    /// Fold an abandoned branch log into the wakeup-only set.
    ///
    /// Only the first footprint of a cell is kept; it carries the value the
    /// branch actually observed.
    fn keep_for_wakeup(&mut self, abandoned: BTreeMap<VarId, LogEntry>) {
        for (id, entry) in abandoned {
            self.rolled_back.entry(id).or_insert(entry);
        }
    }

    /// Everything the attempt must block on: the live log plus the reads of
    /// rolled-back branches, each cell once.
    fn wait_set(&self) -> impl Iterator<Item = &LogEntry> {
        self.log.values().chain(
            self.rolled_back
                .iter()
                .filter(|(id, _)| !self.log.contains_key(id))
                .map(|(_, entry)| entry),
        )
    }

    /// Validate the read set and publish the write set.
    ///
    /// Everything up to collecting the waiters happens inside the gate;
    /// the waiters themselves are fired after it is released, so no user
    /// work ever runs under the gate.
    pub(crate) fn commit(&self, runtime: &Runtime, cancel: Option<&CancelToken>) -> Commit {
        let to_wake = {
            let _gate = runtime.gate();

            if cancel.map_or(false, CancelToken::is_cancelled) {
                return Commit::Cancelled;
            }

            for entry in self.log.values() {
                if !entry.var.value_is(&entry.observed) {
                    tracing::trace!(
                        txn = self.id.raw(),
                        cell = entry.var.id().raw(),
                        "commit conflict"
                    );
                    return Commit::Conflict;
                }
            }

            let mut to_wake = Vec::new();
            for entry in self.log.values().filter(|entry| entry.touched) {
                to_wake.extend(entry.var.publish(entry.pending()));
            }
            to_wake
        };

        tracing::trace!(txn = self.id.raw(), woken = to_wake.len(), "committed");
        for block in to_wake {
            block.set_changed();
        }
        Commit::Committed
    }

    /// Subscribe the attempt on everything it read, then block until a
    /// commit publishes one of those cells.
    ///
    /// If any observed cell already changed, nothing is installed and the
    /// caller reruns straight away. Waking for a cell that changes back
    /// before the rerun is fine; the rerun just retries and parks again.
    pub(crate) fn park_and_wait(&self, runtime: &Runtime, cancel: Option<&CancelToken>) -> Park {
        let block = Arc::new(ControlBlock::new());

        // Register with the canceller first; a cancel landing between the
        // registration and the wait still reaches the block.
        if let Some(token) = cancel {
            let cells = self.wait_set().map(|entry| entry.var.clone()).collect();
            token.register_parked(self.id, cells, block.clone());
        }

        let parked = {
            let _gate = runtime.gate();
            let consistent = self
                .wait_set()
                .all(|entry| entry.var.value_is(&entry.observed));
            if consistent {
                for entry in self.wait_set() {
                    entry.var.park(self.id, &block);
                }
            }
            consistent
        };

        if !parked {
            if let Some(token) = cancel {
                token.clear_parked();
            }
            tracing::trace!(txn = self.id.raw(), "read set moved before park");
            return Park::Stale;
        }

        if cancel.map_or(false, CancelToken::is_cancelled) {
            self.unpark_all(runtime);
            if let Some(token) = cancel {
                token.clear_parked();
            }
            return Park::Cancelled;
        }

        tracing::trace!(txn = self.id.raw(), "parked");
        block.wait();

        if let Some(token) = cancel {
            token.clear_parked();
        }
        self.unpark_all(runtime);

        if cancel.map_or(false, CancelToken::is_cancelled) {
            Park::Cancelled
        } else {
            tracing::trace!(txn = self.id.raw(), "woken");
            Park::Woken
        }
    }

    /// Remove this attempt's subscriptions from every cell it parked on.
    fn unpark_all(&self, runtime: &Runtime) {
        let _gate = runtime.gate();
        for entry in self.wait_set() {
            entry.var.unpark(self.id);
        }
    }
}
