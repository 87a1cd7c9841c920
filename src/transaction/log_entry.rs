// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::sync::Arc;

use crate::tvar::{ArcAny, VarControlBlock};

/// One cell's footprint within a single attempt.
///
/// `observed` is the committed value snapshotted on first contact and is
/// what commit validation compares against. `current` is the value the
/// attempt would publish; it equals `observed` until the first write.
#[derive(Clone)]
pub(crate) struct LogEntry {
    pub(crate) var: Arc<VarControlBlock>,
    pub(crate) observed: ArcAny,
    pub(crate) current: ArcAny,

    /// Set once the attempt has written the cell. Untouched entries are
    /// validated but never published.
    pub(crate) touched: bool,
}

impl LogEntry {
    /// Entry seeded by a read.
    pub(crate) fn read(var: Arc<VarControlBlock>, observed: ArcAny) -> LogEntry {
        LogEntry {
            var,
            current: observed.clone(),
            observed,
            touched: false,
        }
    }

    /// Entry seeded by a write that never read the cell first.
    ///
    /// `observed` still holds the snapshot taken when the entry was created,
    /// so blind writes are conflict-checked like everything else.
    pub(crate) fn write(var: Arc<VarControlBlock>, observed: ArcAny, value: ArcAny) -> LogEntry {
        LogEntry {
            var,
            observed,
            current: value,
            touched: true,
        }
    }

    /// The value a later read inside the same attempt sees.
    pub(crate) fn pending(&self) -> ArcAny {
        self.current.clone()
    }

    /// Record a write. The last write wins.
    pub(crate) fn record_write(&mut self, value: ArcAny) {
        self.current = value;
        self.touched = true;
    }
}
