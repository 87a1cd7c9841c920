// Copyright 2025-2026 txcell Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Results surfaced by [`Runtime::atomically`](crate::Runtime::atomically).
//!
//! Conflicts and retries are handled inside the runtime and never show up
//! here. The only errors a caller sees are the ones the transaction itself
//! produced, plus cancellation.

use std::error::Error;
use std::sync::Arc;

/// Shared, type-erased user error carried by an abort.
pub type DynError = Arc<dyn Error + Send + Sync + 'static>;

pub type TxResult<T> = Result<T, TxError>;

/// Why a commit did not produce a value.
///
/// Whatever the variant, no cell was modified by the failed transaction.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TxError {
    /// The transaction called [`Stm::abort`](crate::Stm::abort).
    #[error("transaction aborted: {0}")]
    Aborted(#[source] DynError),

    /// A panic escaped user code inside the transaction.
    ///
    /// Kept distinct from [`TxError::Aborted`] so diagnostics can tell a
    /// deliberate abort from a blown-up user function.
    #[error("transaction failed: {0}")]
    Failed(String),

    /// The caller cancelled the commit while it was running or parked.
    #[error("transaction cancelled")]
    Cancelled,
}
