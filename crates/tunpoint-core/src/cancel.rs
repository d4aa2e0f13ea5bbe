//! Per-run cancellation signal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Inner {
    run_id: Uuid,
    token: CancellationToken,
    fired: AtomicBool,
}

/// Single-shot signal scoped to one run.
///
/// Clones share the same signal. [`fire`](Self::fire) takes effect once;
/// later calls are ignored and report `false`. Waiters that subscribe after
/// the signal fired complete immediately.
#[derive(Clone)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                run_id: Uuid::new_v4(),
                token: CancellationToken::new(),
                fired: AtomicBool::new(false),
            }),
        }
    }

    /// Identifier of the run this signal belongs to
    pub fn run_id(&self) -> Uuid {
        self.inner.run_id
    }

    /// Fire the signal. Returns `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        if self.inner.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }

    /// Wait until the signal fires
    pub async fn fired(&self) {
        self.inner.token.cancelled().await
    }

    /// Whether both handles belong to the same run
    pub fn same_run(&self, other: &CancelSignal) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("run_id", &self.inner.run_id)
            .field("fired", &self.is_fired())
            .finish()
    }
}
