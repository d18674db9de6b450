use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{QuarryError, Result};

/// Cooperative cancellation signal shared between a caller and a run.
///
/// Blocking stages check it between batches and clusters, never mid-call.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuarryError::Cancelled)
        } else {
            Ok(())
        }
    }
}
