//! Cooperative cancellation for long-running analyses

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{AnalysisError, Result};

/// Shared cancellation flag with an optional deadline.
///
/// Clones share the same flag, so a host can keep one clone and hand another
/// to a running analysis. Work loops call [`CancellationToken::check`] between
/// stages and per gene; once cancelled, the analysis returns
/// [`AnalysisError::Cancelled`] and discards everything computed so far.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that never fires unless `cancel` is called
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// A token that also fires once `timeout` has elapsed from now
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    /// Request cancellation; visible to every clone
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// Return `Err(Cancelled)` if the token has fired.
    /// `stage` names the step that observed the cancellation.
    pub fn check(&self, stage: &str) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(AnalysisError::Cancelled {
                reason: format!("cancelled during {}", stage),
            });
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(AnalysisError::Cancelled {
                reason: format!("timed out during {}", stage),
            });
        }
        Ok(())
    }
}
