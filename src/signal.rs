//! The "buffer ready" / "data ready" event pair

use crate::error::{RelayError, Result};
use crate::names::RelayNames;
use crate::sys::NamedEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How long a wait blocks before looking at its cancellation token again
pub const WAIT_SLICE: Duration = Duration::from_millis(50);

/// Cooperative cancellation shared between a session and its loop
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Result of an interruptible wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Signaled,
    Cancelled,
}

/// Both relay events, freshly created by this process
pub struct SignalPair {
    buffer_ready: NamedEvent,
    data_ready: NamedEvent,
}

impl SignalPair {
    /// Create both events.
    ///
    /// Either name already existing means another listener is active and
    /// yields [`RelayError::AlreadyRunning`]. A half-created pair is released
    /// before returning.
    pub fn create(names: &RelayNames) -> Result<Self> {
        let buffer_ready = NamedEvent::create(&names.buffer_ready)
            .map_err(|e| RelayError::from_create(&names.buffer_ready, e))?;
        let data_ready = NamedEvent::create(&names.data_ready)
            .map_err(|e| RelayError::from_create(&names.data_ready, e))?;

        debug!(
            buffer_ready = %names.buffer_ready,
            data_ready = %names.data_ready,
            "created relay events"
        );
        Ok(Self {
            buffer_ready,
            data_ready,
        })
    }

    /// Hand the slot to the next producer
    pub fn signal_buffer_ready(&self) -> Result<()> {
        self.buffer_ready.set().map_err(|source| RelayError::Signal {
            name: self.buffer_ready.name().to_string(),
            source,
        })
    }

    /// Block until a producer has filled the slot or `cancel` fires.
    ///
    /// A cancelled wait leaves any pending signal untouched.
    pub fn wait_data_ready(&self, cancel: &CancellationToken) -> Result<WaitOutcome> {
        loop {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled);
            }
            let signaled = self
                .data_ready
                .wait_timeout(WAIT_SLICE)
                .map_err(|source| RelayError::Signal {
                    name: self.data_ready.name().to_string(),
                    source,
                })?;
            if signaled {
                return Ok(WaitOutcome::Signaled);
            }
        }
    }
}
